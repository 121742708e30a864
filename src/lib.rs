//! Onboarding engine: multi-step intake wizard with background sync and a
//! gated final commit.

pub mod config;
pub mod error;
pub mod onboarding;
pub mod store;
