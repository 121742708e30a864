//! Onboarding engine: the multi-step intake wizard for new users.
//!
//! The wizard collects profile data one step at a time. Every forward move
//! is validated locally and saved in the background; the final submit
//! records legal acceptances, flushes the draft and commits the profile
//! under a deadline.

pub mod calories;
pub mod draft;
pub mod finalize;
pub mod goal_weight;
pub mod manager;
pub mod metrics;
pub mod model;
pub mod routes;
pub mod session;
pub mod state;
pub mod sync;
pub mod validate;

pub use draft::build_draft;
pub use finalize::{FinalizeState, Finalizer};
pub use manager::{OnboardingManager, OnboardingStatus, OnboardingStores};
pub use model::{ProfilePatch, ProfileRecord};
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use session::{FormDelta, HeightInput, OnboardingSession};
pub use state::{Advance, HostContext, Step, StepGraph, StepSequencer};
pub use sync::{SyncEngine, SyncState, SyncStatus, SyncTicket};
