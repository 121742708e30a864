//! Error types for the onboarding engine.

use std::collections::BTreeMap;
use std::time::Duration;

use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Flush error: {0}")]
    Flush(#[from] FlushError),

    #[error("Finalize error: {0}")]
    Finalize(#[from] FinalizeError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Persistence errors raised by the profile, weight-log, legal and cache stores.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// A localizable validation failure.
///
/// Carries an i18n key plus interpolation parameters, never display text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{key}")]
pub struct ValidationError {
    pub key: String,
    pub params: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            params: BTreeMap::new(),
        }
    }

    /// Attach an interpolation parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }
}

/// A background save that did not reach the profile store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Background save '{tag}' (generation {generation}) failed: {source}")]
pub struct SyncError {
    pub tag: String,
    pub generation: u64,
    #[source]
    pub source: StoreError,
}

/// A synchronous flush that could not be confirmed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Failed to flush draft for profile {profile_id}: {source}")]
pub struct FlushError {
    pub profile_id: Uuid,
    #[source]
    pub source: StoreError,
}

/// Finalization failures. None of these mark the profile complete.
#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("Finalization already in flight for profile {profile_id}")]
    AlreadyInFlight { profile_id: Uuid },

    #[error("Onboarding already committed for profile {profile_id}")]
    AlreadyCommitted { profile_id: Uuid },

    #[error("Session incomplete: {0}")]
    Incomplete(ValidationError),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Failed to record legal acceptances: {0}")]
    Legal(StoreError),

    #[error(transparent)]
    Flush(#[from] FlushError),

    #[error("Profile commit timed out after {timeout:?}")]
    CommitTimeout { timeout: Duration },

    #[error("Profile commit failed: {0}")]
    Commit(StoreError),
}

impl FinalizeError {
    /// Whether the user can press "finish" again from the same step.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::AlreadyCommitted { .. })
    }

    /// i18n key the screen layer shows for this failure.
    pub fn i18n_key(&self) -> &str {
        match self {
            Self::AlreadyInFlight { .. } => "onboarding.errors.finish_in_progress",
            Self::AlreadyCommitted { .. } => "onboarding.errors.already_complete",
            Self::Incomplete(err) => &err.key,
            Self::Integrity(_) => "onboarding.errors.legal_documents_unavailable",
            Self::Legal(_) => "onboarding.errors.legal_accept_failed",
            Self::Flush(_) => "onboarding.errors.save_failed",
            Self::CommitTimeout { .. } => "onboarding.errors.service_waking_up",
            Self::Commit(_) => "onboarding.errors.finish_failed",
        }
    }
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;
