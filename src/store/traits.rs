//! Persistence traits the onboarding engine talks to.
//!
//! The engine only depends on these call contracts; backends live in
//! `memory` (in-process) and `libsql_backend` (durable).

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::onboarding::model::{LegalDocument, ProfilePatch, ProfileRecord, WeightLogEntry};

/// The remote profile table.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Fetch a profile by ID.
    async fn get_profile(&self, profile_id: Uuid) -> Result<Option<ProfileRecord>, StoreError>;

    /// Merge a sparse patch into the profile and return the updated row.
    ///
    /// Fields absent from the patch must be left untouched. Creates the row
    /// if it does not exist yet.
    async fn update_profile(
        &self,
        profile_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, StoreError>;
}

/// Weight history.
#[async_trait]
pub trait WeightLogStore: Send + Sync {
    /// Record a weigh-in.
    async fn insert_weight_log(&self, entry: &WeightLogEntry) -> Result<(), StoreError>;
}

/// Legal documents and their acceptances.
#[async_trait]
pub trait LegalDocumentStore: Send + Sync {
    /// The currently active document versions.
    async fn fetch_active_documents(&self) -> Result<Vec<LegalDocument>, StoreError>;

    /// Record that the profile accepted every listed document.
    async fn accept_documents(
        &self,
        profile_id: Uuid,
        documents: &[LegalDocument],
    ) -> Result<(), StoreError>;
}

/// A client-side cache other parts of the app read the profile from.
#[async_trait]
pub trait ProfileCache: Send + Sync {
    /// Cache name for logging.
    fn name(&self) -> &str;

    async fn put_profile(&self, record: &ProfileRecord) -> Result<(), StoreError>;

    async fn get_cached_profile(&self, profile_id: Uuid)
    -> Result<Option<ProfileRecord>, StoreError>;
}
