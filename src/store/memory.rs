//! In-process store implementations.
//!
//! `MemoryProfileCache` is the app's in-memory keyed profile cache. The other
//! types back the demo and tests when no database is wanted.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::onboarding::model::{LegalDocument, ProfilePatch, ProfileRecord, WeightLogEntry};
use crate::store::traits::{LegalDocumentStore, ProfileCache, ProfileStore, WeightLogStore};

/// Profiles held in a map.
#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<Uuid, ProfileRecord>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn get_profile(&self, profile_id: Uuid) -> Result<Option<ProfileRecord>, StoreError> {
        Ok(self.profiles.read().await.get(&profile_id).cloned())
    }

    async fn update_profile(
        &self,
        profile_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, StoreError> {
        let mut profiles = self.profiles.write().await;
        let record = profiles
            .entry(profile_id)
            .or_insert_with(|| ProfileRecord::new(profile_id));
        patch.apply_to(record);
        Ok(record.clone())
    }
}

/// Weight log that can also record the weight on a profile store, as the
/// database backend does.
#[derive(Default)]
pub struct InMemoryWeightLog {
    entries: RwLock<Vec<WeightLogEntry>>,
    profiles: Option<Arc<InMemoryProfileStore>>,
}

impl InMemoryWeightLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror each weigh-in onto the given profile store.
    pub fn with_profiles(profiles: Arc<InMemoryProfileStore>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            profiles: Some(profiles),
        }
    }

    pub async fn entries(&self) -> Vec<WeightLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl WeightLogStore for InMemoryWeightLog {
    async fn insert_weight_log(&self, entry: &WeightLogEntry) -> Result<(), StoreError> {
        self.entries.write().await.push(entry.clone());
        if let Some(profiles) = &self.profiles {
            let patch = ProfilePatch {
                weight_lb: Some(entry.weight_lb),
                body_fat_percent: entry.body_fat_percent,
                weight_unit: Some(entry.weight_unit),
                ..Default::default()
            };
            profiles.update_profile(entry.profile_id, &patch).await?;
        }
        Ok(())
    }
}

/// Legal documents and acceptances held in memory.
#[derive(Default)]
pub struct InMemoryLegalDocuments {
    active: RwLock<Vec<LegalDocument>>,
    accepted: RwLock<HashMap<Uuid, Vec<LegalDocument>>>,
}

impl InMemoryLegalDocuments {
    pub fn new(active: Vec<LegalDocument>) -> Self {
        Self {
            active: RwLock::new(active),
            accepted: RwLock::new(HashMap::new()),
        }
    }

    pub async fn accepted_by(&self, profile_id: Uuid) -> Vec<LegalDocument> {
        self.accepted
            .read()
            .await
            .get(&profile_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LegalDocumentStore for InMemoryLegalDocuments {
    async fn fetch_active_documents(&self) -> Result<Vec<LegalDocument>, StoreError> {
        Ok(self.active.read().await.clone())
    }

    async fn accept_documents(
        &self,
        profile_id: Uuid,
        documents: &[LegalDocument],
    ) -> Result<(), StoreError> {
        let mut accepted = self.accepted.write().await;
        let list = accepted.entry(profile_id).or_default();
        for doc in documents {
            if !list.contains(doc) {
                list.push(doc.clone());
            }
        }
        Ok(())
    }
}

/// The in-memory keyed profile cache.
#[derive(Default)]
pub struct MemoryProfileCache {
    profiles: RwLock<HashMap<Uuid, ProfileRecord>>,
}

impl MemoryProfileCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileCache for MemoryProfileCache {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_profile(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        self.profiles.write().await.insert(record.id, record.clone());
        Ok(())
    }

    async fn get_cached_profile(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<ProfileRecord>, StoreError> {
        Ok(self.profiles.read().await.get(&profile_id).cloned())
    }
}
