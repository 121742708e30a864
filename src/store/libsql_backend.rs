//! libSQL backend: every store trait on one async connection.
//!
//! Profiles are stored as a JSON document with `onboarding_complete`
//! denormalised into its own column. Supports local file and in-memory
//! databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::onboarding::model::{
    LegalDocument, ProfilePatch, ProfileRecord, WeightLogEntry, settings_keys,
};
use crate::store::migrations;
use crate::store::traits::{LegalDocumentStore, ProfileCache, ProfileStore, WeightLogStore};

/// Profiles, weight logs, legal records and the durable profile cache in
/// one libSQL database, reached through a single shared connection.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    /// Serialises profile read-merge-write cycles.
    profile_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open the database file at `path`, creating it and its directory if needed.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Throwaway in-memory database.
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            profile_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Publish a legal document version, retiring older versions of the
    /// same type.
    pub async fn publish_legal_document(&self, doc: &LegalDocument) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "UPDATE legal_documents SET active = 0 WHERE doc_type = ?1 AND version != ?2",
            params![doc.doc_type.as_str(), doc.version.as_str()],
        )
        .await
        .map_err(|e| StoreError::Query(format!("publish_legal_document: {e}")))?;
        conn.execute(
            "INSERT INTO legal_documents (doc_type, version, active, published_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT (doc_type, version) DO UPDATE SET active = 1",
            params![doc.doc_type.as_str(), doc.version.as_str(), Utc::now().to_rfc3339()],
        )
        .await
        .map_err(|e| StoreError::Query(format!("publish_legal_document: {e}")))?;
        Ok(())
    }

    /// Weight history for a profile, oldest first.
    pub async fn list_weight_logs(
        &self,
        profile_id: Uuid,
    ) -> Result<Vec<WeightLogEntry>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT weighed_at, weight_lb, body_fat_percent, weight_unit
                 FROM weight_logs WHERE profile_id = ?1 ORDER BY weighed_at",
                params![profile_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_weight_logs: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("list_weight_logs: {e}")))?
        {
            let weighed_at: String = row
                .get(0)
                .map_err(|e| StoreError::Query(format!("list_weight_logs: {e}")))?;
            let weight_lb: f64 = row
                .get(1)
                .map_err(|e| StoreError::Query(format!("list_weight_logs: {e}")))?;
            let body_fat_percent: Option<f64> = row.get(2).ok();
            let unit: String = row.get(3).unwrap_or_else(|_| "lb".to_string());
            entries.push(WeightLogEntry {
                profile_id,
                weighed_at: parse_datetime(&weighed_at),
                weight_lb,
                body_fat_percent,
                weight_unit: serde_json::from_value(serde_json::Value::String(unit))
                    .map_err(|e| StoreError::Serialization(e.to_string()))?,
            });
        }
        Ok(entries)
    }

    async fn load_profile(&self, profile_id: Uuid) -> Result<Option<ProfileRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT data FROM profiles WHERE id = ?1",
                params![profile_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let data: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("get_profile: {e}")))?;
                let record = serde_json::from_str(&data)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_profile: {e}"))),
        }
    }

    async fn save_profile(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        let data =
            serde_json::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO profiles (id, data, onboarding_complete, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (id) DO UPDATE SET data = ?2, onboarding_complete = ?3, updated_at = ?4",
                params![
                    record.id.to_string(),
                    data,
                    record.onboarding_complete as i64,
                    record.updated_at.to_rfc3339()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_profile: {e}")))?;
        Ok(())
    }
}

/// Timestamps are written as RFC 3339; SQLite's `datetime('now')` form is also accepted.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_real(v: Option<f64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v),
        None => libsql::Value::Null,
    }
}

#[async_trait]
impl ProfileStore for LibSqlBackend {
    async fn get_profile(&self, profile_id: Uuid) -> Result<Option<ProfileRecord>, StoreError> {
        self.load_profile(profile_id).await
    }

    async fn update_profile(
        &self,
        profile_id: Uuid,
        patch: &ProfilePatch,
    ) -> Result<ProfileRecord, StoreError> {
        let _guard = self.profile_lock.lock().await;
        let mut record = self
            .load_profile(profile_id)
            .await?
            .unwrap_or_else(|| ProfileRecord::new(profile_id));
        patch.apply_to(&mut record);
        self.save_profile(&record).await?;
        debug!(profile_id = %profile_id, fields = ?patch.field_names(), "Profile updated");
        Ok(record)
    }
}

#[async_trait]
impl WeightLogStore for LibSqlBackend {
    async fn insert_weight_log(&self, entry: &WeightLogEntry) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO weight_logs (id, profile_id, weighed_at, weight_lb, body_fat_percent, weight_unit)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    Uuid::new_v4().to_string(),
                    entry.profile_id.to_string(),
                    entry.weighed_at.to_rfc3339(),
                    entry.weight_lb,
                    opt_real(entry.body_fat_percent),
                    entry.weight_unit.to_string()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_weight_log: {e}")))?;

        // The newest weigh-in is the profile's current weight.
        let patch = ProfilePatch {
            weight_lb: Some(entry.weight_lb),
            body_fat_percent: entry.body_fat_percent,
            weight_unit: Some(entry.weight_unit),
            ..Default::default()
        };
        self.update_profile(entry.profile_id, &patch).await?;
        Ok(())
    }
}

#[async_trait]
impl LegalDocumentStore for LibSqlBackend {
    async fn fetch_active_documents(&self) -> Result<Vec<LegalDocument>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT doc_type, version FROM legal_documents WHERE active = 1 ORDER BY doc_type",
                (),
            )
            .await
            .map_err(|e| StoreError::Query(format!("fetch_active_documents: {e}")))?;

        let mut docs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("fetch_active_documents: {e}")))?
        {
            docs.push(LegalDocument {
                doc_type: row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("fetch_active_documents: {e}")))?,
                version: row
                    .get(1)
                    .map_err(|e| StoreError::Query(format!("fetch_active_documents: {e}")))?,
            });
        }
        Ok(docs)
    }

    async fn accept_documents(
        &self,
        profile_id: Uuid,
        documents: &[LegalDocument],
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        for doc in documents {
            self.conn()
                .execute(
                    "INSERT OR IGNORE INTO legal_acceptances (profile_id, doc_type, version, accepted_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        profile_id.to_string(),
                        doc.doc_type.as_str(),
                        doc.version.as_str(),
                        now.as_str()
                    ],
                )
                .await
                .map_err(|e| StoreError::Query(format!("accept_documents: {e}")))?;
        }
        Ok(())
    }
}

/// The durable key-value cache, keyed by profile ID in the settings table.
#[async_trait]
impl ProfileCache for LibSqlBackend {
    fn name(&self) -> &str {
        "settings"
    }

    async fn put_profile(&self, record: &ProfileRecord) -> Result<(), StoreError> {
        let value =
            serde_json::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.conn()
            .execute(
                "INSERT INTO settings (user_id, key, value, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, key) DO UPDATE SET value = ?3, updated_at = ?4",
                params![
                    record.id.to_string(),
                    settings_keys::PROFILE_CACHE,
                    value,
                    Utc::now().to_rfc3339()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("put_profile: {e}")))?;
        Ok(())
    }

    async fn get_cached_profile(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<ProfileRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT value FROM settings WHERE user_id = ?1 AND key = ?2",
                params![profile_id.to_string(), settings_keys::PROFILE_CACHE],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_cached_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("get_cached_profile: {e}")))?;
                serde_json::from_str(&value)
                    .map(Some)
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_cached_profile: {e}"))),
        }
    }
}
