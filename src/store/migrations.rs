//! Schema for the onboarding tables.
//!
//! Applied versions are recorded in `_migrations`; opening a database only
//! runs the versions above the recorded maximum.

use libsql::Connection;

use crate::error::StoreError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Ordered by version. Never edit a shipped entry.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS profiles (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                onboarding_complete INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_profiles_complete ON profiles(onboarding_complete);

            CREATE TABLE IF NOT EXISTS weight_logs (
                id TEXT PRIMARY KEY,
                profile_id TEXT NOT NULL,
                weighed_at TEXT NOT NULL,
                weight_lb REAL NOT NULL,
                body_fat_percent REAL,
                weight_unit TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_weight_logs_profile ON weight_logs(profile_id, weighed_at);
        "#,
    },
    Migration {
        version: 2,
        name: "legal_documents",
        sql: r#"
            CREATE TABLE IF NOT EXISTS legal_documents (
                doc_type TEXT NOT NULL,
                version TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                published_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (doc_type, version)
            );
            CREATE INDEX IF NOT EXISTS idx_legal_documents_active ON legal_documents(active);

            CREATE TABLE IF NOT EXISTS legal_acceptances (
                profile_id TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                version TEXT NOT NULL,
                accepted_at TEXT NOT NULL,
                PRIMARY KEY (profile_id, doc_type, version)
            );
        "#,
    },
    Migration {
        version: 3,
        name: "settings",
        sql: r#"
            CREATE TABLE IF NOT EXISTS settings (
                user_id TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, key)
            );
        "#,
    },
];

/// Apply all pending migrations.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    let pending = MIGRATIONS.iter().filter(|m| m.version > current_version);
    for migration in pending {
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying schema version"
        );
        conn.execute_batch(migration.sql).await.map_err(|e| {
            StoreError::Migration(format!("V{} {}: {e}", migration.version, migration.name))
        })?;
        record_version(conn, migration.version, migration.name).await?;
    }
    Ok(())
}

/// Highest recorded version; 0 for a fresh database.
async fn get_current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| StoreError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            StoreError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

async fn record_version(conn: &Connection, version: i64, name: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| StoreError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
