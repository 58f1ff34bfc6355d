//! Database initialization
//!
//! Creates the consolidation store: one table per entity type, each carrying
//! the full consolidation envelope, plus the cross-cutting tables
//! (interviews, relationships, consolidation_audit, patterns, embedding_cache).
//! All statements are `IF NOT EXISTS`, so initialization is idempotent.

use crate::entity_type::EntityType;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Current schema version
pub const SCHEMA_VERSION: i64 = 1;

/// Open (or create) the store at `db_path` and ensure the schema exists
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(5000));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory store on a single connection (every pooled connection to
/// `sqlite::memory:` would otherwise see its own empty database)
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table and index if missing
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;

    for entity_type in EntityType::ALL {
        create_entity_table(pool, entity_type).await?;
    }

    create_interviews_table(pool).await?;
    create_relationships_table(pool).await?;
    create_audit_table(pool).await?;
    create_patterns_table(pool).await?;
    create_embedding_cache_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Table name comes from the closed enum, never from caller text
async fn create_entity_table(pool: &SqlitePool, entity_type: EntityType) -> Result<()> {
    let table = entity_type.table_name();

    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            attributes TEXT NOT NULL DEFAULT '{{}}',
            interview_id TEXT NOT NULL,
            mentioned_in_interviews TEXT NOT NULL DEFAULT '[]',
            source_count INTEGER NOT NULL DEFAULT 1 CHECK (source_count >= 1),
            consensus_confidence REAL NOT NULL DEFAULT 0.0
                CHECK (consensus_confidence >= 0.0 AND consensus_confidence <= 1.0),
            is_consolidated INTEGER NOT NULL DEFAULT 0,
            has_contradictions INTEGER NOT NULL DEFAULT 0,
            contradiction_details TEXT NOT NULL DEFAULT '[]',
            merged_entity_ids TEXT NOT NULL DEFAULT '[]',
            attribute_agreements INTEGER NOT NULL DEFAULT 0,
            first_mentioned_date TEXT,
            last_mentioned_date TEXT,
            embedding_vector BLOB,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (name <> '' OR description <> '')
        )
        "#
    );
    sqlx::query(&ddl).execute(pool).await?;

    let index = format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_confidence ON {table} (consensus_confidence)"
    );
    sqlx::query(&index).execute(pool).await?;

    Ok(())
}

async fn create_interviews_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS interviews (
            interview_id TEXT PRIMARY KEY,
            interview_date TEXT,
            consolidated_at TEXT NOT NULL,
            entity_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_relationships_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relationships (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            target_id TEXT NOT NULL,
            target_type TEXT NOT NULL,
            relationship_type TEXT NOT NULL,
            strength REAL NOT NULL CHECK (strength >= 0.0 AND strength <= 1.0),
            mentioned_in_interviews TEXT NOT NULL DEFAULT '[]',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (source_id, target_id, relationship_type)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships (target_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_audit_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consolidation_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type TEXT NOT NULL,
            interview_id TEXT NOT NULL,
            merged_entity_ids TEXT NOT NULL,
            resulting_entity_id TEXT NOT NULL,
            similarity_score REAL NOT NULL,
            consolidation_timestamp TEXT NOT NULL,
            rollback_timestamp TEXT,
            rollback_reason TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_resulting ON consolidation_audit (resulting_entity_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_patterns_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS patterns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            pattern_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            entity_name TEXT NOT NULL DEFAULT '',
            pattern_frequency REAL NOT NULL,
            source_count INTEGER NOT NULL,
            high_priority INTEGER NOT NULL DEFAULT 0,
            description TEXT NOT NULL DEFAULT '',
            detected_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_embedding_cache_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            text_key TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            vector BLOB NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
