//! Consolidation audit trail
//!
//! Append-only: rows are written inside the consolidation transaction of the
//! merge they document and are never updated or deleted.

use super::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use kgc_common::db::AuditRecord;
use kgc_common::{EntityType, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

/// Merge decision to be recorded
#[derive(Debug, Clone)]
pub struct MergeAudit<'a> {
    pub entity_type: EntityType,
    pub interview_id: &'a str,
    pub merged_entity_ids: &'a [String],
    pub resulting_entity_id: &'a str,
    pub similarity_score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Append a merge record; returns its id
pub async fn record_merge(conn: &mut SqliteConnection, audit: &MergeAudit<'_>) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO consolidation_audit (
            entity_type, interview_id, merged_entity_ids, resulting_entity_id,
            similarity_score, consolidation_timestamp
        ) VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(audit.entity_type.as_str())
    .bind(audit.interview_id)
    .bind(serde_json::to_string(audit.merged_entity_ids)?)
    .bind(audit.resulting_entity_id)
    .bind(audit.similarity_score)
    .bind(format_timestamp(&audit.timestamp))
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditRecord> {
    let entity_type: String = row.get("entity_type");
    let merged: String = row.get("merged_entity_ids");

    Ok(AuditRecord {
        id: row.get("id"),
        entity_type: entity_type.parse()?,
        interview_id: row.get("interview_id"),
        merged_entity_ids: serde_json::from_str(&merged)?,
        resulting_entity_id: row.get("resulting_entity_id"),
        similarity_score: row.get("similarity_score"),
        consolidation_timestamp: parse_timestamp(Some(row.get("consolidation_timestamp")))
            .unwrap_or_default(),
        rollback_timestamp: parse_timestamp(row.get("rollback_timestamp")),
        rollback_reason: row.get("rollback_reason"),
    })
}

/// Every record where `entity_id` survived a merge or was absorbed by one
pub async fn history_for_entity(conn: &mut SqliteConnection, entity_id: &str) -> Result<Vec<AuditRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, entity_type, interview_id, merged_entity_ids, resulting_entity_id,
               similarity_score, consolidation_timestamp, rollback_timestamp, rollback_reason
        FROM consolidation_audit
        WHERE resulting_entity_id = ?
           OR EXISTS (SELECT 1 FROM json_each(consolidation_audit.merged_entity_ids) WHERE value = ?)
        ORDER BY id
        "#,
    )
    .bind(entity_id)
    .bind(entity_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(audit_from_row).collect()
}

/// Records written for one interview
pub async fn records_for_interview(conn: &mut SqliteConnection, interview_id: &str) -> Result<Vec<AuditRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT id, entity_type, interview_id, merged_entity_ids, resulting_entity_id,
               similarity_score, consolidation_timestamp, rollback_timestamp, rollback_reason
        FROM consolidation_audit
        WHERE interview_id = ?
        ORDER BY id
        "#,
    )
    .bind(interview_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.iter().map(audit_from_row).collect()
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM consolidation_audit")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}
