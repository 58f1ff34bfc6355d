//! Derived pattern records (replaced wholesale on every run)

use super::format_timestamp;
use chrono::Utc;
use kgc_common::db::Pattern;
use kgc_common::{EntityType, Result};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

/// Replace the stored pattern set; returns the number written
pub async fn replace_all(conn: &mut SqliteConnection, patterns: &[Pattern]) -> Result<usize> {
    sqlx::query("DELETE FROM patterns").execute(&mut *conn).await?;

    let detected_at = format_timestamp(&Utc::now());
    for pattern in patterns {
        sqlx::query(
            r#"
            INSERT INTO patterns (
                pattern_type, entity_type, entity_id, entity_name, pattern_frequency,
                source_count, high_priority, description, detected_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&pattern.pattern_type)
        .bind(pattern.entity_type.as_str())
        .bind(&pattern.entity_id)
        .bind(&pattern.entity_name)
        .bind(pattern.pattern_frequency)
        .bind(pattern.source_count)
        .bind(pattern.high_priority)
        .bind(&pattern.description)
        .bind(&detected_at)
        .execute(&mut *conn)
        .await?;
    }

    Ok(patterns.len())
}

/// Stored patterns, most frequent first
pub async fn fetch(
    conn: &mut SqliteConnection,
    entity_type: Option<EntityType>,
    high_priority_only: bool,
) -> Result<Vec<Pattern>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT pattern_type, entity_type, entity_id, entity_name, pattern_frequency, \
         source_count, high_priority, description FROM patterns WHERE 1 = 1",
    );
    if let Some(entity_type) = entity_type {
        builder.push(" AND entity_type = ").push_bind(entity_type.as_str());
    }
    if high_priority_only {
        builder.push(" AND high_priority = 1");
    }
    builder.push(" ORDER BY pattern_frequency DESC, id");

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| {
            let entity_type: String = row.get("entity_type");
            Ok(Pattern {
                pattern_type: row.get("pattern_type"),
                entity_type: entity_type.parse()?,
                entity_id: row.get("entity_id"),
                entity_name: row.get("entity_name"),
                pattern_frequency: row.get("pattern_frequency"),
                source_count: row.get("source_count"),
                high_priority: row.get("high_priority"),
                description: row.get("description"),
            })
        })
        .collect()
}
