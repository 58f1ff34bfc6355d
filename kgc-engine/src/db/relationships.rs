//! Relationship edges
//!
//! Edges are unique per `(source_id, target_id, relationship_type)`; writes go
//! through [`upsert`] so repeated discovery passes strengthen existing edges
//! instead of duplicating them.

use kgc_common::config::StrengthPolicy;
use kgc_common::db::Relationship;
use kgc_common::{EntityType, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Strengthened,
    Unchanged,
}

/// Edge query filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipFilter {
    pub source_id: Option<String>,
    pub target_id: Option<String>,
    /// Matches either endpoint
    pub entity_id: Option<String>,
    pub relationship_type: Option<String>,
    pub min_strength: Option<f64>,
}

fn relationship_from_row(row: &SqliteRow) -> Result<Relationship> {
    let source_type: String = row.get("source_type");
    let target_type: String = row.get("target_type");
    let interviews: String = row.get("mentioned_in_interviews");

    Ok(Relationship {
        id: row.get("id"),
        source_id: row.get("source_id"),
        source_type: source_type.parse::<EntityType>()?,
        target_id: row.get("target_id"),
        target_type: target_type.parse::<EntityType>()?,
        relationship_type: row.get("relationship_type"),
        strength: row.get("strength"),
        mentioned_in_interviews: serde_json::from_str(&interviews)?,
    })
}

/// Combine an existing strength with a newly observed one
pub fn combine_strength(policy: StrengthPolicy, existing: f64, observed: f64) -> f64 {
    let combined = match policy {
        StrengthPolicy::Max => existing.max(observed),
        StrengthPolicy::Average => (existing + observed) / 2.0,
    };
    combined.clamp(0.0, 1.0)
}

/// Create the edge, or merge strength and interviews into the existing one
pub async fn upsert(
    conn: &mut SqliteConnection,
    relationship: &Relationship,
    policy: StrengthPolicy,
) -> Result<UpsertOutcome> {
    let existing = sqlx::query(
        r#"
        SELECT id, source_id, source_type, target_id, target_type, relationship_type,
               strength, mentioned_in_interviews
        FROM relationships
        WHERE source_id = ? AND target_id = ? AND relationship_type = ?
        "#,
    )
    .bind(&relationship.source_id)
    .bind(&relationship.target_id)
    .bind(&relationship.relationship_type)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = existing else {
        sqlx::query(
            r#"
            INSERT INTO relationships (
                id, source_id, source_type, target_id, target_type,
                relationship_type, strength, mentioned_in_interviews
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&relationship.id)
        .bind(&relationship.source_id)
        .bind(relationship.source_type.as_str())
        .bind(&relationship.target_id)
        .bind(relationship.target_type.as_str())
        .bind(&relationship.relationship_type)
        .bind(relationship.strength.clamp(0.0, 1.0))
        .bind(serde_json::to_string(&relationship.mentioned_in_interviews)?)
        .execute(&mut *conn)
        .await?;
        return Ok(UpsertOutcome::Created);
    };

    let current = relationship_from_row(&row)?;
    let strength = combine_strength(policy, current.strength, relationship.strength);

    let mut interviews = current.mentioned_in_interviews.clone();
    for id in &relationship.mentioned_in_interviews {
        if !interviews.contains(id) {
            interviews.push(id.clone());
        }
    }

    if strength == current.strength && interviews == current.mentioned_in_interviews {
        return Ok(UpsertOutcome::Unchanged);
    }

    sqlx::query(
        r#"
        UPDATE relationships
        SET strength = ?, mentioned_in_interviews = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(strength)
    .bind(serde_json::to_string(&interviews)?)
    .bind(&current.id)
    .execute(&mut *conn)
    .await?;

    Ok(UpsertOutcome::Strengthened)
}

/// Edges matching `filter`, strongest first
pub async fn fetch(conn: &mut SqliteConnection, filter: &RelationshipFilter) -> Result<Vec<Relationship>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT id, source_id, source_type, target_id, target_type, relationship_type, \
         strength, mentioned_in_interviews FROM relationships WHERE 1 = 1",
    );

    if let Some(source_id) = &filter.source_id {
        builder.push(" AND source_id = ").push_bind(source_id.clone());
    }
    if let Some(target_id) = &filter.target_id {
        builder.push(" AND target_id = ").push_bind(target_id.clone());
    }
    if let Some(entity_id) = &filter.entity_id {
        builder
            .push(" AND (source_id = ")
            .push_bind(entity_id.clone())
            .push(" OR target_id = ")
            .push_bind(entity_id.clone())
            .push(")");
    }
    if let Some(kind) = &filter.relationship_type {
        builder.push(" AND relationship_type = ").push_bind(kind.clone());
    }
    if let Some(min) = filter.min_strength {
        builder.push(" AND strength >= ").push_bind(min);
    }
    builder.push(" ORDER BY strength DESC, rowid");

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter().map(relationship_from_row).collect()
}

pub async fn count(conn: &mut SqliteConnection) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relationships")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgc_common::db::init_memory_database;

    fn edge(strength: f64, interviews: &[&str]) -> Relationship {
        Relationship {
            id: "r1".into(),
            source_id: "sys-1".into(),
            source_type: EntityType::System,
            target_id: "pp-1".into(),
            target_type: EntityType::PainPoint,
            relationship_type: "causes".into(),
            strength,
            mentioned_in_interviews: interviews.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_strength_policies() {
        assert_eq!(combine_strength(StrengthPolicy::Max, 0.6, 0.8), 0.8);
        assert_eq!(combine_strength(StrengthPolicy::Max, 0.9, 0.8), 0.9);
        assert!((combine_strength(StrengthPolicy::Average, 0.6, 0.8) - 0.7).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_upsert_does_not_duplicate() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let first = upsert(&mut conn, &edge(0.8, &["int-1"]), StrengthPolicy::Max).await.unwrap();
        let again = upsert(&mut conn, &edge(0.8, &["int-1"]), StrengthPolicy::Max).await.unwrap();
        let more = upsert(&mut conn, &edge(0.8, &["int-2"]), StrengthPolicy::Max).await.unwrap();

        assert_eq!(first, UpsertOutcome::Created);
        assert_eq!(again, UpsertOutcome::Unchanged);
        assert_eq!(more, UpsertOutcome::Strengthened);
        assert_eq!(count(&mut conn).await.unwrap(), 1);

        let edges = fetch(&mut conn, &RelationshipFilter::default()).await.unwrap();
        assert_eq!(edges[0].mentioned_in_interviews, vec!["int-1", "int-2"]);
        assert_eq!(edges[0].source_type, EntityType::System);
    }

    #[tokio::test]
    async fn test_fetch_by_endpoint() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        upsert(&mut conn, &edge(0.8, &["int-1"]), StrengthPolicy::Max).await.unwrap();

        let filter = RelationshipFilter {
            entity_id: Some("pp-1".into()),
            ..Default::default()
        };
        assert_eq!(fetch(&mut conn, &filter).await.unwrap().len(), 1);

        let filter = RelationshipFilter {
            source_id: Some("pp-1".into()),
            ..Default::default()
        };
        assert!(fetch(&mut conn, &filter).await.unwrap().is_empty());
    }
}
