//! Entity table operations
//!
//! One table per [`EntityType`]; the table name always comes from the enum,
//! so no caller-supplied text ever reaches SQL as an identifier.

use super::{format_timestamp, parse_timestamp};
use kgc_common::db::{decode_vector, encode_vector, ConsolidationEnvelope, Entity};
use kgc_common::{EntityAttributes, EntityType, Error, Result};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

const ENTITY_COLUMNS: &str = "id, name, description, attributes, interview_id, \
     mentioned_in_interviews, source_count, consensus_confidence, is_consolidated, \
     has_contradictions, contradiction_details, merged_entity_ids, attribute_agreements, \
     first_mentioned_date, last_mentioned_date, embedding_vector";

/// Query filter for entity listings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    pub min_confidence: Option<f64>,
    pub is_consolidated: Option<bool>,
    pub has_contradictions: Option<bool>,
    pub limit: Option<i64>,
}

/// Decode a row of an entity table
pub fn entity_from_row(entity_type: EntityType, row: &SqliteRow) -> Result<Entity> {
    let attributes: String = row.get("attributes");
    let attributes = match serde_json::from_str::<Value>(&attributes)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let mentioned: String = row.get("mentioned_in_interviews");
    let contradictions: String = row.get("contradiction_details");
    let merged: String = row.get("merged_entity_ids");
    let vector: Option<Vec<u8>> = row.get("embedding_vector");

    let envelope = ConsolidationEnvelope {
        mentioned_in_interviews: serde_json::from_str(&mentioned)?,
        source_count: row.get("source_count"),
        consensus_confidence: row.get("consensus_confidence"),
        is_consolidated: row.get("is_consolidated"),
        has_contradictions: row.get("has_contradictions"),
        contradiction_details: serde_json::from_str(&contradictions)?,
        merged_entity_ids: serde_json::from_str(&merged)?,
        attribute_agreements: row.get("attribute_agreements"),
        first_mentioned_date: parse_timestamp(row.get("first_mentioned_date")),
        last_mentioned_date: parse_timestamp(row.get("last_mentioned_date")),
        embedding_vector: vector.and_then(|b| decode_vector(&b)),
    };

    Ok(Entity {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        attributes: EntityAttributes::from_map(entity_type, attributes)?,
        origin_interview_id: row.get("interview_id"),
        envelope,
    })
}

/// All entities of a type, in insertion order
pub async fn fetch_all(conn: &mut SqliteConnection, entity_type: EntityType) -> Result<Vec<Entity>> {
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM {} ORDER BY rowid",
        entity_type.table_name()
    );
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    rows.iter()
        .map(|row| entity_from_row(entity_type, row))
        .collect()
}

pub async fn fetch_by_id(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    id: &str,
) -> Result<Option<Entity>> {
    let sql = format!(
        "SELECT {ENTITY_COLUMNS} FROM {} WHERE id = ?",
        entity_type.table_name()
    );
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;

    row.map(|row| entity_from_row(entity_type, &row)).transpose()
}

/// Look an id up across every entity table
pub async fn find_by_id_any_type(conn: &mut SqliteConnection, id: &str) -> Result<Option<Entity>> {
    for entity_type in EntityType::ALL {
        if let Some(entity) = fetch_by_id(conn, entity_type, id).await? {
            return Ok(Some(entity));
        }
    }
    Ok(None)
}

pub async fn exists(conn: &mut SqliteConnection, entity_type: EntityType, id: &str) -> Result<bool> {
    let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?", entity_type.table_name());
    let count: i64 = sqlx::query_scalar(&sql)
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count > 0)
}

pub async fn count(conn: &mut SqliteConnection, entity_type: EntityType) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", entity_type.table_name());
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(&mut *conn).await?;
    Ok(count)
}

/// `(entities, consolidated, with contradictions)` for one type
pub async fn type_stats(conn: &mut SqliteConnection, entity_type: EntityType) -> Result<(i64, i64, i64)> {
    let sql = format!(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(is_consolidated), 0),
               COALESCE(SUM(has_contradictions), 0)
        FROM {}
        "#,
        entity_type.table_name()
    );
    let row = sqlx::query(&sql).fetch_one(&mut *conn).await?;
    Ok((row.get(0), row.get(1), row.get(2)))
}

/// Insert a new entity
pub async fn insert(conn: &mut SqliteConnection, entity: &Entity) -> Result<()> {
    let sql = format!(
        r#"
        INSERT INTO {} ({ENTITY_COLUMNS})
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        entity.entity_type().table_name()
    );
    let env = &entity.envelope;

    sqlx::query(&sql)
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(&entity.description)
        .bind(Value::Object(entity.attributes.to_map()).to_string())
        .bind(&entity.origin_interview_id)
        .bind(serde_json::to_string(&env.mentioned_in_interviews)?)
        .bind(env.source_count)
        .bind(env.consensus_confidence)
        .bind(env.is_consolidated)
        .bind(env.has_contradictions)
        .bind(serde_json::to_string(&env.contradiction_details)?)
        .bind(serde_json::to_string(&env.merged_entity_ids)?)
        .bind(env.attribute_agreements)
        .bind(env.first_mentioned_date.as_ref().map(format_timestamp))
        .bind(env.last_mentioned_date.as_ref().map(format_timestamp))
        .bind(env.embedding_vector.as_deref().map(encode_vector))
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Rewrite every mutable column of an existing entity
pub async fn update(conn: &mut SqliteConnection, entity: &Entity) -> Result<()> {
    let sql = format!(
        r#"
        UPDATE {} SET
            name = ?,
            description = ?,
            attributes = ?,
            mentioned_in_interviews = ?,
            source_count = ?,
            consensus_confidence = ?,
            is_consolidated = ?,
            has_contradictions = ?,
            contradiction_details = ?,
            merged_entity_ids = ?,
            attribute_agreements = ?,
            first_mentioned_date = ?,
            last_mentioned_date = ?,
            embedding_vector = ?,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
        entity.entity_type().table_name()
    );
    let env = &entity.envelope;

    let result = sqlx::query(&sql)
        .bind(&entity.name)
        .bind(&entity.description)
        .bind(Value::Object(entity.attributes.to_map()).to_string())
        .bind(serde_json::to_string(&env.mentioned_in_interviews)?)
        .bind(env.source_count)
        .bind(env.consensus_confidence)
        .bind(env.is_consolidated)
        .bind(env.has_contradictions)
        .bind(serde_json::to_string(&env.contradiction_details)?)
        .bind(serde_json::to_string(&env.merged_entity_ids)?)
        .bind(env.attribute_agreements)
        .bind(env.first_mentioned_date.as_ref().map(format_timestamp))
        .bind(env.last_mentioned_date.as_ref().map(format_timestamp))
        .bind(env.embedding_vector.as_deref().map(encode_vector))
        .bind(&entity.id)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "{} {}",
            entity.entity_type(),
            entity.id
        )));
    }

    Ok(())
}

/// Store a recomputed confidence
pub async fn update_confidence(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    id: &str,
    confidence: f64,
) -> Result<()> {
    let sql = format!(
        "UPDATE {} SET consensus_confidence = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        entity_type.table_name()
    );
    sqlx::query(&sql)
        .bind(confidence)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Filtered listing, highest confidence first
pub async fn query(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    filter: &EntityFilter,
) -> Result<Vec<Entity>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "SELECT {ENTITY_COLUMNS} FROM {} WHERE 1 = 1",
        entity_type.table_name()
    ));

    if let Some(min) = filter.min_confidence {
        builder.push(" AND consensus_confidence >= ").push_bind(min);
    }
    if let Some(consolidated) = filter.is_consolidated {
        builder.push(" AND is_consolidated = ").push_bind(consolidated);
    }
    if let Some(contradictions) = filter.has_contradictions {
        builder.push(" AND has_contradictions = ").push_bind(contradictions);
    }
    builder.push(" ORDER BY consensus_confidence DESC, rowid");
    if let Some(limit) = filter.limit {
        builder.push(" LIMIT ").push_bind(limit);
    }

    let rows = builder.build().fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|row| entity_from_row(entity_type, row))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgc_common::db::{init_memory_database, Contradiction};
    use serde_json::json;

    fn system(id: &str, name: &str) -> Entity {
        let mut attrs = Map::new();
        attrs.insert("vendor".into(), json!("Microsoft"));
        attrs.insert("license_count".into(), json!(40));
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            description: "Hojas de cálculo".to_string(),
            attributes: EntityAttributes::from_map(EntityType::System, attrs).unwrap(),
            origin_interview_id: "int-1".to_string(),
            envelope: ConsolidationEnvelope::single_source("int-1", Some(chrono::Utc::now())),
        }
    }

    #[tokio::test]
    async fn test_insert_and_fetch_preserves_envelope() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let mut entity = system("s1", "Excel");
        entity.envelope.contradiction_details.push(Contradiction {
            attribute: "vendor".into(),
            values: vec![json!("Microsoft"), json!("Google")],
            similarity_score: 0.1,
            sources: vec!["int-1".into(), "int-2".into()],
        });
        entity.envelope.has_contradictions = true;
        entity.envelope.embedding_vector = Some(vec![0.5, 0.25]);
        insert(&mut conn, &entity).await.unwrap();

        let loaded = fetch_by_id(&mut conn, EntityType::System, "s1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.name, "Excel");
        assert_eq!(loaded.attributes, entity.attributes);
        assert_eq!(loaded.envelope.contradiction_details, entity.envelope.contradiction_details);
        assert_eq!(loaded.envelope.embedding_vector, Some(vec![0.5, 0.25]));
        assert!(loaded.envelope.first_mentioned_date.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_entity_is_not_found() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let result = update(&mut conn, &system("ghost", "Excel")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_query_filters() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        let mut high = system("s1", "Excel");
        high.envelope.consensus_confidence = 0.9;
        high.envelope.is_consolidated = true;
        let mut low = system("s2", "SAP");
        low.envelope.consensus_confidence = 0.2;
        insert(&mut conn, &low).await.unwrap();
        insert(&mut conn, &high).await.unwrap();

        let filter = EntityFilter {
            min_confidence: Some(0.5),
            ..Default::default()
        };
        let found = query(&mut conn, EntityType::System, &filter).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "s1");

        let filter = EntityFilter {
            is_consolidated: Some(false),
            ..Default::default()
        };
        let found = query(&mut conn, EntityType::System, &filter).await.unwrap();
        assert_eq!(found[0].id, "s2");

        let all = fetch_all(&mut conn, EntityType::System).await.unwrap();
        let ids: Vec<_> = all.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["s2", "s1"]);
        assert_eq!(count(&mut conn, EntityType::System).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_find_by_id_any_type() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        insert(&mut conn, &system("s1", "Excel")).await.unwrap();

        let found = find_by_id_any_type(&mut conn, "s1").await.unwrap().unwrap();
        assert_eq!(found.entity_type(), EntityType::System);
        assert!(find_by_id_any_type(&mut conn, "nope").await.unwrap().is_none());
    }
}
