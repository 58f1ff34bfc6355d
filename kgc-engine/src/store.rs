//! Read-side query interface
//!
//! Entity-type arguments arriving as text (CLI, downstream consumers) are
//! parsed against the [`EntityType`] whitelist here, before any query is built.

use crate::db::entities::EntityFilter;
use crate::db::relationships::RelationshipFilter;
use crate::db::{audit, embeddings, entities, interviews, patterns, relationships};
use kgc_common::db::{AuditRecord, Entity, InterviewRecord, Pattern, Relationship};
use kgc_common::{EntityType, Result};
use serde::Serialize;
use sqlx::SqlitePool;

/// Entity counts for one type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypeStats {
    pub entity_type: EntityType,
    pub entities: i64,
    pub consolidated: i64,
    pub with_contradictions: i64,
}

/// Store-wide counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub interviews: i64,
    pub entities: i64,
    pub relationships: i64,
    pub patterns: i64,
    pub audit_records: i64,
    pub cached_embeddings: i64,
    pub per_type: Vec<TypeStats>,
}

#[derive(Clone)]
pub struct KnowledgeStore {
    pool: SqlitePool,
}

impl KnowledgeStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Entities of one type, highest confidence first
    pub async fn entities(&self, entity_type: EntityType, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let mut conn = self.pool.acquire().await?;
        entities::query(&mut conn, entity_type, filter).await
    }

    /// Same as [`Self::entities`] with a textual type identifier
    pub async fn entities_by_name(&self, entity_type: &str, filter: &EntityFilter) -> Result<Vec<Entity>> {
        let entity_type: EntityType = entity_type.parse()?;
        self.entities(entity_type, filter).await
    }

    /// Entity by id, whatever its type
    pub async fn entity(&self, id: &str) -> Result<Option<Entity>> {
        let mut conn = self.pool.acquire().await?;
        entities::find_by_id_any_type(&mut conn, id).await
    }

    pub async fn relationships(&self, filter: &RelationshipFilter) -> Result<Vec<Relationship>> {
        let mut conn = self.pool.acquire().await?;
        relationships::fetch(&mut conn, filter).await
    }

    pub async fn patterns(&self, entity_type: Option<EntityType>, high_priority_only: bool) -> Result<Vec<Pattern>> {
        let mut conn = self.pool.acquire().await?;
        patterns::fetch(&mut conn, entity_type, high_priority_only).await
    }

    /// High-priority patterns of one type, by textual identifier
    pub async fn high_priority_patterns(&self, entity_type: &str) -> Result<Vec<Pattern>> {
        let entity_type: EntityType = entity_type.parse()?;
        self.patterns(Some(entity_type), true).await
    }

    /// Merge history of an entity (as survivor or as absorbed id)
    pub async fn audit_history(&self, entity_id: &str) -> Result<Vec<AuditRecord>> {
        let mut conn = self.pool.acquire().await?;
        audit::history_for_entity(&mut conn, entity_id).await
    }

    pub async fn interviews(&self) -> Result<Vec<InterviewRecord>> {
        let mut conn = self.pool.acquire().await?;
        interviews::fetch_all(&mut conn).await
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let mut conn = self.pool.acquire().await?;

        let mut per_type = Vec::with_capacity(EntityType::ALL.len());
        for entity_type in EntityType::ALL {
            let (count, consolidated, with_contradictions) =
                entities::type_stats(&mut conn, entity_type).await?;
            per_type.push(TypeStats {
                entity_type,
                entities: count,
                consolidated,
                with_contradictions,
            });
        }

        let pattern_count = patterns::fetch(&mut conn, None, false).await?.len() as i64;

        Ok(StoreStats {
            interviews: interviews::count(&mut conn).await?,
            entities: per_type.iter().map(|t| t.entities).sum(),
            relationships: relationships::count(&mut conn).await?,
            patterns: pattern_count,
            audit_records: audit::count(&mut conn).await?,
            cached_embeddings: embeddings::count_embeddings(&mut conn).await?,
            per_type,
        })
    }
}
