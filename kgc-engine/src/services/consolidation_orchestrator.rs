//! Consolidation orchestrator
//!
//! Consolidates one interview's extracted entities into the store as a single
//! atomic transaction:
//!
//! ```text
//! BEGIN → register interview → per type: detect → merge | insert → score → COMMIT
//!       ↘ any error: ROLLBACK → failure log → error returned to caller
//! ```
//!
//! Writers are serialized by a process-wide lock, and the first statement of
//! every transaction is a write, so SQLite's write lock is held for the whole
//! transaction and two consolidations never interleave.
//!
//! Re-running an interview is a no-op: records are identified by their
//! (explicit or derived) id, and a record whose id is already stored, or
//! already absorbed into another entity, is left untouched.

use crate::db::{audit, entities, interviews};
use crate::failure_log::{FailureLog, FailureRecord};
use crate::services::consensus_scorer::ConsensusScorer;
use crate::services::duplicate_detector::DuplicateDetector;
use crate::services::embedding::EmbeddingService;
use crate::services::entity_merger::EntityMerger;
use crate::types::{entity_from_raw, InterviewExtraction, RawEntity};
use crate::utils::pool_monitor::begin_monitored;
use chrono::{DateTime, Utc};
use kgc_common::db::Entity;
use kgc_common::{EntityType, Error, Result};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Counts for one consolidated interview
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationSummary {
    pub interview_id: String,
    pub created: usize,
    pub merged: usize,
    /// Records already consolidated by an earlier run
    pub unchanged: usize,
    pub contradictions: usize,
    pub audit_records: usize,
}

/// Consolidated state of every entity touched by one interview
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsolidationOutcome {
    pub entities: BTreeMap<EntityType, Vec<Entity>>,
    pub summary: ConsolidationSummary,
}

/// Where processing stood when it stopped
#[derive(Debug, Default)]
struct Progress {
    entity_type: Option<EntityType>,
}

pub struct ConsolidationOrchestrator {
    pool: SqlitePool,
    detector: DuplicateDetector,
    merger: EntityMerger,
    consensus: Arc<ConsensusScorer>,
    embeddings: Arc<EmbeddingService>,
    failure_log: FailureLog,
    write_lock: Arc<Mutex<()>>,
}

impl ConsolidationOrchestrator {
    pub fn new(
        pool: SqlitePool,
        detector: DuplicateDetector,
        merger: EntityMerger,
        consensus: Arc<ConsensusScorer>,
        embeddings: Arc<EmbeddingService>,
        failure_log: FailureLog,
        write_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            pool,
            detector,
            merger,
            consensus,
            embeddings,
            failure_log,
            write_lock,
        }
    }

    /// Consolidate an extraction whose type keys are still text
    pub async fn consolidate_extraction(&self, extraction: &InterviewExtraction) -> Result<ConsolidationOutcome> {
        let typed = extraction.typed_entities()?;
        self.consolidate(&typed, &extraction.interview_id, extraction.interview_date)
            .await
    }

    /// Consolidate one interview atomically
    pub async fn consolidate(
        &self,
        entities_by_type: &BTreeMap<EntityType, Vec<RawEntity>>,
        interview_id: &str,
        interview_date: Option<DateTime<Utc>>,
    ) -> Result<ConsolidationOutcome> {
        let interview_id = interview_id.trim();
        if interview_id.is_empty() {
            return Err(Error::InvalidInput("interview_id must not be empty".to_string()));
        }

        let mut incoming: BTreeMap<EntityType, Vec<Entity>> = BTreeMap::new();
        for (entity_type, records) in entities_by_type {
            let converted = records
                .iter()
                .enumerate()
                .map(|(position, raw)| {
                    entity_from_raw(*entity_type, raw, interview_id, interview_date, position)
                })
                .collect::<Result<Vec<_>>>()?;
            incoming.insert(*entity_type, converted);
        }

        let _writer = self.write_lock.lock().await;
        let mut tx = begin_monitored(&self.pool, "orchestrator::consolidate").await?;
        let mut progress = Progress::default();

        let result = match tx.conn() {
            Ok(conn) => {
                self.run(conn, &incoming, interview_id, interview_date, &mut progress)
                    .await
            }
            Err(e) => Err(e),
        };

        let (outcome, persisted_keys) = match result {
            Ok(done) => match tx.commit().await {
                Ok(()) => done,
                Err(e) => {
                    self.record_failure(interview_id, &progress, &e, "commit failed")
                        .await;
                    return Err(e);
                }
            },
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(interview_id, "Rollback failed: {}", rollback_error);
                }
                self.record_failure(interview_id, &progress, &e, "entity processing failed")
                    .await;
                return Err(e);
            }
        };

        self.embeddings.mark_persisted(&persisted_keys).await;

        let s = &outcome.summary;
        info!(
            interview_id,
            created = s.created,
            merged = s.merged,
            unchanged = s.unchanged,
            contradictions = s.contradictions,
            "Interview consolidated"
        );

        Ok(outcome)
    }

    async fn record_failure(&self, interview_id: &str, progress: &Progress, e: &Error, reason: &str) {
        error!(
            interview_id,
            entity_type = ?progress.entity_type,
            "Consolidation rolled back: {}",
            e
        );

        let record = FailureRecord {
            entity_type: progress.entity_type.map(|t| t.as_str().to_string()),
            interview_id: interview_id.to_string(),
            error: e.to_string(),
            rollback_timestamp: Utc::now(),
            rollback_reason: if e.is_lock_contention() {
                format!("{reason} (store locked by another writer)")
            } else {
                reason.to_string()
            },
        };
        if let Err(log_error) = self.failure_log.record(&record).await {
            error!(
                path = %self.failure_log.path().display(),
                "Could not write failure log: {}",
                log_error
            );
        }
    }

    async fn run(
        &self,
        conn: &mut SqliteConnection,
        incoming: &BTreeMap<EntityType, Vec<Entity>>,
        interview_id: &str,
        interview_date: Option<DateTime<Utc>>,
        progress: &mut Progress,
    ) -> Result<(ConsolidationOutcome, Vec<String>)> {
        interviews::register(conn, interview_id, interview_date).await?;
        let total_interviews = self.consensus.corpus_size(interviews::count(conn).await?);

        let mut summary = ConsolidationSummary {
            interview_id: interview_id.to_string(),
            ..Default::default()
        };
        let mut touched: BTreeMap<EntityType, (Vec<Entity>, Vec<usize>)> = BTreeMap::new();

        for (entity_type, new_entities) in incoming {
            let entity_type = *entity_type;
            progress.entity_type = Some(entity_type);

            let mut existing = entities::fetch_all(conn, entity_type).await?;
            let mut touched_positions: Vec<usize> = Vec::new();

            for new_entity in new_entities {
                let position = self
                    .consolidate_one(conn, entity_type, new_entity, &mut existing, interview_id, &mut summary)
                    .await?;
                if !touched_positions.contains(&position) {
                    touched_positions.push(position);
                }
            }

            touched.insert(entity_type, (existing, touched_positions));
        }
        progress.entity_type = None;

        let mut result: BTreeMap<EntityType, Vec<Entity>> = BTreeMap::new();
        for (entity_type, (mut existing, positions)) in touched {
            for &position in &positions {
                let entity = &mut existing[position];
                let confidence = self.consensus.score(entity, total_interviews)?;
                if confidence != entity.envelope.consensus_confidence {
                    entities::update_confidence(conn, entity_type, &entity.id, confidence).await?;
                    entity.envelope.consensus_confidence = confidence;
                }
            }
            result.insert(
                entity_type,
                positions.iter().map(|&p| existing[p].clone()).collect(),
            );
        }

        let raw_count: usize = incoming.values().map(Vec::len).sum();
        interviews::set_entity_count(conn, interview_id, raw_count as i64).await?;

        let persisted_keys = self.embeddings.persist_pending(conn).await?;

        Ok((
            ConsolidationOutcome {
                entities: result,
                summary,
            },
            persisted_keys,
        ))
    }

    /// Detect, then merge or insert one record; returns the position of the
    /// resulting entity in `existing`
    async fn consolidate_one(
        &self,
        conn: &mut SqliteConnection,
        entity_type: EntityType,
        new_entity: &Entity,
        existing: &mut Vec<Entity>,
        interview_id: &str,
        summary: &mut ConsolidationSummary,
    ) -> Result<usize> {
        if let Some(position) = existing.iter().position(|e| {
            e.id == new_entity.id || e.envelope.merged_entity_ids.contains(&new_entity.id)
        }) {
            debug!(entity_type = %entity_type, id = %new_entity.id, "Already consolidated");
            summary.unchanged += 1;
            return Ok(position);
        }

        let best = self
            .detector
            .best_match(new_entity, existing, entity_type, Some(&mut *conn))
            .await?
            .and_then(|m| {
                existing
                    .iter()
                    .position(|e| e.id == m.entity.id)
                    .map(|position| (position, m.score.combined))
            });

        match best {
            Some((position, similarity)) => {
                let outcome = self.merger.merge(new_entity, &existing[position])?;
                let mut merged = outcome.entity;
                if merged.envelope.embedding_vector.is_none() {
                    merged.envelope.embedding_vector = self.embeddings.peek(&merged.match_text()).await;
                }

                entities::update(conn, &merged).await?;
                let absorbed = vec![new_entity.id.clone()];
                audit::record_merge(
                    conn,
                    &audit::MergeAudit {
                        entity_type,
                        interview_id,
                        merged_entity_ids: &absorbed,
                        resulting_entity_id: &merged.id,
                        similarity_score: similarity,
                        timestamp: Utc::now(),
                    },
                )
                .await?;

                debug!(
                    entity_type = %entity_type,
                    survivor = %merged.id,
                    absorbed = %new_entity.id,
                    similarity,
                    "Merged duplicate"
                );

                summary.merged += 1;
                summary.audit_records += 1;
                summary.contradictions += outcome.contradictions.len();
                existing[position] = merged;
                Ok(position)
            }
            None => {
                let mut created = new_entity.clone();
                created.envelope.embedding_vector = self.embeddings.peek(&created.match_text()).await;
                entities::insert(conn, &created).await?;

                debug!(entity_type = %entity_type, id = %created.id, "Inserted new entity");

                summary.created += 1;
                existing.push(created);
                Ok(existing.len() - 1)
            }
        }
    }

    /// Recompute consensus for every stored entity against the current corpus
    /// size; returns the number of entities whose confidence changed
    pub async fn refresh_confidence(&self) -> Result<usize> {
        let _writer = self.write_lock.lock().await;
        let mut tx = begin_monitored(&self.pool, "orchestrator::refresh_confidence").await?;

        let updated = {
            let conn = tx.conn()?;
            let total_interviews = self.consensus.corpus_size(interviews::count(conn).await?);
            let mut updated = 0;

            for entity_type in EntityType::ALL {
                for entity in entities::fetch_all(conn, entity_type).await? {
                    let confidence = self.consensus.score(&entity, total_interviews)?;
                    if confidence != entity.envelope.consensus_confidence {
                        entities::update_confidence(conn, entity_type, &entity.id, confidence)
                            .await?;
                        updated += 1;
                    }
                }
            }
            updated
        };

        tx.commit().await?;
        info!(updated, "Consensus confidence refreshed");
        Ok(updated)
    }
}
