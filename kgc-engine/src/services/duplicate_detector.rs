//! Duplicate detection
//!
//! Two stages:
//! 1. Fuzzy pre-filter: name-only similarity against every existing entity of
//!    the type, keeping candidates at or above `prefilter_ratio * threshold`.
//!    Pure CPU, no I/O.
//! 2. Refinement: the full (fuzzy + semantic) score for the best
//!    `max_candidates` survivors, keeping scores strictly above the type's
//!    threshold.
//!
//! Embedding failures in stage 2 degrade the affected candidate to its fuzzy
//! score; the embedding service's breaker turns repeated failures into
//! fuzzy-only matching for everything that follows.

use crate::services::embedding::EmbeddingService;
use crate::services::similarity::{SimilarityScore, SimilarityScorer};
use kgc_common::config::SimilarityConfig;
use kgc_common::db::Entity;
use kgc_common::{EntityType, Error, Result};
use sqlx::SqliteConnection;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

/// One existing entity judged a duplicate of the new one
#[derive(Debug, Clone, Copy)]
pub struct DuplicateMatch<'a> {
    pub entity: &'a Entity,
    pub score: SimilarityScore,
}

/// Ranking: score desc, then source_count desc, then id asc
fn rank(a_score: f64, a: &Entity, b_score: f64, b: &Entity) -> Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.envelope.source_count.cmp(&a.envelope.source_count))
        .then_with(|| a.id.cmp(&b.id))
}

pub struct DuplicateDetector {
    scorer: Arc<SimilarityScorer>,
    embeddings: Arc<EmbeddingService>,
    config: SimilarityConfig,
}

impl DuplicateDetector {
    pub fn new(
        scorer: Arc<SimilarityScorer>,
        embeddings: Arc<EmbeddingService>,
        config: SimilarityConfig,
    ) -> Self {
        Self {
            scorer,
            embeddings,
            config,
        }
    }

    pub fn threshold(&self, entity_type: EntityType) -> f64 {
        self.config.threshold_for(entity_type)
    }

    /// Stage 1: name-only candidates, best first, at most `max_candidates`
    pub fn prefilter<'a>(
        &self,
        new_entity: &Entity,
        existing: &'a [Entity],
        entity_type: EntityType,
    ) -> Vec<(&'a Entity, f64)> {
        let cutoff = self.config.prefilter_ratio * self.threshold(entity_type);

        let mut candidates: Vec<(&'a Entity, f64)> = existing
            .iter()
            .filter(|e| e.id != new_entity.id)
            .map(|e| (e, self.scorer.name_score(new_entity, e)))
            .filter(|(_, score)| *score >= cutoff)
            .collect();

        candidates.sort_by(|(a, sa), (b, sb)| rank(*sa, a, *sb, b));
        candidates.truncate(self.config.max_candidates);
        candidates
    }

    /// Ranked duplicates of `new_entity` among `existing`
    pub async fn find_duplicates<'a>(
        &self,
        new_entity: &Entity,
        existing: &'a [Entity],
        entity_type: EntityType,
        mut store: Option<&mut SqliteConnection>,
    ) -> Result<Vec<DuplicateMatch<'a>>> {
        if new_entity.entity_type() != entity_type {
            return Err(Error::InvalidInput(format!(
                "entity {} is a {}, not a {}",
                new_entity.id,
                new_entity.entity_type(),
                entity_type
            )));
        }

        let threshold = self.threshold(entity_type);
        let candidates = self.prefilter(new_entity, existing, entity_type);
        let new_text = new_entity.match_text();

        let mut matches = Vec::new();
        for (candidate, name_score) in candidates {
            let candidate_text = candidate.match_text();
            if let Some(vector) = &candidate.envelope.embedding_vector {
                self.embeddings.seed(&candidate_text, vector.clone()).await;
            }

            let score = self
                .scorer
                .score_with_name(name_score, &new_text, &candidate_text, store.as_deref_mut())
                .await;

            debug!(
                entity_type = %entity_type,
                candidate = %candidate.id,
                name = score.name,
                semantic = ?score.semantic,
                combined = score.combined,
                "Scored duplicate candidate"
            );

            if score.combined > threshold {
                matches.push(DuplicateMatch {
                    entity: candidate,
                    score,
                });
            }
        }

        matches.sort_by(|a, b| rank(a.score.combined, a.entity, b.score.combined, b.entity));
        Ok(matches)
    }

    /// Best duplicate, if any
    pub async fn best_match<'a>(
        &self,
        new_entity: &Entity,
        existing: &'a [Entity],
        entity_type: EntityType,
        store: Option<&mut SqliteConnection>,
    ) -> Result<Option<DuplicateMatch<'a>>> {
        let matches = self
            .find_duplicates(new_entity, existing, entity_type, store)
            .await?;
        Ok(matches.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::circuit_breaker::BreakerState;
    use crate::services::embedding::{EmbeddingError, EmbeddingProvider};
    use crate::services::similarity::name_similarity;
    use async_trait::async_trait;
    use kgc_common::config::EmbeddingConfig;
    use kgc_common::db::ConsolidationEnvelope;
    use kgc_common::EntityAttributes;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    struct FailingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn model(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Err(EmbeddingError::Network("connection refused".into()))
        }
    }

    fn entity(entity_type: EntityType, id: &str, name: &str) -> Entity {
        Entity {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            attributes: EntityAttributes::empty(entity_type),
            origin_interview_id: "int-1".to_string(),
            envelope: ConsolidationEnvelope::single_source("int-1", None),
        }
    }

    fn detector(config: SimilarityConfig, embeddings: EmbeddingService) -> DuplicateDetector {
        let embeddings = Arc::new(embeddings);
        let scorer = Arc::new(SimilarityScorer::new(embeddings.clone(), &config));
        DuplicateDetector::new(scorer, embeddings, config)
    }

    #[tokio::test]
    async fn test_threshold_is_strict_for_every_type() {
        let exact = name_similarity("Facturacion", "Facturas");
        let eps = 1e-9;

        for entity_type in EntityType::ALL {
            let new = entity(entity_type, "new", "Facturacion");
            let existing = vec![entity(entity_type, "old", "Facturas")];

            for (threshold, expect_match) in [(exact - eps, true), (exact, false), (exact + eps, false)] {
                let mut config = SimilarityConfig::default();
                config.set_threshold(entity_type, threshold);
                let d = detector(config, EmbeddingService::disabled());

                let found = d
                    .find_duplicates(&new, &existing, entity_type, None)
                    .await
                    .unwrap();
                assert_eq!(
                    !found.is_empty(),
                    expect_match,
                    "{entity_type} at threshold {threshold}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_fuzzy_only_ranking() {
        let d = detector(SimilarityConfig::default(), EmbeddingService::disabled());
        let new = entity(EntityType::System, "new", "Excel");
        let mut popular = entity(EntityType::System, "b-excel", "excel");
        popular.envelope.add_interview("int-2");
        let existing = vec![
            entity(EntityType::System, "sap", "SAP"),
            entity(EntityType::System, "a-excel", "EXCEL"),
            popular,
        ];

        let found = d
            .find_duplicates(&new, &existing, EntityType::System, None)
            .await
            .unwrap();
        let ids: Vec<_> = found.iter().map(|m| m.entity.id.as_str()).collect();
        assert_eq!(ids, vec!["b-excel", "a-excel"]);
        assert_eq!(found[0].score.semantic, None);
    }

    #[tokio::test]
    async fn test_prefilter_limits_candidates() {
        let mut config = SimilarityConfig::default();
        config.max_candidates = 2;
        let d = detector(config, EmbeddingService::disabled());

        let new = entity(EntityType::Process, "new", "Cierre contable");
        let existing: Vec<_> = (0..5)
            .map(|i| entity(EntityType::Process, &format!("p{i}"), "Cierre contable"))
            .chain(std::iter::once(entity(EntityType::Process, "other", "Onboarding")))
            .collect();

        let candidates = d.prefilter(&new, &existing, EntityType::Process);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].0.id, "p0");
    }

    #[tokio::test]
    async fn test_type_mismatch_rejected() {
        let d = detector(SimilarityConfig::default(), EmbeddingService::disabled());
        let new = entity(EntityType::Kpi, "new", "NPS");
        let result = d.find_duplicates(&new, &[], EntityType::System, None).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_breaker_opens_and_detection_continues() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicU32::new(0),
        });
        let embedding_config = EmbeddingConfig {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            failure_threshold: 10,
            ..Default::default()
        };
        let embeddings = EmbeddingService::new(Some(provider.clone()), &embedding_config);

        let mut config = SimilarityConfig::default();
        config.max_candidates = 20;
        let d = detector(config, embeddings);

        let new = entity(EntityType::System, "new", "Portal de clientes");
        let existing: Vec<_> = "ABCDEFGHIJK"
            .chars()
            .map(|c| entity(EntityType::System, &format!("s{c}"), &format!("Portal de clientes {c}")))
            .collect();

        let found = d
            .find_duplicates(&new, &existing, EntityType::System, None)
            .await
            .unwrap();

        assert_eq!(found.len(), 11);
        assert!(found.iter().all(|m| m.score.semantic.is_none()));
        assert_eq!(provider.calls.load(AtomicOrdering::SeqCst), 10);
        assert_eq!(d.embeddings.breaker().state(), BreakerState::Open);
    }
}
