//! Consensus confidence
//!
//! ```text
//! divisor    = max(min(source_count_divisor, total_interviews / corpus_divisor_factor), 1)
//! base       = min(source_count / divisor, 1)
//! agreement  = min(attribute_agreements * agreement_bonus_per_attribute, max_agreement_bonus)
//! penalty    = contradictions * penalty_per_contradiction
//!            + (single_source_penalty if source_count == 1)
//! confidence = clamp(base + agreement - penalty, 0, 1)
//! ```

use kgc_common::config::ConsensusConfig;
use kgc_common::db::Entity;
use kgc_common::{Error, Result};
use serde::Serialize;

/// Every term of one confidence computation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsensusBreakdown {
    pub divisor: f64,
    pub base_score: f64,
    pub agreement_bonus: f64,
    pub contradiction_penalty: f64,
    pub single_source_penalty: f64,
    pub confidence: f64,
}

pub struct ConsensusScorer {
    config: ConsensusConfig,
}

impl ConsensusScorer {
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    /// Corpus size used for scoring: the override when configured
    pub fn corpus_size(&self, registered_interviews: i64) -> i64 {
        self.config
            .total_interviews_override
            .unwrap_or(registered_interviews)
    }

    /// Divisor adapted to corpus size, never below one
    pub fn effective_divisor(&self, total_interviews: i64) -> f64 {
        let adaptive = total_interviews as f64 / self.config.corpus_divisor_factor;
        self.config.source_count_divisor.min(adaptive).max(1.0)
    }

    pub fn breakdown(&self, entity: &Entity, total_interviews: i64) -> Result<ConsensusBreakdown> {
        let env = &entity.envelope;
        if env.source_count < 1 {
            return Err(Error::InvalidInput(format!(
                "entity {} has no sources",
                entity.id
            )));
        }

        let divisor = self.effective_divisor(total_interviews);
        let base_score = (env.source_count as f64 / divisor).min(1.0);
        let agreement_bonus = (env.attribute_agreements.max(0) as f64
            * self.config.agreement_bonus_per_attribute)
            .min(self.config.max_agreement_bonus);
        let contradiction_penalty =
            env.contradiction_details.len() as f64 * self.config.penalty_per_contradiction;
        let single_source_penalty = if env.source_count == 1 {
            self.config.single_source_penalty
        } else {
            0.0
        };

        let confidence = (base_score + agreement_bonus - contradiction_penalty - single_source_penalty)
            .clamp(0.0, 1.0);

        Ok(ConsensusBreakdown {
            divisor,
            base_score,
            agreement_bonus,
            contradiction_penalty,
            single_source_penalty,
            confidence,
        })
    }

    /// Confidence in [0, 1]
    pub fn score(&self, entity: &Entity, total_interviews: i64) -> Result<f64> {
        Ok(self.breakdown(entity, total_interviews)?.confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgc_common::db::{ConsolidationEnvelope, Contradiction};
    use kgc_common::{EntityAttributes, EntityType};

    fn entity(sources: usize, agreements: i64, contradictions: usize) -> Entity {
        let mut envelope = ConsolidationEnvelope::single_source("int-0", None);
        for i in 1..sources {
            envelope.add_interview(&format!("int-{i}"));
        }
        envelope.attribute_agreements = agreements;
        envelope.contradiction_details = (0..contradictions)
            .map(|i| Contradiction {
                attribute: format!("attr{i}"),
                values: vec![],
                similarity_score: 0.1,
                sources: vec![],
            })
            .collect();
        Entity {
            id: "e".into(),
            name: "Excel".into(),
            description: String::new(),
            attributes: EntityAttributes::empty(EntityType::System),
            origin_interview_id: "int-0".into(),
            envelope,
        }
    }

    fn scorer() -> ConsensusScorer {
        ConsensusScorer::new(ConsensusConfig::default())
    }

    #[test]
    fn test_formula_terms() {
        let b = scorer().breakdown(&entity(3, 2, 0), 20).unwrap();
        assert_eq!(b.divisor, 5.0);
        assert!((b.base_score - 0.6).abs() < 1e-12);
        assert!((b.agreement_bonus - 0.2).abs() < 1e-12);
        assert_eq!(b.single_source_penalty, 0.0);
        assert!((b.confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_divisor_adapts_and_floors() {
        let s = scorer();
        assert_eq!(s.effective_divisor(100), 10.0);
        assert_eq!(s.effective_divisor(20), 5.0);
        assert_eq!(s.effective_divisor(2), 1.0);
        assert_eq!(s.effective_divisor(0), 1.0);
    }

    #[test]
    fn test_agreement_bonus_capped() {
        let b = scorer().breakdown(&entity(2, 10, 0), 100).unwrap();
        assert!((b.agreement_bonus - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_clamped_to_unit_interval() {
        let s = scorer();
        assert_eq!(s.score(&entity(1, 0, 3), 40).unwrap(), 0.0);
        assert_eq!(s.score(&entity(20, 10, 0), 40).unwrap(), 1.0);
    }

    #[test]
    fn test_single_source_penalty() {
        let b = scorer().breakdown(&entity(1, 0, 0), 4).unwrap();
        assert_eq!(b.single_source_penalty, 0.3);
        assert!((b.confidence - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_monotonic_in_source_count() {
        let s = scorer();
        let mut previous = 0.0;
        for sources in 1..=15 {
            let score = s.score(&entity(sources, 1, 1), 60).unwrap();
            assert!(score >= previous, "{sources} sources: {score} < {previous}");
            previous = score;
        }
    }

    #[test]
    fn test_zero_sources_rejected() {
        let mut e = entity(1, 0, 0);
        e.envelope.source_count = 0;
        assert!(matches!(scorer().score(&e, 10), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_corpus_override() {
        let s = ConsensusScorer::new(ConsensusConfig {
            total_interviews_override: Some(44),
            ..Default::default()
        });
        assert_eq!(s.corpus_size(3), 44);
        assert_eq!(scorer().corpus_size(3), 3);
    }
}
