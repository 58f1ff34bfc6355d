//! Pattern recognition
//!
//! Flags consolidated entities mentioned in at least `recurring_threshold`
//! interviews. Frequency is `source_count / total_interviews`; patterns at or
//! above `high_priority_frequency` are high priority. Each run replaces the
//! stored pattern set.

use crate::db::{entities, interviews, patterns};
use crate::services::consensus_scorer::ConsensusScorer;
use crate::utils::pool_monitor::begin_monitored;
use kgc_common::config::PatternConfig;
use kgc_common::db::{Entity, Pattern};
use kgc_common::{EntityType, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub const RECURRING_PATTERN: &str = "recurring";

/// Counts for one recognition pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatternReport {
    pub total_interviews: i64,
    pub patterns: usize,
    pub high_priority: usize,
}

/// Patterns among `entities`; no I/O
pub fn detect_patterns<'a, I>(entities: I, total_interviews: i64, config: &PatternConfig) -> Vec<Pattern>
where
    I: IntoIterator<Item = &'a Entity>,
{
    entities
        .into_iter()
        .filter(|e| e.envelope.is_consolidated && e.envelope.source_count >= config.recurring_threshold)
        .map(|e| {
            let source_count = e.envelope.source_count;
            // An override smaller than the observed mentions would push frequency past 1
            let total = total_interviews.max(source_count);
            let frequency = source_count as f64 / total as f64;
            Pattern {
                pattern_type: RECURRING_PATTERN.to_string(),
                entity_type: e.entity_type(),
                entity_id: e.id.clone(),
                entity_name: e.match_name().to_string(),
                pattern_frequency: frequency,
                source_count,
                high_priority: frequency >= config.high_priority_frequency,
                description: format!(
                    "Mentioned in {} of {} interviews ({:.0}%)",
                    source_count,
                    total,
                    frequency * 100.0
                ),
            }
        })
        .collect()
}

pub struct PatternRecognizer {
    pool: SqlitePool,
    config: PatternConfig,
    consensus: Arc<ConsensusScorer>,
    write_lock: Arc<Mutex<()>>,
}

impl PatternRecognizer {
    pub fn new(
        pool: SqlitePool,
        config: PatternConfig,
        consensus: Arc<ConsensusScorer>,
        write_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            pool,
            config,
            consensus,
            write_lock,
        }
    }

    /// Recompute and replace the stored pattern set
    pub async fn run(&self) -> Result<PatternReport> {
        let _writer = self.write_lock.lock().await;
        let mut tx = begin_monitored(&self.pool, "patterns::recognize").await?;

        let report = {
            let conn = tx.conn()?;
            let total_interviews = self.consensus.corpus_size(interviews::count(conn).await?);

            let mut found = Vec::new();
            for entity_type in EntityType::ALL {
                let all = entities::fetch_all(conn, entity_type).await?;
                found.extend(detect_patterns(&all, total_interviews, &self.config));
            }
            patterns::replace_all(conn, &found).await?;

            PatternReport {
                total_interviews,
                patterns: found.len(),
                high_priority: found.iter().filter(|p| p.high_priority).count(),
            }
        };

        tx.commit().await?;
        info!(
            patterns = report.patterns,
            high_priority = report.high_priority,
            total_interviews = report.total_interviews,
            "Pattern recognition complete"
        );
        Ok(report)
    }
}
