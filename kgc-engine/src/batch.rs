//! Batch consolidation
//!
//! Runs interviews one at a time, each in its own transaction. A failed
//! interview is recorded and skipped (the caller decides whether to retry it).
//! Cancellation is checked between interviews only: an interview already in
//! progress always commits or rolls back as a whole.

use crate::services::consolidation_orchestrator::ConsolidationSummary;
use crate::services::pattern_recognizer::PatternReport;
use crate::services::relationship_discoverer::DiscoveryReport;
use crate::types::InterviewExtraction;
use crate::ConsolidationEngine;
use kgc_common::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Passes run after the interviews
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub refresh_confidence: bool,
    pub discover_relationships: bool,
    pub recognize_patterns: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            refresh_confidence: true,
            discover_relationships: true,
            recognize_patterns: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedInterview {
    pub interview_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: Vec<ConsolidationSummary>,
    pub failed: Vec<FailedInterview>,
    /// Interviews not attempted because of cancellation
    pub skipped: usize,
    pub cancelled: bool,
    pub refreshed: Option<usize>,
    pub relationships: Option<DiscoveryReport>,
    pub patterns: Option<PatternReport>,
}

pub struct BatchRunner<'a> {
    engine: &'a ConsolidationEngine,
    options: BatchOptions,
}

impl<'a> BatchRunner<'a> {
    pub fn new(engine: &'a ConsolidationEngine, options: BatchOptions) -> Self {
        Self { engine, options }
    }

    pub async fn run(
        &self,
        interviews: &[InterviewExtraction],
        cancel_token: &CancellationToken,
    ) -> Result<BatchReport> {
        let mut report = BatchReport::default();

        for (index, extraction) in interviews.iter().enumerate() {
            if cancel_token.is_cancelled() {
                report.cancelled = true;
                report.skipped = interviews.len() - index;
                info!(
                    processed = report.processed.len(),
                    skipped = report.skipped,
                    "Batch cancelled between interviews"
                );
                break;
            }

            match self.engine.orchestrator().consolidate_extraction(extraction).await {
                Ok(outcome) => report.processed.push(outcome.summary),
                Err(e) => {
                    warn!(interview_id = %extraction.interview_id, "Interview failed: {}", e);
                    report.failed.push(FailedInterview {
                        interview_id: extraction.interview_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.cancelled {
            return Ok(report);
        }

        if self.options.refresh_confidence {
            report.refreshed = Some(self.engine.orchestrator().refresh_confidence().await?);
        }
        if self.options.discover_relationships {
            report.relationships = Some(self.engine.discoverer().run().await?);
        }
        if self.options.recognize_patterns {
            report.patterns = Some(self.engine.recognizer().run().await?);
        }

        info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            "Batch complete"
        );
        Ok(report)
    }
}
