//! Shared fixtures for kgc-engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use kgc_common::config::EmbeddingConfig;
use kgc_common::db::{init_memory_database, Entity};
use kgc_common::{ConsolidationConfig, EntityType};
use kgc_engine::db::entities::EntityFilter;
use kgc_engine::services::{EmbeddingError, EmbeddingProvider};
use kgc_engine::{ConsolidationEngine, InterviewExtraction};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Engine over an in-memory store; the temp dir holds the failure log
pub struct TestEngine {
    pub engine: ConsolidationEngine,
    pub dir: TempDir,
}

/// Defaults, with the failure log inside `dir` and fast embedding retries
pub fn test_config(dir: &Path) -> ConsolidationConfig {
    let mut config = ConsolidationConfig::default();
    config.storage.failure_log_path = Some(dir.join("failures.jsonl"));
    config.embedding = EmbeddingConfig {
        max_attempts: 1,
        initial_backoff_ms: 0,
        max_backoff_ms: 0,
        ..Default::default()
    };
    config
}

pub async fn test_engine() -> TestEngine {
    test_engine_with(None, |_| {}).await
}

pub async fn test_engine_with(
    provider: Option<Arc<dyn EmbeddingProvider>>,
    adjust: impl FnOnce(&mut ConsolidationConfig),
) -> TestEngine {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    adjust(&mut config);

    let pool = init_memory_database().await.unwrap();
    let engine = ConsolidationEngine::with_pool(pool, config, provider).unwrap();
    TestEngine { engine, dir }
}

/// Extraction from a JSON object of `type -> [records]`
pub fn interview(interview_id: &str, entities: Value) -> InterviewExtraction {
    serde_json::from_value(serde_json::json!({
        "interview_id": interview_id,
        "interview_date": "2024-03-01T10:00:00Z",
        "entities": entities,
    }))
    .unwrap()
}

pub async fn all_entities(engine: &ConsolidationEngine, entity_type: EntityType) -> Vec<Entity> {
    engine
        .store()
        .entities(entity_type, &EntityFilter::default())
        .await
        .unwrap()
}

pub async fn table_count(engine: &ConsolidationEngine, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(engine.pool())
        .await
        .unwrap()
}

/// Letter-frequency embeddings, counting calls
pub struct LetterProvider {
    pub calls: AtomicUsize,
}

impl LetterProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for LetterProvider {
    fn model(&self) -> &str {
        "letters"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut v = vec![0.0f32; 26];
        for c in text.to_lowercase().chars().filter(|c| c.is_ascii_lowercase()) {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
        Ok(v)
    }
}

/// Provider that is always unreachable
pub struct DownProvider {
    pub calls: AtomicUsize,
}

impl DownProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for DownProvider {
    fn model(&self) -> &str {
        "down"
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(EmbeddingError::Network("connection refused".to_string()))
    }
}
