//! Integration tests for semantic scoring: caching tiers and degradation

mod helpers;

use helpers::*;
use kgc_common::db::init_database;
use kgc_common::EntityType;
use kgc_engine::services::{BreakerState, EmbeddingProvider};
use kgc_engine::ConsolidationEngine;
use serde_json::json;
use std::sync::Arc;

const PORTAL_INTERVIEWS: [(&str, &str); 4] = [
    ("int-1", "Portal clientes"),
    ("int-2", "Portal de clientes web"),
    ("int-3", "Portal clientes nuevo"),
    ("int-4", "portal clientes"),
];

async fn consolidate_portals(engine: &ConsolidationEngine) {
    for (id, name) in PORTAL_INTERVIEWS {
        engine
            .orchestrator()
            .consolidate_extraction(&interview(id, json!({"system": [{"name": name}]})))
            .await
            .unwrap();
    }
}

/// Comparable view of the stored systems
async fn system_snapshot(engine: &ConsolidationEngine) -> Vec<(String, String, Vec<String>, f64)> {
    all_entities(engine, EntityType::System)
        .await
        .into_iter()
        .map(|e| {
            (
                e.id,
                e.name,
                e.envelope.mentioned_in_interviews,
                e.envelope.consensus_confidence,
            )
        })
        .collect()
}

#[tokio::test]
async fn test_breaker_opens_and_consolidation_continues_fuzzy_only() {
    let provider = DownProvider::new();
    let t = test_engine_with(Some(provider.clone() as Arc<dyn EmbeddingProvider>), |c| {
        c.embedding.failure_threshold = 2;
    })
    .await;

    consolidate_portals(&t.engine).await;

    assert_eq!(provider.calls(), 2);
    assert_eq!(t.engine.embeddings().breaker().state(), BreakerState::Open);
    assert_eq!(t.engine.embeddings().stats().failures, 2);

    let systems = all_entities(&t.engine, EntityType::System).await;
    assert_eq!(systems.len(), 3);
    let portal = systems.iter().find(|e| e.name == "Portal clientes").unwrap();
    assert_eq!(portal.envelope.source_count, 2);

    // Same store as an engine that never had a provider
    let fuzzy = test_engine().await;
    consolidate_portals(&fuzzy.engine).await;
    assert_eq!(system_snapshot(&t.engine).await, system_snapshot(&fuzzy.engine).await);
    assert_eq!(
        table_count(&t.engine, "consolidation_audit").await,
        table_count(&fuzzy.engine, "consolidation_audit").await
    );
}

#[tokio::test]
async fn test_persisted_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("kgc.db");
    let mut config = test_config(dir.path());
    config.storage.database_path = Some(db_path.clone());

    let first_provider = LetterProvider::new();
    let pool = init_database(&db_path).await.unwrap();
    let first = ConsolidationEngine::with_pool(
        pool,
        config.clone(),
        Some(first_provider.clone() as Arc<dyn EmbeddingProvider>),
    )
    .unwrap();
    for (id, name) in [("int-1", "Portal clientes"), ("int-2", "Portal de clientes web")] {
        first
            .orchestrator()
            .consolidate_extraction(&interview(id, json!({"system": [{"name": name}]})))
            .await
            .unwrap();
    }
    assert_eq!(first_provider.calls(), 2);
    assert_eq!(table_count(&first, "embedding_cache").await, 2);
    assert_eq!(first.embeddings().pending_count().await, 0);
    first.pool().close().await;

    let second_provider = LetterProvider::new();
    let pool = init_database(&db_path).await.unwrap();
    let second = ConsolidationEngine::with_pool(
        pool,
        config,
        Some(second_provider.clone() as Arc<dyn EmbeddingProvider>),
    )
    .unwrap();
    second
        .orchestrator()
        .consolidate_extraction(&interview(
            "int-3",
            json!({"system": [{"name": "Portal de clientes web"}]}),
        ))
        .await
        .unwrap();

    assert_eq!(second_provider.calls(), 0);
    assert!(second.embeddings().stats().store_hits >= 1);
}
