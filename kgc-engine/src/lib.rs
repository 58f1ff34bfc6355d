//! # kgc engine
//!
//! Consolidates entities extracted from interviews into a deduplicated,
//! confidence-scored knowledge graph:
//! - Duplicate detection (fuzzy + optional semantic similarity)
//! - Entity merging with contradiction tracking
//! - Consensus confidence scoring
//! - Transactional per-interview orchestration with audit trail
//! - Relationship discovery and pattern recognition passes
//!
//! [`ConsolidationEngine`] wires the services to one store.

pub mod batch;
pub mod db;
pub mod failure_log;
pub mod services;
pub mod store;
pub mod types;
pub mod utils;

pub use batch::{BatchOptions, BatchReport, BatchRunner};
pub use store::KnowledgeStore;
pub use types::{ExtractionDocument, InterviewExtraction, RawEntity};

use crate::failure_log::FailureLog;
use crate::services::{
    ConsensusScorer, ConsolidationOrchestrator, DuplicateDetector, EmbeddingProvider,
    EmbeddingService, EntityMerger, OpenAiEmbeddingClient, PatternRecognizer,
    RelationshipDiscoverer, SimilarityScorer, SynonymTable,
};
use kgc_common::db::init_database;
use kgc_common::{ConsolidationConfig, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Consolidation services bound to one store
pub struct ConsolidationEngine {
    pool: SqlitePool,
    config: ConsolidationConfig,
    embeddings: Arc<EmbeddingService>,
    orchestrator: ConsolidationOrchestrator,
    discoverer: RelationshipDiscoverer,
    recognizer: PatternRecognizer,
    store: KnowledgeStore,
}

impl ConsolidationEngine {
    /// Open the configured database and embedding provider
    pub async fn open(config: ConsolidationConfig) -> Result<Self> {
        config.validate()?;

        let db_path = config.storage.database_path();
        let pool = init_database(&db_path).await?;

        let provider = OpenAiEmbeddingClient::from_config(&config.embedding)?
            .map(|client| Arc::new(client) as Arc<dyn EmbeddingProvider>);
        if provider.is_none() {
            info!("Semantic similarity disabled: fuzzy matching only");
        }

        Self::with_pool(pool, config, provider)
    }

    /// Engine over an existing pool
    pub fn with_pool(
        pool: SqlitePool,
        config: ConsolidationConfig,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        let embeddings = Arc::new(EmbeddingService::new(provider, &config.embedding));
        Self::with_embeddings(pool, config, embeddings)
    }

    /// Engine over an existing pool and embedding service
    pub fn with_embeddings(
        pool: SqlitePool,
        config: ConsolidationConfig,
        embeddings: Arc<EmbeddingService>,
    ) -> Result<Self> {
        let synonyms = SynonymTable::from_config_path(config.merge.synonyms_path.as_deref())?;
        let write_lock = Arc::new(Mutex::new(()));

        let scorer = Arc::new(SimilarityScorer::new(embeddings.clone(), &config.similarity));
        let detector = DuplicateDetector::new(scorer, embeddings.clone(), config.similarity.clone());
        let merger = EntityMerger::new(&config.merge, synonyms);
        let consensus = Arc::new(ConsensusScorer::new(config.consensus.clone()));
        let failure_log = FailureLog::new(config.storage.failure_log_path());

        let orchestrator = ConsolidationOrchestrator::new(
            pool.clone(),
            detector,
            merger,
            consensus.clone(),
            embeddings.clone(),
            failure_log,
            write_lock.clone(),
        );
        let discoverer =
            RelationshipDiscoverer::new(pool.clone(), config.relationships.clone(), write_lock.clone());
        let recognizer =
            PatternRecognizer::new(pool.clone(), config.patterns.clone(), consensus, write_lock);
        let store = KnowledgeStore::new(pool.clone());

        Ok(Self {
            pool,
            config,
            embeddings,
            orchestrator,
            discoverer,
            recognizer,
            store,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn embeddings(&self) -> &EmbeddingService {
        &self.embeddings
    }

    pub fn orchestrator(&self) -> &ConsolidationOrchestrator {
        &self.orchestrator
    }

    pub fn discoverer(&self) -> &RelationshipDiscoverer {
        &self.discoverer
    }

    pub fn recognizer(&self) -> &PatternRecognizer {
        &self.recognizer
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }
}
