//! Consolidation services

pub mod circuit_breaker;
pub mod consensus_scorer;
pub mod consolidation_orchestrator;
pub mod duplicate_detector;
pub mod embedding;
pub mod entity_merger;
pub mod pattern_recognizer;
pub mod relationship_discoverer;
pub mod similarity;
pub mod synonyms;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use consensus_scorer::{ConsensusBreakdown, ConsensusScorer};
pub use consolidation_orchestrator::{ConsolidationOrchestrator, ConsolidationOutcome, ConsolidationSummary};
pub use duplicate_detector::{DuplicateDetector, DuplicateMatch};
pub use embedding::{EmbeddingError, EmbeddingProvider, EmbeddingService, OpenAiEmbeddingClient};
pub use entity_merger::{EntityMerger, MergeOutcome};
pub use pattern_recognizer::{PatternRecognizer, PatternReport};
pub use relationship_discoverer::{DiscoveryReport, RelationshipDiscoverer};
pub use similarity::{SimilarityScore, SimilarityScorer};
pub use synonyms::SynonymTable;
