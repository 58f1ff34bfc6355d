//! Configuration loading and validation
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `KGC_CONFIG` environment variable
//! 3. Platform config directory (`<config_dir>/kgc/config.toml`)
//! 4. Built-in defaults
//!
//! Every field has a default, so an empty file is a complete configuration.

use crate::entity_type::EntityType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "KGC_CONFIG";

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub similarity: SimilarityConfig,
    pub merge: MergeConfig,
    pub consensus: ConsensusConfig,
    pub patterns: PatternConfig,
    pub relationships: RelationshipConfig,
    pub embedding: EmbeddingConfig,
    pub storage: StorageConfig,
}

/// Duplicate detection knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Threshold for entity types without an explicit entry
    pub default_threshold: f64,
    /// Per-type thresholds keyed by entity type identifier
    pub thresholds: BTreeMap<String, f64>,
    pub semantic_weight: f64,
    pub name_weight: f64,
    /// Name similarity at or above this skips the embedding call
    pub obvious_duplicate_threshold: f64,
    /// Fuzzy pre-filter keeps candidates at `prefilter_ratio * threshold` or above
    pub prefilter_ratio: f64,
    /// Candidates refined with semantic scoring (top-K)
    pub max_candidates: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        let thresholds = [
            ("pain_point", 0.80),
            ("process", 0.80),
            ("system", 0.85),
            ("kpi", 0.90),
            ("automation_candidate", 0.85),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            default_threshold: 0.85,
            thresholds,
            semantic_weight: 0.7,
            name_weight: 0.3,
            obvious_duplicate_threshold: 0.95,
            prefilter_ratio: 0.7,
            max_candidates: 10,
        }
    }
}

impl SimilarityConfig {
    /// Duplicate threshold for an entity type
    ///
    /// Keys are matched the way `EntityType` parses them, so `systems` or
    /// `System` resolve to the same entry as `system`.
    pub fn threshold_for(&self, entity_type: EntityType) -> f64 {
        self.thresholds
            .get(entity_type.as_str())
            .or_else(|| {
                self.thresholds
                    .iter()
                    .find(|(key, _)| key.parse::<EntityType>().ok() == Some(entity_type))
                    .map(|(_, value)| value)
            })
            .copied()
            .unwrap_or(self.default_threshold)
    }

    /// Re-key thresholds under canonical identifiers; unknown keys are kept
    /// so that `validate` can report them
    pub fn canonicalize_thresholds(&mut self) -> Result<()> {
        let mut canonical = BTreeMap::new();
        for (key, value) in std::mem::take(&mut self.thresholds) {
            let name = match key.parse::<EntityType>() {
                Ok(entity_type) => entity_type.as_str().to_string(),
                Err(_) => key.clone(),
            };
            if canonical.insert(name.clone(), value).is_some() {
                return Err(Error::Config(format!(
                    "similarity.thresholds.{key}: duplicate threshold for '{name}'"
                )));
            }
        }
        self.thresholds = canonical;
        Ok(())
    }

    /// Set the threshold for one entity type
    pub fn set_threshold(&mut self, entity_type: EntityType, threshold: f64) {
        self.thresholds
            .insert(entity_type.as_str().to_string(), threshold);
    }
}

/// Entity merge knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Attribute values below this similarity are contradictions
    pub contradiction_threshold: f64,
    /// Description sentences at or above this similarity are duplicates
    pub sentence_dedup_threshold: f64,
    /// Optional TOML file replacing the built-in synonym table
    pub synonyms_path: Option<PathBuf>,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            contradiction_threshold: 0.7,
            sentence_dedup_threshold: 0.9,
            synonyms_path: None,
        }
    }
}

/// Consensus confidence formula constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Upper bound on the source-count divisor
    pub source_count_divisor: f64,
    /// Corpus size is divided by this to get the adaptive divisor
    pub corpus_divisor_factor: f64,
    pub agreement_bonus_per_attribute: f64,
    pub max_agreement_bonus: f64,
    pub penalty_per_contradiction: f64,
    pub single_source_penalty: f64,
    /// Fixed corpus size instead of the registered interview count
    pub total_interviews_override: Option<i64>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            source_count_divisor: 10.0,
            corpus_divisor_factor: 4.0,
            agreement_bonus_per_attribute: 0.1,
            max_agreement_bonus: 0.3,
            penalty_per_contradiction: 0.25,
            single_source_penalty: 0.3,
            total_interviews_override: None,
        }
    }
}

/// Pattern recognition thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    pub recurring_threshold: i64,
    pub high_priority_frequency: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            recurring_threshold: 3,
            high_priority_frequency: 0.30,
        }
    }
}

/// How repeated evidence for the same edge combines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthPolicy {
    /// Keep the strongest observation
    Max,
    /// Average stored and new strength
    Average,
}

/// One entity-type pair scanned by relationship discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRule {
    pub source_type: EntityType,
    pub target_type: EntityType,
    pub relationship_type: String,
}

impl RelationshipRule {
    fn new(source_type: EntityType, target_type: EntityType, relationship_type: &str) -> Self {
        Self {
            source_type,
            target_type,
            relationship_type: relationship_type.to_string(),
        }
    }
}

/// Relationship discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipConfig {
    pub default_strength: f64,
    pub strength_policy: StrengthPolicy,
    /// Names shorter than this never match (avoids "IT" matching everything)
    pub min_name_chars: usize,
    pub rules: Vec<RelationshipRule>,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            default_strength: 0.8,
            strength_policy: StrengthPolicy::Max,
            min_name_chars: 3,
            rules: vec![
                RelationshipRule::new(EntityType::System, EntityType::PainPoint, "causes"),
                RelationshipRule::new(EntityType::Process, EntityType::System, "uses"),
                RelationshipRule::new(EntityType::PainPoint, EntityType::Process, "affects"),
                RelationshipRule::new(
                    EntityType::AutomationCandidate,
                    EntityType::Process,
                    "automates",
                ),
                RelationshipRule::new(EntityType::Kpi, EntityType::Process, "measures"),
                RelationshipRule::new(EntityType::DataFlow, EntityType::System, "connects"),
            ],
        }
    }
}

/// External embedding service settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    pub cache_enabled: bool,
    pub model: String,
    pub api_base: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failures that open the circuit breaker
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_enabled: true,
            model: "text-embedding-3-small".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "KGC_EMBEDDING_API_KEY".to_string(),
            request_timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 4000,
            failure_threshold: 10,
            cooldown_secs: 300,
        }
    }
}

/// Store locations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: Option<PathBuf>,
    pub failure_log_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Database path, falling back to the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| default_data_dir().join("kgc.db"))
    }

    /// Failure log path, next to the database by default
    pub fn failure_log_path(&self) -> PathBuf {
        self.failure_log_path.clone().unwrap_or_else(|| {
            let db = self.database_path();
            db.parent()
                .map(|p| p.join("consolidation_failures.jsonl"))
                .unwrap_or_else(|| PathBuf::from("consolidation_failures.jsonl"))
        })
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("kgc"))
        .unwrap_or_else(|| PathBuf::from("./kgc_data"))
}

/// Locate the configuration file, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("kgc").join("config.toml"))
        .filter(|p| p.exists())
}

impl ConsolidationConfig {
    /// Load from an optional file path and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                info!("Loaded configuration from {}", path.display());
                Self::from_toml_str(&content)?
            }
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text (not validated)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {e}")))?;
        config.similarity.canonicalize_thresholds()?;
        Ok(config)
    }

    /// Reject out-of-range values and unknown entity type keys
    pub fn validate(&self) -> Result<()> {
        let s = &self.similarity;
        check_unit("similarity.default_threshold", s.default_threshold)?;
        check_unit("similarity.obvious_duplicate_threshold", s.obvious_duplicate_threshold)?;
        check_unit("similarity.prefilter_ratio", s.prefilter_ratio)?;
        check_unit("similarity.semantic_weight", s.semantic_weight)?;
        check_unit("similarity.name_weight", s.name_weight)?;
        if s.semantic_weight + s.name_weight <= 0.0 {
            return Err(Error::Config(
                "similarity.semantic_weight + similarity.name_weight must be positive".to_string(),
            ));
        }
        if s.max_candidates == 0 {
            return Err(Error::Config("similarity.max_candidates must be >= 1".to_string()));
        }
        let mut seen = BTreeMap::new();
        for (key, value) in &s.thresholds {
            let entity_type = key.parse::<EntityType>()?;
            check_unit(&format!("similarity.thresholds.{key}"), *value)?;
            if let Some(other) = seen.insert(entity_type, key) {
                return Err(Error::Config(format!(
                    "similarity.thresholds: '{other}' and '{key}' both name {entity_type}"
                )));
            }
        }

        check_unit("merge.contradiction_threshold", self.merge.contradiction_threshold)?;
        check_unit("merge.sentence_dedup_threshold", self.merge.sentence_dedup_threshold)?;

        let c = &self.consensus;
        if c.source_count_divisor <= 0.0 || c.corpus_divisor_factor <= 0.0 {
            return Err(Error::Config("consensus divisors must be positive".to_string()));
        }
        for (name, value) in [
            ("consensus.agreement_bonus_per_attribute", c.agreement_bonus_per_attribute),
            ("consensus.max_agreement_bonus", c.max_agreement_bonus),
            ("consensus.penalty_per_contradiction", c.penalty_per_contradiction),
            ("consensus.single_source_penalty", c.single_source_penalty),
        ] {
            check_unit(name, value)?;
        }
        if matches!(c.total_interviews_override, Some(n) if n <= 0) {
            return Err(Error::Config(
                "consensus.total_interviews_override must be positive".to_string(),
            ));
        }

        if self.patterns.recurring_threshold < 1 {
            return Err(Error::Config("patterns.recurring_threshold must be >= 1".to_string()));
        }
        check_unit("patterns.high_priority_frequency", self.patterns.high_priority_frequency)?;

        check_unit("relationships.default_strength", self.relationships.default_strength)?;

        let e = &self.embedding;
        if e.max_attempts == 0 {
            return Err(Error::Config("embedding.max_attempts must be >= 1".to_string()));
        }
        if e.failure_threshold == 0 {
            return Err(Error::Config("embedding.failure_threshold must be >= 1".to_string()));
        }

        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{name} must be within [0, 1], got {value}")))
    }
}
