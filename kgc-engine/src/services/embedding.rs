//! Embedding generation and caching
//!
//! Lookup order for a text: in-process memory → persisted `embedding_cache`
//! table → external provider. Provider calls go through a bounded retry
//! policy and a [`CircuitBreaker`]; when the provider is missing, failing or
//! the breaker is open, [`EmbeddingService::embed`] returns `None` and callers
//! score with fuzzy similarity alone.
//!
//! Newly fetched vectors are held as *pending* until the caller persists them
//! inside its own transaction ([`EmbeddingService::persist_pending`]) and
//! confirms the commit ([`EmbeddingService::mark_persisted`]).

use crate::db::embeddings::{load_embedding, store_embedding};
use crate::services::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::utils::retry::{retry_with_backoff, RetryPolicy};
use async_trait::async_trait;
use kgc_common::config::EmbeddingConfig;
use kgc_common::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

/// Embedding provider errors
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl EmbeddingError {
    /// Timeouts, connection failures, throttling and server errors
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Network(_) => true,
            EmbeddingError::Api(status, _) => *status == 429 || *status >= 500,
            EmbeddingError::Parse(_) => false,
        }
    }
}

/// Black-box `text -> vector` function
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (part of the cache key)
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/embeddings` client
pub struct OpenAiEmbeddingClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(api_base: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| kgc_common::Error::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// Build from configuration; `None` when disabled or no API key is set
    pub fn from_config(config: &EmbeddingConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let key = std::env::var(&config.api_key_env)
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());

        match key {
            Some(key) => Ok(Some(Self::new(
                &config.api_base,
                &key,
                &config.model,
                Duration::from_secs(config.request_timeout_secs),
            )?)),
            None => {
                tracing::warn!(
                    "No embedding API key in {} or OPENAI_API_KEY: semantic scoring disabled",
                    config.api_key_env
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let response = self
            .http
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: text,
            })
            .send()
            .await
            .map_err(|e| EmbeddingError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api(status.as_u16(), body));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Parse(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EmbeddingError::Parse("response contained no embedding".to_string()))
    }
}

/// Counters for one process lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EmbeddingStats {
    pub memory_hits: u64,
    pub store_hits: u64,
    pub external_calls: u64,
    pub failures: u64,
    pub skipped_breaker_open: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    store_hits: AtomicU64,
    external_calls: AtomicU64,
    failures: AtomicU64,
    skipped_breaker_open: AtomicU64,
}

/// Cache key for a text under a model
pub fn cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Embedding lookup with memory/store/provider tiers, retry and breaker
pub struct EmbeddingService {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    memory: RwLock<HashMap<String, Vec<f32>>>,
    pending: Mutex<BTreeMap<String, Vec<f32>>>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    cache_enabled: bool,
    counters: Counters,
}

impl EmbeddingService {
    pub fn new(provider: Option<Arc<dyn EmbeddingProvider>>, config: &EmbeddingConfig) -> Self {
        let provider = if config.enabled { provider } else { None };
        Self {
            provider,
            memory: RwLock::new(HashMap::new()),
            pending: Mutex::new(BTreeMap::new()),
            breaker: CircuitBreaker::new(
                config.failure_threshold,
                Duration::from_secs(config.cooldown_secs),
            ),
            retry: RetryPolicy::from_config(config),
            cache_enabled: config.cache_enabled,
            counters: Counters::default(),
        }
    }

    /// Service without a provider: every lookup degrades to `None`
    pub fn disabled() -> Self {
        Self::new(None, &EmbeddingConfig::default())
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn model(&self) -> &str {
        self.provider.as_deref().map(|p| p.model()).unwrap_or("none")
    }

    /// True when a provider is configured and the breaker is not open
    pub fn semantic_available(&self) -> bool {
        self.provider.is_some() && self.breaker.state() != BreakerState::Open
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn stats(&self) -> EmbeddingStats {
        let c = &self.counters;
        EmbeddingStats {
            memory_hits: c.memory_hits.load(Ordering::Relaxed),
            store_hits: c.store_hits.load(Ordering::Relaxed),
            external_calls: c.external_calls.load(Ordering::Relaxed),
            failures: c.failures.load(Ordering::Relaxed),
            skipped_breaker_open: c.skipped_breaker_open.load(Ordering::Relaxed),
        }
    }

    /// Embedding for `text`, or `None` when semantic scoring must be skipped.
    /// Never fails: provider errors degrade to `None`.
    pub async fn embed(&self, text: &str, store: Option<&mut SqliteConnection>) -> Option<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let provider = self.provider.as_deref()?;
        let key = cache_key(provider.model(), text);

        if self.cache_enabled {
            if let Some(vector) = self.memory.read().await.get(&key) {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(vector.clone());
            }

            if let Some(conn) = store {
                match load_embedding(conn, &key).await {
                    Ok(Some(vector)) => {
                        self.counters.store_hits.fetch_add(1, Ordering::Relaxed);
                        self.memory.write().await.insert(key, vector.clone());
                        return Some(vector);
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Embedding cache lookup failed: {}", e),
                }
            }
        }

        if !self.breaker.allow_request() {
            self.counters.skipped_breaker_open.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Embedding circuit breaker open: skipping semantic scoring");
            return None;
        }

        self.counters.external_calls.fetch_add(1, Ordering::Relaxed);
        let result = retry_with_backoff(
            "embedding request",
            &self.retry,
            EmbeddingError::is_transient,
            move || provider.embed(text),
        )
        .await;

        match result {
            Ok(vector) => {
                self.breaker.record_success();
                if self.cache_enabled {
                    self.memory.write().await.insert(key.clone(), vector.clone());
                    self.pending.lock().await.insert(key, vector.clone());
                }
                Some(vector)
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                self.breaker.record_failure();
                tracing::warn!(
                    consecutive_failures = self.breaker.consecutive_failures(),
                    "Embedding failed, using fuzzy-only score: {}",
                    e
                );
                None
            }
        }
    }

    /// Memory-cached vector for `text`, without any I/O
    pub async fn peek(&self, text: &str) -> Option<Vec<f32>> {
        if !self.cache_enabled {
            return None;
        }
        let key = cache_key(self.model(), text.trim());
        self.memory.read().await.get(&key).cloned()
    }

    /// Seed the memory cache from a vector persisted on an entity
    pub async fn seed(&self, text: &str, vector: Vec<f32>) {
        if !self.cache_enabled || self.provider.is_none() {
            return;
        }
        let key = cache_key(self.model(), text.trim());
        self.memory.write().await.entry(key).or_insert(vector);
    }

    /// Write pending vectors through `conn`; returns the keys written
    pub async fn persist_pending(&self, conn: &mut SqliteConnection) -> Result<Vec<String>> {
        let pending = self.pending.lock().await.clone();
        let model = self.model().to_string();

        for (key, vector) in &pending {
            store_embedding(conn, key, &model, vector).await?;
        }

        Ok(pending.into_keys().collect())
    }

    /// Drop keys from the pending set once their transaction committed
    pub async fn mark_persisted(&self, keys: &[String]) {
        let mut pending = self.pending.lock().await;
        for key in keys {
            pending.remove(key);
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
