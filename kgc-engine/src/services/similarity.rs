//! Similarity scoring between entities
//!
//! Blends a fuzzy name similarity with an optional semantic (embedding cosine)
//! similarity:
//!
//! - Name component: normalized Levenshtein over lowercased, accent-folded
//!   names with generic filler words removed ("sistema", "software", ...),
//!   taking the better of raw and token-sorted comparisons. Symmetric.
//! - Semantic component: cosine similarity of embeddings of
//!   `name + truncated description`. Skipped (name-only score) when the
//!   embedding service cannot provide both vectors, or when the name score
//!   alone already reaches the obvious-duplicate threshold.

use crate::services::embedding::EmbeddingService;
use crate::utils::text::tokens;
use kgc_common::config::SimilarityConfig;
use kgc_common::db::Entity;
use sqlx::SqliteConnection;
use std::sync::Arc;

/// Generic words that carry no identity ("Sistema SAP" is "SAP")
const FILLER_WORDS: &[&str] = &[
    "sistema", "sistemas", "software", "herramienta", "herramientas", "plataforma",
    "aplicacion", "aplicaciones", "programa", "app", "tool", "tools", "system", "systems",
    "platform", "el", "la", "los", "las", "de", "del", "the", "of",
];

/// Normalized name used for fuzzy comparison
pub fn normalize_name(name: &str) -> String {
    let all = tokens(name);
    let meaningful: Vec<&str> = all
        .iter()
        .map(String::as_str)
        .filter(|t| !FILLER_WORDS.contains(t))
        .collect();

    if meaningful.is_empty() {
        // "Sistema" alone is still a name
        all.join(" ")
    } else {
        meaningful.join(" ")
    }
}

/// Fuzzy name similarity in [0, 1]; symmetric
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_name(a);
    let nb = normalize_name(b);

    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }

    let direct = strsim::normalized_levenshtein(&na, &nb);
    let sorted = strsim::normalized_levenshtein(&sorted_tokens(&na), &sorted_tokens(&nb));
    direct.max(sorted).clamp(0.0, 1.0)
}

fn sorted_tokens(normalized: &str) -> String {
    let mut parts: Vec<&str> = normalized.split(' ').collect();
    parts.sort_unstable();
    parts.join(" ")
}

/// Cosine similarity clamped to [0, 1]; `None` for mismatched or zero vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(0.0, 1.0))
}

/// Component scores of one comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityScore {
    pub combined: f64,
    pub name: f64,
    /// `None` when semantic scoring was skipped or unavailable
    pub semantic: Option<f64>,
}

impl SimilarityScore {
    pub fn name_only(name: f64) -> Self {
        Self {
            combined: name,
            name,
            semantic: None,
        }
    }
}

/// Blended fuzzy + semantic scorer
pub struct SimilarityScorer {
    embeddings: Arc<EmbeddingService>,
    semantic_weight: f64,
    name_weight: f64,
    obvious_duplicate_threshold: f64,
}

impl SimilarityScorer {
    pub fn new(embeddings: Arc<EmbeddingService>, config: &SimilarityConfig) -> Self {
        Self {
            embeddings,
            semantic_weight: config.semantic_weight,
            name_weight: config.name_weight,
            obvious_duplicate_threshold: config.obvious_duplicate_threshold,
        }
    }

    /// Name-only score; no I/O
    pub fn name_score(&self, a: &Entity, b: &Entity) -> f64 {
        name_similarity(a.match_name(), b.match_name())
    }

    /// Weighted blend; weights renormalize so that they always sum to one
    pub fn combine(&self, name: f64, semantic: Option<f64>) -> f64 {
        match semantic {
            Some(semantic) => {
                let total = self.name_weight + self.semantic_weight;
                ((self.name_weight * name + self.semantic_weight * semantic) / total).clamp(0.0, 1.0)
            }
            None => name,
        }
    }

    /// Full score between two entities
    pub async fn score(
        &self,
        a: &Entity,
        b: &Entity,
        store: Option<&mut SqliteConnection>,
    ) -> SimilarityScore {
        let name = self.name_score(a, b);
        self.score_with_name(name, &a.match_text(), &b.match_text(), store)
            .await
    }

    /// Full score between two free texts
    pub async fn similarity(
        &self,
        text_a: &str,
        text_b: &str,
        store: Option<&mut SqliteConnection>,
    ) -> SimilarityScore {
        let name = name_similarity(text_a, text_b);
        self.score_with_name(name, text_a, text_b, store).await
    }

    /// Add the semantic component to an already computed name score
    pub async fn score_with_name(
        &self,
        name: f64,
        text_a: &str,
        text_b: &str,
        mut store: Option<&mut SqliteConnection>,
    ) -> SimilarityScore {
        if name >= self.obvious_duplicate_threshold || !self.embeddings.semantic_available() {
            return SimilarityScore::name_only(name);
        }

        let Some(va) = self.embeddings.embed(text_a, store.as_deref_mut()).await else {
            return SimilarityScore::name_only(name);
        };
        let Some(vb) = self.embeddings.embed(text_b, store.as_deref_mut()).await else {
            return SimilarityScore::name_only(name);
        };

        match cosine_similarity(&va, &vb) {
            Some(semantic) => SimilarityScore {
                combined: self.combine(name, Some(semantic)),
                name,
                semantic: Some(semantic),
            },
            None => SimilarityScore::name_only(name),
        }
    }
}
