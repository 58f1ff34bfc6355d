//! Persisted record models
//!
//! [`Entity`] composes three parts: identity/text, the typed attribute payload,
//! and the [`ConsolidationEnvelope`] shared by every entity type.

use crate::attributes::EntityAttributes;
use crate::entity_type::EntityType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum description characters used for matching text
pub const MATCH_DESCRIPTION_CHARS: usize = 200;

/// One detected disagreement between two sources for the same attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub attribute: String,
    /// `[existing_value, new_value]`
    pub values: Vec<Value>,
    pub similarity_score: f64,
    /// Interview ids that contributed either value
    pub sources: Vec<String>,
}

/// Provenance and consensus state carried by every entity
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConsolidationEnvelope {
    /// Ordered, deduplicated interview ids
    pub mentioned_in_interviews: Vec<String>,
    /// Always `mentioned_in_interviews.len()`
    pub source_count: i64,
    pub consensus_confidence: f64,
    pub is_consolidated: bool,
    pub has_contradictions: bool,
    pub contradiction_details: Vec<Contradiction>,
    /// Ids absorbed into this record (audit trail)
    pub merged_entity_ids: Vec<String>,
    /// Attribute comparisons that agreed across merges
    pub attribute_agreements: i64,
    pub first_mentioned_date: Option<DateTime<Utc>>,
    pub last_mentioned_date: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub embedding_vector: Option<Vec<f32>>,
}

impl ConsolidationEnvelope {
    /// Envelope for an entity seen in exactly one interview
    pub fn single_source(interview_id: &str, date: Option<DateTime<Utc>>) -> Self {
        Self {
            mentioned_in_interviews: vec![interview_id.to_string()],
            source_count: 1,
            first_mentioned_date: date,
            last_mentioned_date: date,
            ..Default::default()
        }
    }

    /// Add an interview id if absent; returns true if it was new
    pub fn add_interview(&mut self, interview_id: &str) -> bool {
        if self.mentioned_in_interviews.iter().any(|i| i == interview_id) {
            return false;
        }
        self.mentioned_in_interviews.push(interview_id.to_string());
        self.source_count = self.mentioned_in_interviews.len() as i64;
        true
    }

    pub fn mentions(&self, interview_id: &str) -> bool {
        self.mentioned_in_interviews.iter().any(|i| i == interview_id)
    }
}

/// A consolidated business concept
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    /// Immutable after creation
    pub id: String,
    pub name: String,
    pub description: String,
    pub attributes: EntityAttributes,
    /// Interview that first produced this entity
    pub origin_interview_id: String,
    #[serde(flatten)]
    pub envelope: ConsolidationEnvelope,
}

impl Entity {
    pub fn entity_type(&self) -> EntityType {
        self.attributes.entity_type()
    }

    /// Name used for fuzzy matching; falls back to the description
    pub fn match_name(&self) -> &str {
        if self.name.trim().is_empty() {
            self.description.trim()
        } else {
            self.name.trim()
        }
    }

    /// Name plus truncated description, used as embedding input
    pub fn match_text(&self) -> String {
        let name = self.name.trim();
        let description: String = self
            .description
            .trim()
            .chars()
            .take(MATCH_DESCRIPTION_CHARS)
            .collect();

        match (name.is_empty(), description.is_empty()) {
            (false, false) => format!("{name}: {description}"),
            (false, true) => name.to_string(),
            (true, _) => description,
        }
    }
}

/// Directed, typed edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub source_id: String,
    pub source_type: EntityType,
    pub target_id: String,
    pub target_type: EntityType,
    pub relationship_type: String,
    pub strength: f64,
    pub mentioned_in_interviews: Vec<String>,
}

/// Append-only record of a merge decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    pub entity_type: EntityType,
    pub interview_id: String,
    pub merged_entity_ids: Vec<String>,
    pub resulting_entity_id: String,
    pub similarity_score: f64,
    pub consolidation_timestamp: DateTime<Utc>,
    pub rollback_timestamp: Option<DateTime<Utc>>,
    pub rollback_reason: Option<String>,
}

/// Derived recurrence flag for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_type: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub entity_name: String,
    pub pattern_frequency: f64,
    pub source_count: i64,
    pub high_priority: bool,
    pub description: String,
}

/// Interview registered in the corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewRecord {
    pub interview_id: String,
    pub interview_date: Option<DateTime<Utc>>,
    pub consolidated_at: DateTime<Utc>,
    pub entity_count: i64,
}

/// Encode an embedding as little-endian f32 bytes
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes; `None` if the length is not a multiple of 4
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
