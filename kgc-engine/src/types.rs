//! Extraction input
//!
//! The extraction stage hands over, per interview, a map from entity-type
//! identifier to a list of loosely typed records. Type keys are validated
//! against the [`EntityType`] whitelist before anything else happens.

use chrono::{DateTime, Utc};
use kgc_common::attributes::value_to_text;
use kgc_common::db::{ConsolidationEnvelope, Entity};
use kgc_common::{EntityAttributes, EntityType, Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// One extracted record: `name` and/or `description`, optional `id`, and
/// any number of attribute keys
pub type RawEntity = Map<String, Value>;

/// Keys of a raw record that are not attributes
const RESERVED_KEYS: &[&str] = &["id", "name", "description", "interview_id"];

/// Namespace for ids derived from extraction input
const ENTITY_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b67_6300_9a4e_4c1b_8f0e_0d1c_5e7a_2b31);

/// Entities extracted from one interview
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewExtraction {
    pub interview_id: String,
    #[serde(default)]
    pub interview_date: Option<DateTime<Utc>>,
    /// Entity-type identifier → records
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<RawEntity>>,
}

impl InterviewExtraction {
    /// Entities keyed by validated type
    pub fn typed_entities(&self) -> Result<BTreeMap<EntityType, Vec<RawEntity>>> {
        let mut typed: BTreeMap<EntityType, Vec<RawEntity>> = BTreeMap::new();
        for (key, records) in &self.entities {
            let entity_type: EntityType = key.parse()?;
            typed
                .entry(entity_type)
                .or_default()
                .extend(records.iter().cloned());
        }
        Ok(typed)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }
}

/// Batch input file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDocument {
    pub interviews: Vec<InterviewExtraction>,
}

impl ExtractionDocument {
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json_str(&content)
    }
}

/// Id for a record without an explicit one; stable across runs
pub fn derived_entity_id(
    entity_type: EntityType,
    interview_id: &str,
    position: usize,
    name: &str,
) -> String {
    let key = format!("{}/{}/{}/{}", entity_type.as_str(), interview_id, position, name);
    Uuid::new_v5(&ENTITY_ID_NAMESPACE, key.as_bytes()).to_string()
}

/// Convert a raw record into a single-source entity
pub fn entity_from_raw(
    entity_type: EntityType,
    raw: &RawEntity,
    interview_id: &str,
    interview_date: Option<DateTime<Utc>>,
    position: usize,
) -> Result<Entity> {
    let text = |key: &str| raw.get(key).and_then(value_to_text).unwrap_or_default();
    let name = text("name");
    let description = text("description");

    if name.is_empty() && description.is_empty() {
        return Err(Error::InvalidInput(format!(
            "{} #{} of interview {} has neither name nor description",
            entity_type, position, interview_id
        )));
    }

    let id = match raw.get("id").and_then(value_to_text) {
        Some(id) => id,
        None => derived_entity_id(entity_type, interview_id, position, &name),
    };

    let attributes: Map<String, Value> = raw
        .iter()
        .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(Entity {
        id,
        name,
        description,
        attributes: EntityAttributes::from_map(entity_type, attributes)?,
        origin_interview_id: interview_id.to_string(),
        envelope: ConsolidationEnvelope::single_source(interview_id, interview_date),
    })
}
