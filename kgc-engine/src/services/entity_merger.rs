//! Entity merging
//!
//! Folds a newly extracted entity into the existing entity it duplicates.
//! The existing record survives (its id never changes); the new record's id is
//! kept in `merged_entity_ids`.
//!
//! Attributes are compared over the union of keys from both sides. A key
//! present on one side only is adopted as new information. A key present on
//! both sides is compared with fuzzy matching plus the synonym table: at or
//! above `contradiction_threshold` the existing value stays and the attribute
//! counts as agreeing; below it the existing value stays and a
//! [`Contradiction`] is recorded.

use crate::services::synonyms::SynonymTable;
use crate::utils::text::normalize;
use kgc_common::attributes::value_to_text;
use kgc_common::config::MergeConfig;
use kgc_common::db::{Contradiction, Entity};
use kgc_common::{EntityAttributes, Error, Result};
use serde_json::Map;
use std::collections::BTreeSet;
use tracing::debug;

/// Result of one merge
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub entity: Entity,
    /// Contradictions found by this merge
    pub contradictions: Vec<Contradiction>,
    /// Attributes present on both sides that agreed
    pub agreeing_attributes: i64,
}

pub struct EntityMerger {
    synonyms: SynonymTable,
    contradiction_threshold: f64,
    sentence_dedup_threshold: f64,
}

impl EntityMerger {
    pub fn new(config: &MergeConfig, synonyms: SynonymTable) -> Self {
        Self {
            synonyms,
            contradiction_threshold: config.contradiction_threshold,
            sentence_dedup_threshold: config.sentence_dedup_threshold,
        }
    }

    /// Similarity of two attribute values in [0, 1]
    pub fn value_similarity(&self, a: &str, b: &str) -> f64 {
        let (na, nb) = (normalize(a), normalize(b));
        if na == nb || self.synonyms.equivalent(&na, &nb) {
            return 1.0;
        }
        strsim::normalized_levenshtein(&na, &nb)
    }

    /// Merge `new_entity` into `existing`
    pub fn merge(&self, new_entity: &Entity, existing: &Entity) -> Result<MergeOutcome> {
        let entity_type = existing.entity_type();
        if new_entity.entity_type() != entity_type {
            return Err(Error::InvalidInput(format!(
                "cannot merge a {} into a {}",
                new_entity.entity_type(),
                entity_type
            )));
        }

        let mut sources = existing.envelope.mentioned_in_interviews.clone();
        for id in &new_entity.envelope.mentioned_in_interviews {
            if !sources.contains(id) {
                sources.push(id.clone());
            }
        }

        let (attributes, contradictions, agreeing) =
            self.merge_attributes(&existing.attributes, &new_entity.attributes, &sources)?;

        let mut merged = existing.clone();
        merged.attributes = attributes;
        if merged.name.trim().is_empty() {
            merged.name = new_entity.name.clone();
        }
        merged.description = self.combine_descriptions(&existing.description, &new_entity.description);

        let env = &mut merged.envelope;
        env.mentioned_in_interviews = sources;
        env.source_count = env.mentioned_in_interviews.len() as i64;
        env.is_consolidated = true;
        env.attribute_agreements += agreeing;

        let absorbed = std::iter::once(&new_entity.id).chain(&new_entity.envelope.merged_entity_ids);
        for id in absorbed {
            if *id != existing.id && !env.merged_entity_ids.contains(id) {
                env.merged_entity_ids.push(id.clone());
            }
        }

        for contradiction in &contradictions {
            match env
                .contradiction_details
                .iter_mut()
                .find(|c| same_conflict(c, contradiction))
            {
                Some(known) => {
                    for source in &contradiction.sources {
                        if !known.sources.contains(source) {
                            known.sources.push(source.clone());
                        }
                    }
                }
                None => env.contradiction_details.push(contradiction.clone()),
            }
        }
        env.has_contradictions = !env.contradiction_details.is_empty();

        env.first_mentioned_date = earliest(
            existing.envelope.first_mentioned_date,
            new_entity.envelope.first_mentioned_date,
        );
        env.last_mentioned_date = latest(
            existing.envelope.last_mentioned_date,
            new_entity.envelope.last_mentioned_date,
        );

        // The cached vector belongs to the old matching text
        if merged.match_text() != existing.match_text() {
            merged.envelope.embedding_vector = None;
        }

        debug!(
            entity_type = %entity_type,
            survivor = %merged.id,
            absorbed = %new_entity.id,
            contradictions = contradictions.len(),
            agreeing,
            "Merged entity"
        );

        Ok(MergeOutcome {
            entity: merged,
            contradictions,
            agreeing_attributes: agreeing,
        })
    }

    fn merge_attributes(
        &self,
        existing: &EntityAttributes,
        new: &EntityAttributes,
        sources: &[String],
    ) -> Result<(EntityAttributes, Vec<Contradiction>, i64)> {
        let old_map = existing.to_map();
        let new_map = new.to_map();
        let keys: BTreeSet<&String> = old_map.keys().chain(new_map.keys()).collect();

        let mut merged = Map::new();
        let mut contradictions = Vec::new();
        let mut agreeing = 0;

        for key in keys {
            let old_value = old_map.get(key).filter(|v| value_to_text(v).is_some());
            let new_value = new_map.get(key).filter(|v| value_to_text(v).is_some());

            match (old_value, new_value) {
                (Some(old), Some(new)) => {
                    let (old_text, new_text) = (
                        value_to_text(old).unwrap_or_default(),
                        value_to_text(new).unwrap_or_default(),
                    );
                    let similarity = self.value_similarity(&old_text, &new_text);
                    if similarity < self.contradiction_threshold {
                        contradictions.push(Contradiction {
                            attribute: key.clone(),
                            values: vec![old.clone(), new.clone()],
                            similarity_score: similarity,
                            sources: sources.to_vec(),
                        });
                    } else {
                        agreeing += 1;
                    }
                    merged.insert(key.clone(), old.clone());
                }
                (Some(value), None) | (None, Some(value)) => {
                    merged.insert(key.clone(), value.clone());
                }
                (None, None) => {
                    if let Some(value) = old_map.get(key).or_else(|| new_map.get(key)) {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            }
        }

        let attributes = EntityAttributes::from_map(existing.entity_type(), merged)?;
        Ok((attributes, contradictions, agreeing))
    }

    /// Existing description plus the new sentences it does not already contain
    pub fn combine_descriptions(&self, existing: &str, new: &str) -> String {
        let existing = existing.trim();
        let new = new.trim();
        if existing.is_empty() {
            return new.to_string();
        }
        if new.is_empty() {
            return existing.to_string();
        }

        let mut known: Vec<String> = split_sentences(existing).iter().map(|s| normalize(s)).collect();
        let mut added = Vec::new();

        for sentence in split_sentences(new) {
            let normalized = normalize(&sentence);
            if normalized.is_empty() {
                continue;
            }
            let duplicate = known
                .iter()
                .any(|k| strsim::normalized_levenshtein(k, &normalized) >= self.sentence_dedup_threshold);
            if !duplicate {
                known.push(normalized);
                added.push(sentence);
            }
        }

        if added.is_empty() {
            return existing.to_string();
        }

        let mut combined = existing.to_string();
        if !combined.ends_with(['.', '!', '?']) {
            combined.push('.');
        }
        for sentence in added {
            combined.push(' ');
            combined.push_str(&sentence);
        }
        combined
    }
}

/// Same attribute with the same pair of values (in either order)
fn same_conflict(a: &Contradiction, b: &Contradiction) -> bool {
    fn texts(c: &Contradiction) -> BTreeSet<String> {
        c.values
            .iter()
            .filter_map(value_to_text)
            .map(|v| normalize(&v))
            .collect()
    }
    a.attribute == b.attribute && texts(a) == texts(b)
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        if c == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            push_sentence(&mut sentences, &mut current);
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    current.clear();
}

fn earliest<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgc_common::db::ConsolidationEnvelope;
    use kgc_common::EntityType;
    use serde_json::{json, Value};

    fn merger() -> EntityMerger {
        EntityMerger::new(&MergeConfig::default(), SynonymTable::builtin())
    }

    fn pain_point(id: &str, interview: &str, description: &str, attrs: Value) -> Entity {
        let map = match attrs {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Entity {
            id: id.to_string(),
            name: "Facturación manual".to_string(),
            description: description.to_string(),
            attributes: EntityAttributes::from_map(EntityType::PainPoint, map).unwrap(),
            origin_interview_id: interview.to_string(),
            envelope: ConsolidationEnvelope::single_source(interview, None),
        }
    }

    #[test]
    fn test_conflicting_values_flagged() {
        let existing = pain_point("pp-1", "int-1", "", json!({"frequency": "daily"}));
        let new = pain_point("pp-2", "int-2", "", json!({"frequency": "weekly"}));

        let outcome = merger().merge(&new, &existing).unwrap();
        assert_eq!(outcome.contradictions.len(), 1);
        let c = &outcome.contradictions[0];
        assert_eq!(c.attribute, "frequency");
        assert_eq!(c.values, vec![json!("daily"), json!("weekly")]);
        assert_eq!(c.sources, vec!["int-1", "int-2"]);
        assert!(outcome.entity.envelope.has_contradictions);
        // First writer wins
        assert_eq!(outcome.entity.attributes.to_map()["frequency"], json!("daily"));
    }

    #[test]
    fn test_missing_attribute_adopted_not_flagged() {
        let existing = pain_point("pp-1", "int-1", "", json!({"severity": "high"}));
        let new = pain_point("pp-2", "int-2", "", json!({"severity": "high", "impact": "Retrasos"}));

        let outcome = merger().merge(&new, &existing).unwrap();
        assert!(outcome.contradictions.is_empty());
        assert!(!outcome.entity.envelope.has_contradictions);
        assert_eq!(outcome.entity.attributes.to_map()["impact"], json!("Retrasos"));

        // Missing on the new side is equally fine
        let outcome = merger().merge(&existing, &new).unwrap();
        assert!(outcome.contradictions.is_empty());
    }

    #[test]
    fn test_bilingual_synonyms_agree() {
        let existing = pain_point("pp-1", "int-1", "", json!({"severity": "alta", "frequency": "diario"}));
        let new = pain_point("pp-2", "int-2", "", json!({"severity": "High", "frequency": "daily"}));

        let outcome = merger().merge(&new, &existing).unwrap();
        assert!(outcome.contradictions.is_empty());
        assert_eq!(outcome.agreeing_attributes, 2);
        assert_eq!(outcome.entity.envelope.attribute_agreements, 2);
    }

    #[test]
    fn test_unknown_keys_take_part() {
        let existing = pain_point("pp-1", "int-1", "", json!({"owner_team": "Finanzas"}));
        let new = pain_point("pp-2", "int-2", "", json!({"owner_team": "Logística"}));

        let outcome = merger().merge(&new, &existing).unwrap();
        assert_eq!(outcome.contradictions[0].attribute, "owner_team");
    }

    #[test]
    fn test_envelope_updates() {
        let existing = pain_point("pp-1", "int-1", "", json!({}));
        let new = pain_point("pp-2", "int-2", "", json!({}));

        let merged = merger().merge(&new, &existing).unwrap().entity;
        assert_eq!(merged.id, "pp-1");
        assert_eq!(merged.envelope.mentioned_in_interviews, vec!["int-1", "int-2"]);
        assert_eq!(merged.envelope.source_count, 2);
        assert!(merged.envelope.is_consolidated);
        assert_eq!(merged.envelope.merged_entity_ids, vec!["pp-2"]);
    }

    #[test]
    fn test_repeated_conflict_recorded_once() {
        let existing = pain_point("pp-1", "int-1", "", json!({"frequency": "daily"}));
        let second = pain_point("pp-2", "int-2", "", json!({"frequency": "weekly"}));
        let third = pain_point("pp-3", "int-3", "", json!({"frequency": "weekly"}));

        let m = merger();
        let once = m.merge(&second, &existing).unwrap().entity;
        let twice = m.merge(&third, &once).unwrap().entity;
        assert_eq!(twice.envelope.contradiction_details.len(), 1);
        assert_eq!(
            twice.envelope.contradiction_details[0].sources,
            vec!["int-1", "int-2", "int-3"]
        );
    }

    #[test]
    fn test_descriptions_combined_without_duplicates() {
        let m = merger();
        let combined = m.combine_descriptions(
            "Las facturas se cargan a mano. Tarda dos días",
            "Las facturas se cargan a mano! Hay errores frecuentes.",
        );
        assert_eq!(
            combined,
            "Las facturas se cargan a mano. Tarda dos días. Hay errores frecuentes."
        );
        assert_eq!(m.combine_descriptions("Igual.", "igual"), "Igual.");
        assert_eq!(m.combine_descriptions("", "Nuevo."), "Nuevo.");
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let existing = pain_point("pp-1", "int-1", "", json!({}));
        let mut other = existing.clone();
        other.attributes = EntityAttributes::empty(EntityType::System);
        assert!(matches!(merger().merge(&other, &existing), Err(Error::InvalidInput(_))));
    }
}
