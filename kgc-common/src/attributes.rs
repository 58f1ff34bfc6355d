//! Typed, per-entity-type attribute payloads
//!
//! Each entity type carries a struct of the attributes the extractor is known
//! to produce for it, plus an open map for anything else the extractor emits.
//! Comparison and merging work on the flattened key/value view
//! ([`EntityAttributes::to_map`]) so that every key, known or not, takes part.

use crate::entity_type::EntityType;
use crate::Result;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Deserialize a loosely typed extractor value into an optional string.
///
/// Extractors are inconsistent: the same field arrives as `"3"`, `3` or
/// `["a", "b"]` depending on the interview. Null and blank strings are absent.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| value_to_text(&v)))
}

/// Render a JSON value as attribute text; `None` for null or blank values
pub fn value_to_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(value_to_text)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

macro_rules! entity_attributes {
    ($( $variant:ident => $strukt:ident { $($field:ident),* $(,)? } ),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
            pub struct $strukt {
                $(
                    #[serde(
                        default,
                        deserialize_with = "lenient_string",
                        skip_serializing_if = "Option::is_none"
                    )]
                    pub $field: Option<String>,
                )*
                /// Attributes outside the known field set
                #[serde(flatten)]
                pub extra: BTreeMap<String, Value>,
            }
        )*

        /// Attributes of one entity, tagged by entity type
        #[derive(Debug, Clone, PartialEq)]
        pub enum EntityAttributes {
            $( $variant($strukt), )*
        }

        impl EntityAttributes {
            /// Empty attribute set for the given type
            pub fn empty(entity_type: EntityType) -> Self {
                match entity_type {
                    $( EntityType::$variant => EntityAttributes::$variant($strukt::default()), )*
                }
            }

            /// Entity type this payload belongs to
            pub fn entity_type(&self) -> EntityType {
                match self {
                    $( EntityAttributes::$variant(_) => EntityType::$variant, )*
                }
            }

            /// Build the typed payload from a flat key/value map
            pub fn from_map(entity_type: EntityType, map: Map<String, Value>) -> Result<Self> {
                let value = Value::Object(map);
                Ok(match entity_type {
                    $( EntityType::$variant => EntityAttributes::$variant(serde_json::from_value(value)?), )*
                })
            }

            /// Flattened key/value view (known fields and extras together)
            pub fn to_map(&self) -> Map<String, Value> {
                let value = match self {
                    $( EntityAttributes::$variant(attrs) => serde_json::to_value(attrs), )*
                };
                match value {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                }
            }
        }
    };
}

entity_attributes! {
    PainPoint => PainPointAttributes { severity, frequency, impact, category, affected_area },
    Process => ProcessAttributes { owner, frequency, duration, complexity },
    System => SystemAttributes { vendor, system_type, usage_frequency, satisfaction },
    Kpi => KpiAttributes { metric, target, current_value, unit, frequency },
    AutomationCandidate => AutomationCandidateAttributes { complexity, priority, expected_savings, effort },
    Inefficiency => InefficiencyAttributes { frequency, time_wasted, root_cause },
    CommunicationChannel => CommunicationChannelAttributes { channel_type, frequency, participants },
    DecisionPoint => DecisionPointAttributes { decision_maker, frequency, criteria },
    DataFlow => DataFlowAttributes { source_system, target_system, format, frequency },
    TemporalPattern => TemporalPatternAttributes { period, frequency, peak_time },
    FailureMode => FailureModeAttributes { severity, frequency, recovery_time, root_cause },
    TeamStructure => TeamStructureAttributes { team_size, reports_to, roles },
    KnowledgeGap => KnowledgeGapAttributes { area, impact, training_needed },
    SuccessPattern => SuccessPatternAttributes { area, impact, replicability },
    BudgetConstraint => BudgetConstraintAttributes { amount, currency, period, approval_level },
    ExternalDependency => ExternalDependencyAttributes { provider, dependency_type, criticality },
}

impl Serialize for EntityAttributes {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_map().serialize(serializer)
    }
}

impl EntityAttributes {
    /// Attribute keys with a non-null value
    pub fn present_keys(&self) -> Vec<String> {
        self.to_map()
            .into_iter()
            .filter(|(_, v)| value_to_text(v).is_some())
            .map(|(k, _)| k)
            .collect()
    }
}
