//! Closed set of entity types extracted from interviews
//!
//! Every entity type maps at compile time to exactly one storage table. Type
//! identifiers arriving as strings (extractor output, CLI arguments, config
//! keys) must pass through [`EntityType::from_str`] before they can reach a
//! query; no other path produces a table name.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity type whitelist
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    PainPoint,
    Process,
    System,
    Kpi,
    AutomationCandidate,
    Inefficiency,
    CommunicationChannel,
    DecisionPoint,
    DataFlow,
    TemporalPattern,
    FailureMode,
    TeamStructure,
    KnowledgeGap,
    SuccessPattern,
    BudgetConstraint,
    ExternalDependency,
}

impl EntityType {
    /// All entity types in processing order
    pub const ALL: [EntityType; 16] = [
        EntityType::PainPoint,
        EntityType::Process,
        EntityType::System,
        EntityType::Kpi,
        EntityType::AutomationCandidate,
        EntityType::Inefficiency,
        EntityType::CommunicationChannel,
        EntityType::DecisionPoint,
        EntityType::DataFlow,
        EntityType::TemporalPattern,
        EntityType::FailureMode,
        EntityType::TeamStructure,
        EntityType::KnowledgeGap,
        EntityType::SuccessPattern,
        EntityType::BudgetConstraint,
        EntityType::ExternalDependency,
    ];

    /// Identifier used in configuration, input documents and audit records
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::PainPoint => "pain_point",
            EntityType::Process => "process",
            EntityType::System => "system",
            EntityType::Kpi => "kpi",
            EntityType::AutomationCandidate => "automation_candidate",
            EntityType::Inefficiency => "inefficiency",
            EntityType::CommunicationChannel => "communication_channel",
            EntityType::DecisionPoint => "decision_point",
            EntityType::DataFlow => "data_flow",
            EntityType::TemporalPattern => "temporal_pattern",
            EntityType::FailureMode => "failure_mode",
            EntityType::TeamStructure => "team_structure",
            EntityType::KnowledgeGap => "knowledge_gap",
            EntityType::SuccessPattern => "success_pattern",
            EntityType::BudgetConstraint => "budget_constraint",
            EntityType::ExternalDependency => "external_dependency",
        }
    }

    /// Storage table backing this entity type
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::PainPoint => "pain_points",
            EntityType::Process => "processes",
            EntityType::System => "systems",
            EntityType::Kpi => "kpis",
            EntityType::AutomationCandidate => "automation_candidates",
            EntityType::Inefficiency => "inefficiencies",
            EntityType::CommunicationChannel => "communication_channels",
            EntityType::DecisionPoint => "decision_points",
            EntityType::DataFlow => "data_flows",
            EntityType::TemporalPattern => "temporal_patterns",
            EntityType::FailureMode => "failure_modes",
            EntityType::TeamStructure => "team_structures",
            EntityType::KnowledgeGap => "knowledge_gaps",
            EntityType::SuccessPattern => "success_patterns",
            EntityType::BudgetConstraint => "budget_constraints",
            EntityType::ExternalDependency => "external_dependencies",
        }
    }

    /// Valid identifiers, for error messages
    pub fn valid_identifiers() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.as_str()).collect()
    }
}

impl FromStr for EntityType {
    type Err = Error;

    /// Accepts the identifier (`pain_point`) or the table name (`pain_points`),
    /// case-insensitively. Anything else is rejected.
    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle || t.table_name() == needle)
            .ok_or_else(|| Error::UnknownEntityType {
                given: s.to_string(),
                valid: Self::valid_identifiers(),
            })
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_identifiers_and_tables_unique() {
        let ids: HashSet<_> = EntityType::ALL.iter().map(|t| t.as_str()).collect();
        let tables: HashSet<_> = EntityType::ALL.iter().map(|t| t.table_name()).collect();
        assert_eq!(ids.len(), 16);
        assert_eq!(tables.len(), 16);
    }

    #[test]
    fn test_parse_identifier_and_table_name() {
        assert_eq!("system".parse::<EntityType>().unwrap(), EntityType::System);
        assert_eq!("pain_points".parse::<EntityType>().unwrap(), EntityType::PainPoint);
        assert_eq!(" KPI ".parse::<EntityType>().unwrap(), EntityType::Kpi);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let err = "systems; DROP TABLE systems".parse::<EntityType>().unwrap_err();
        match err {
            Error::UnknownEntityType { given, valid } => {
                assert_eq!(given, "systems; DROP TABLE systems");
                assert_eq!(valid.len(), 16);
                assert!(valid.contains(&"pain_point"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_serde_matches_identifier() {
        for t in EntityType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_ordering_follows_declaration() {
        let mut shuffled = vec![EntityType::Kpi, EntityType::PainPoint, EntityType::System];
        shuffled.sort();
        assert_eq!(
            shuffled,
            vec![EntityType::PainPoint, EntityType::System, EntityType::Kpi]
        );
    }
}
