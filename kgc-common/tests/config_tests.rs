//! Configuration loading, resolution and validation

use kgc_common::config::{
    resolve_config_path, ConsolidationConfig, StrengthPolicy, CONFIG_ENV_VAR,
};
use kgc_common::{EntityType, Error};
use serial_test::serial;
use std::io::Write;
use std::path::Path;

#[test]
fn test_empty_file_yields_defaults() {
    let config = ConsolidationConfig::from_toml_str("").unwrap();
    assert_eq!(config, ConsolidationConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
fn test_defaults_match_documented_constants() {
    let config = ConsolidationConfig::default();
    assert_eq!(config.similarity.threshold_for(EntityType::Inefficiency), 0.85);
    assert_eq!(config.similarity.max_candidates, 10);
    assert_eq!(config.consensus.agreement_bonus_per_attribute, 0.1);
    assert_eq!(config.consensus.max_agreement_bonus, 0.3);
    assert_eq!(config.consensus.penalty_per_contradiction, 0.25);
    assert_eq!(config.consensus.single_source_penalty, 0.3);
    assert_eq!(config.patterns.recurring_threshold, 3);
    assert_eq!(config.embedding.failure_threshold, 10);
    assert_eq!(config.embedding.max_attempts, 3);
    assert_eq!(config.relationships.strength_policy, StrengthPolicy::Max);
}

#[test]
fn test_partial_file_overrides_only_named_fields() {
    let toml = r#"
        [similarity]
        default_threshold = 0.9

        [similarity.thresholds]
        system = 0.75

        [relationships]
        strength_policy = "average"

        [[relationships.rules]]
        source_type = "system"
        target_type = "pain_point"
        relationship_type = "causes"
    "#;

    let config = ConsolidationConfig::from_toml_str(toml).unwrap();
    config.validate().unwrap();

    assert_eq!(config.similarity.threshold_for(EntityType::System), 0.75);
    assert_eq!(config.similarity.threshold_for(EntityType::DataFlow), 0.9);
    assert_eq!(config.similarity.semantic_weight, 0.7);
    assert_eq!(config.relationships.strength_policy, StrengthPolicy::Average);
    assert_eq!(config.relationships.rules.len(), 1);
    assert_eq!(config.merge.contradiction_threshold, 0.7);
}

#[test]
fn test_threshold_key_aliases_resolve_to_entity_type() {
    let toml = r#"
        [similarity.thresholds]
        systems = 0.5
        " KPI " = 0.6
        Pain_Point = 0.7
    "#;
    let config = ConsolidationConfig::from_toml_str(toml).unwrap();
    config.validate().unwrap();

    assert_eq!(config.similarity.threshold_for(EntityType::System), 0.5);
    assert_eq!(config.similarity.threshold_for(EntityType::Kpi), 0.6);
    assert_eq!(config.similarity.threshold_for(EntityType::PainPoint), 0.7);
    assert!(config.similarity.thresholds.contains_key("system"));
    assert!(!config.similarity.thresholds.contains_key("systems"));
}

#[test]
fn test_threshold_lookup_without_canonical_keys() {
    let mut config = ConsolidationConfig::default();
    config.similarity.thresholds.clear();
    config.similarity.thresholds.insert("data_flows".to_string(), 0.55);
    config.validate().unwrap();

    assert_eq!(config.similarity.threshold_for(EntityType::DataFlow), 0.55);
}

#[test]
fn test_duplicate_threshold_aliases_rejected() {
    let toml = r#"
        [similarity.thresholds]
        system = 0.5
        systems = 0.6
    "#;
    assert!(matches!(
        ConsolidationConfig::from_toml_str(toml),
        Err(Error::Config(_))
    ));

    let mut config = ConsolidationConfig::default();
    config.similarity.thresholds.insert("systems".to_string(), 0.6);
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_unknown_threshold_key_rejected() {
    let toml = r#"
        [similarity.thresholds]
        "users; --" = 0.8
    "#;
    let config = ConsolidationConfig::from_toml_str(toml).unwrap();
    match config.validate() {
        Err(Error::UnknownEntityType { given, .. }) => assert_eq!(given, "users; --"),
        other => panic!("expected UnknownEntityType, got {other:?}"),
    }
}

#[test]
fn test_unknown_rule_type_rejected_at_parse() {
    let toml = r#"
        [[relationships.rules]]
        source_type = "customers"
        target_type = "pain_point"
        relationship_type = "causes"
    "#;
    assert!(matches!(
        ConsolidationConfig::from_toml_str(toml),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_out_of_range_values_rejected() {
    let mut config = ConsolidationConfig::default();
    config.similarity.default_threshold = 1.2;
    assert!(matches!(config.validate(), Err(Error::Config(_))));

    let mut config = ConsolidationConfig::default();
    config.similarity.semantic_weight = 0.0;
    config.similarity.name_weight = 0.0;
    assert!(matches!(config.validate(), Err(Error::Config(_))));

    let mut config = ConsolidationConfig::default();
    config.embedding.failure_threshold = 0;
    assert!(matches!(config.validate(), Err(Error::Config(_))));
}

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[patterns]\nrecurring_threshold = 5").unwrap();

    let config = ConsolidationConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.patterns.recurring_threshold, 5);
}

#[test]
fn test_load_missing_file_is_config_error() {
    let result = ConsolidationConfig::load(Some(Path::new("/nonexistent/kgc/config.toml")));
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
#[serial]
fn test_resolution_priority() {
    std::env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let cli = resolve_config_path(Some(Path::new("/tmp/from-cli.toml")));
    assert_eq!(cli.as_deref(), Some(Path::new("/tmp/from-cli.toml")));

    let env = resolve_config_path(None);
    assert_eq!(env.as_deref(), Some(Path::new("/tmp/from-env.toml")));

    std::env::remove_var(CONFIG_ENV_VAR);
}

#[test]
fn test_failure_log_defaults_next_to_database() {
    let mut config = ConsolidationConfig::default();
    config.storage.database_path = Some("/var/lib/kgc/store.db".into());
    assert_eq!(
        config.storage.failure_log_path(),
        Path::new("/var/lib/kgc/consolidation_failures.jsonl")
    );
}
