//! Relationship discovery
//!
//! Batch pass over consolidated entities. For every configured
//! `(source type, target type, relationship)` rule, an edge is proposed when
//! the source entity's name appears as a whole phrase in the target's name or
//! description, or the target's name appears in the source's description.
//! Edges are upserted, so repeated passes never duplicate them.

use crate::db::{entities, relationships};
use crate::db::relationships::UpsertOutcome;
use crate::utils::pool_monitor::begin_monitored;
use crate::utils::text::{contains_phrase, normalize};
use kgc_common::config::RelationshipConfig;
use kgc_common::db::{Entity, Relationship};
use kgc_common::{EntityType, Result};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

const RELATIONSHIP_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6b67_6300_52e1_4d7a_b0c4_7f3e_91d2_08a5);

/// Counts for one discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub candidates: usize,
    pub created: usize,
    pub strengthened: usize,
    pub unchanged: usize,
}

/// Stable edge id for a `(source, target, relationship)` triple
pub fn relationship_id(source_id: &str, target_id: &str, relationship_type: &str) -> String {
    let key = format!("{source_id}|{target_id}|{relationship_type}");
    Uuid::new_v5(&RELATIONSHIP_ID_NAMESPACE, key.as_bytes()).to_string()
}

pub struct RelationshipDiscoverer {
    pool: SqlitePool,
    config: RelationshipConfig,
    write_lock: Arc<Mutex<()>>,
}

impl RelationshipDiscoverer {
    pub fn new(pool: SqlitePool, config: RelationshipConfig, write_lock: Arc<Mutex<()>>) -> Self {
        Self {
            pool,
            config,
            write_lock,
        }
    }

    fn name_usable(&self, name: &str) -> bool {
        normalize(name).chars().count() >= self.config.min_name_chars
    }

    /// True when `source` and `target` mention each other
    pub fn mentions(&self, source: &Entity, target: &Entity) -> bool {
        if source.id == target.id {
            return false;
        }

        let source_in_target = self.name_usable(&source.name)
            && contains_phrase(&format!("{} {}", target.name, target.description), &source.name);
        let target_in_source = self.name_usable(&target.name)
            && contains_phrase(&source.description, &target.name);

        source_in_target || target_in_source
    }

    /// Interviews both entities share, or all of them when they share none
    fn contributing_interviews(source: &Entity, target: &Entity) -> Vec<String> {
        let src = &source.envelope.mentioned_in_interviews;
        let tgt = &target.envelope.mentioned_in_interviews;

        let shared: Vec<String> = src.iter().filter(|i| tgt.contains(i)).cloned().collect();
        if !shared.is_empty() {
            return shared;
        }

        let mut all = src.clone();
        for id in tgt {
            if !all.contains(id) {
                all.push(id.clone());
            }
        }
        all
    }

    /// Proposed edges for the given entities; no I/O
    pub fn discover(&self, by_type: &BTreeMap<EntityType, Vec<Entity>>) -> Vec<Relationship> {
        let empty = Vec::new();
        let mut found = Vec::new();
        let mut seen = BTreeSet::new();

        for rule in &self.config.rules {
            let sources = by_type.get(&rule.source_type).unwrap_or(&empty);
            let targets = by_type.get(&rule.target_type).unwrap_or(&empty);

            for source in sources {
                for target in targets {
                    if !self.mentions(source, target) {
                        continue;
                    }
                    if !seen.insert((source.id.clone(), target.id.clone(), rule.relationship_type.clone())) {
                        continue;
                    }
                    found.push(Relationship {
                        id: relationship_id(&source.id, &target.id, &rule.relationship_type),
                        source_id: source.id.clone(),
                        source_type: rule.source_type,
                        target_id: target.id.clone(),
                        target_type: rule.target_type,
                        relationship_type: rule.relationship_type.clone(),
                        strength: self.config.default_strength,
                        mentioned_in_interviews: Self::contributing_interviews(source, target),
                    });
                }
            }
        }

        found
    }

    /// Discover and upsert edges over the whole store
    pub async fn run(&self) -> Result<DiscoveryReport> {
        let _writer = self.write_lock.lock().await;
        let mut tx = begin_monitored(&self.pool, "relationships::discover").await?;

        let report = {
            let conn = tx.conn()?;

            let wanted: BTreeSet<EntityType> = self
                .config
                .rules
                .iter()
                .flat_map(|r| [r.source_type, r.target_type])
                .collect();
            let mut by_type = BTreeMap::new();
            for entity_type in wanted {
                by_type.insert(entity_type, entities::fetch_all(conn, entity_type).await?);
            }

            let proposed = self.discover(&by_type);
            let mut report = DiscoveryReport {
                candidates: proposed.len(),
                ..Default::default()
            };
            for relationship in &proposed {
                match relationships::upsert(conn, relationship, self.config.strength_policy).await? {
                    UpsertOutcome::Created => report.created += 1,
                    UpsertOutcome::Strengthened => report.strengthened += 1,
                    UpsertOutcome::Unchanged => report.unchanged += 1,
                }
            }
            report
        };

        tx.commit().await?;
        info!(
            candidates = report.candidates,
            created = report.created,
            strengthened = report.strengthened,
            "Relationship discovery complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgc_common::db::ConsolidationEnvelope;
    use kgc_common::EntityAttributes;

    fn entity(entity_type: EntityType, id: &str, name: &str, description: &str, interviews: &[&str]) -> Entity {
        let mut envelope = ConsolidationEnvelope::single_source(interviews[0], None);
        for i in &interviews[1..] {
            envelope.add_interview(i);
        }
        Entity {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            attributes: EntityAttributes::empty(entity_type),
            origin_interview_id: interviews[0].into(),
            envelope,
        }
    }

    async fn discoverer() -> RelationshipDiscoverer {
        let pool = kgc_common::db::init_memory_database().await.unwrap();
        RelationshipDiscoverer::new(pool, RelationshipConfig::default(), Arc::new(Mutex::new(())))
    }

    #[tokio::test]
    async fn test_system_causes_pain_point() {
        let d = discoverer().await;
        let by_type = BTreeMap::from([
            (
                EntityType::System,
                vec![entity(EntityType::System, "sys", "SAP", "", &["int-1", "int-2"])],
            ),
            (
                EntityType::PainPoint,
                vec![
                    entity(EntityType::PainPoint, "pp1", "Caídas", "Las caídas de SAP frenan la facturación", &["int-2"]),
                    entity(EntityType::PainPoint, "pp2", "Sapos", "Nada que ver", &["int-3"]),
                ],
            ),
        ]);

        let edges = d.discover(&by_type);
        assert_eq!(edges.len(), 1);
        let edge = &edges[0];
        assert_eq!((edge.source_id.as_str(), edge.target_id.as_str()), ("sys", "pp1"));
        assert_eq!(edge.relationship_type, "causes");
        assert_eq!(edge.strength, 0.8);
        assert_eq!(edge.mentioned_in_interviews, vec!["int-2"]);
        assert_eq!(edge.id, relationship_id("sys", "pp1", "causes"));
    }

    #[tokio::test]
    async fn test_short_names_ignored() {
        let d = discoverer().await;
        let by_type = BTreeMap::from([
            (EntityType::System, vec![entity(EntityType::System, "sys", "IT", "", &["int-1"])]),
            (
                EntityType::PainPoint,
                vec![entity(EntityType::PainPoint, "pp", "Tickets", "IT tarda en responder", &["int-2"])],
            ),
        ]);
        assert!(d.discover(&by_type).is_empty());
    }

    #[tokio::test]
    async fn test_disjoint_interviews_use_union() {
        let d = discoverer().await;
        let by_type = BTreeMap::from([
            (EntityType::Process, vec![entity(EntityType::Process, "p", "Cierre mensual", "Se hace en Excel", &["int-1"])]),
            (EntityType::System, vec![entity(EntityType::System, "s", "Excel", "", &["int-2"])]),
        ]);

        let edges = d.discover(&by_type);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relationship_type, "uses");
        assert_eq!(edges[0].mentioned_in_interviews, vec!["int-1", "int-2"]);
    }
}
