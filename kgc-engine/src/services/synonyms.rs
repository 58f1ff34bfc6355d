//! Attribute value synonyms
//!
//! Groups of interchangeable attribute values ("alta" / "high" / "critical").
//! Values are compared after folding (lowercase, accents stripped), so the
//! table only needs one spelling per word. A deployment can replace the
//! built-in table with a TOML file:
//!
//! ```toml
//! groups = [
//!     ["alta", "high", "critica"],
//!     ["diario", "daily"],
//! ]
//! ```

use crate::utils::text::normalize;
use kgc_common::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const BUILTIN_GROUPS: &[&[&str]] = &[
    &["alta", "alto", "high", "critica", "critico", "critical", "severe", "grave"],
    &["media", "medio", "medium", "moderada", "moderado", "moderate"],
    &["baja", "bajo", "low", "leve", "minor"],
    &["diario", "diaria", "daily", "cada dia", "todos los dias"],
    &["semanal", "weekly", "cada semana"],
    &["mensual", "monthly", "cada mes"],
    &["anual", "yearly", "annual", "cada ano"],
    &["manual", "a mano", "by hand"],
    &["automatico", "automatica", "automated", "automatic"],
    &["si", "yes", "true"],
    &["no", "false"],
];

#[derive(Debug, Deserialize)]
struct SynonymFile {
    groups: Vec<Vec<String>>,
}

/// Value → canonical form lookup
#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    canonical: HashMap<String, String>,
}

impl SynonymTable {
    /// Bilingual (Spanish/English) default groups
    pub fn builtin() -> Self {
        Self::from_groups(
            BUILTIN_GROUPS
                .iter()
                .map(|group| group.iter().map(|s| s.to_string()).collect()),
        )
    }

    /// Build from explicit groups; the first member of a group is canonical
    pub fn from_groups<I>(groups: I) -> Self
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let mut canonical = HashMap::new();
        for group in groups {
            let mut members = group.iter().map(|v| normalize(v)).filter(|v| !v.is_empty());
            let Some(head) = members.next() else {
                continue;
            };
            canonical.insert(head.clone(), head.clone());
            for member in members {
                canonical.insert(member, head.clone());
            }
        }
        Self { canonical }
    }

    /// Load a TOML synonym file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: SynonymFile = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("Invalid synonym file {}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), groups = file.groups.len(), "Loaded synonym table");
        Ok(Self::from_groups(file.groups))
    }

    /// Table from the configured path, or the built-in one
    pub fn from_config_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Canonical form of `value`; unknown values map to their normalized form
    pub fn canonical(&self, value: &str) -> String {
        let normalized = normalize(value);
        self.canonical
            .get(&normalized)
            .cloned()
            .unwrap_or(normalized)
    }

    pub fn equivalent(&self, a: &str, b: &str) -> bool {
        self.canonical(a) == self.canonical(b)
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }
}
