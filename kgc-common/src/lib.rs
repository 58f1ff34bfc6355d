//! # kgc common library
//!
//! Shared code for the knowledge-graph consolidation engine:
//! - Error type
//! - Configuration loading
//! - Entity type whitelist and typed attribute payloads
//! - Persisted record models and schema initialization

pub mod attributes;
pub mod config;
pub mod db;
pub mod entity_type;
pub mod error;

pub use attributes::EntityAttributes;
pub use config::ConsolidationConfig;
pub use entity_type::EntityType;
pub use error::{Error, Result};
