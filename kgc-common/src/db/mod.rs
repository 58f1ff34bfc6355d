//! Database models and schema initialization

pub mod init;
pub mod models;

pub use init::{create_schema, init_database, init_memory_database};
pub use models::*;
