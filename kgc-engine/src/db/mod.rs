//! Database access for the consolidation store
//!
//! Every function takes `&mut SqliteConnection` so the same code runs on a
//! pooled connection or inside an open transaction.

pub mod audit;
pub mod embeddings;
pub mod entities;
pub mod interviews;
pub mod patterns;
pub mod relationships;

use chrono::{DateTime, Utc};

/// Timestamps are stored as RFC 3339 text
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a stored timestamp; unparseable values read as absent
pub(crate) fn parse_timestamp(text: Option<String>) -> Option<DateTime<Utc>> {
    let text = text?;
    match DateTime::parse_from_rfc3339(&text) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            tracing::warn!("Ignoring unparseable timestamp '{}': {}", text, e);
            None
        }
    }
}
