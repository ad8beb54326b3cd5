//! Provenance tags: how a stored variable was derived.
//!
//! Every variable the micro-batch executor writes carries a record linking it
//! back to the operation that produced it.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// How a stored collection was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivationKind {
    /// Items rewritten or filtered by the reasoning service.
    Transformed,
    /// Items tagged with a category by the reasoning service.
    Classified,
    /// Per-value counts computed locally.
    Counted,
    /// Groups of items computed locally.
    Aggregated,
}

/// A single provenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// How the collection was derived.
    pub kind: DerivationKind,
    /// Name of the operation that produced it.
    pub operation: String,
    /// Human-readable description, e.g. `Processed data from classify command`.
    pub description: String,
    /// Number of items in the collection at write time.
    pub item_count: usize,
    /// Timestamp (seconds since UNIX epoch).
    pub timestamp: u64,
}

impl Provenance {
    /// Provenance for the output of a batch operation.
    pub fn for_operation(kind: DerivationKind, operation: &str, item_count: usize) -> Self {
        Self {
            kind,
            operation: operation.to_string(),
            description: format!("Processed data from {operation} command"),
            item_count,
            timestamp: now_secs(),
        }
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
