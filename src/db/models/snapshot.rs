//! Snapshot data model.
//!
//! One persisted observation of a watched page.

use chrono::{DateTime, Utc};

/// A single observed state of a target, as stored in the `snapshots` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub id: i64,
    pub target_url: String,
    pub digest: String,
    pub content: String,
    pub observed_at: DateTime<Utc>,
}

/// Per-target rollup of the stored history.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetSummary {
    pub target_url: String,
    pub snapshot_count: u64,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
}
