use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    helpers::{format_timestamp, into_row_error, parse_datetime, to_i64, to_u64},
    models::{Snapshot, TargetSummary},
    Database,
};

/// Append-only history of observed page states.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Digest of the most recent snapshot for `target_url`, or `None` when
    /// the target has never been recorded.
    async fn latest_digest(&self, target_url: &str) -> Result<Option<String>>;

    /// Durably records a new snapshot. Prior rows are never touched.
    async fn append(
        &self,
        target_url: &str,
        digest: &str,
        content: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<()>;
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    let observed_at: String = row.get(4)?;
    Ok(Snapshot {
        id: row.get(0)?,
        target_url: row.get(1)?,
        digest: row.get(2)?,
        content: row.get(3)?,
        observed_at: parse_datetime(&observed_at, "observed_at").map_err(into_row_error)?,
    })
}

#[async_trait]
impl SnapshotStore for Database {
    async fn latest_digest(&self, target_url: &str) -> Result<Option<String>> {
        let target_url = target_url.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT digest FROM snapshots
                 WHERE target_url = ?1
                 ORDER BY observed_at DESC, id DESC
                 LIMIT 1",
                params![target_url],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read latest digest for {target_url}"))
        })
        .await
    }

    async fn append(
        &self,
        target_url: &str,
        digest: &str,
        content: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<()> {
        let target_url = target_url.to_string();
        let digest = digest.to_string();
        let content = content.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO snapshots (target_url, digest, content, observed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![target_url, digest, content, format_timestamp(&observed_at)],
            )
            .with_context(|| format!("failed to insert snapshot for {target_url}"))?;
            Ok(())
        })
        .await
    }
}

impl Database {
    pub async fn latest_snapshot(&self, target_url: &str) -> Result<Option<Snapshot>> {
        let target_url = target_url.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT id, target_url, digest, content, observed_at
                 FROM snapshots
                 WHERE target_url = ?1
                 ORDER BY observed_at DESC, id DESC
                 LIMIT 1",
                params![target_url],
                snapshot_from_row,
            )
            .optional()
            .with_context(|| format!("failed to read latest snapshot for {target_url}"))
        })
        .await
    }

    /// Newest-first history for one target.
    pub async fn snapshot_history(&self, target_url: &str, limit: usize) -> Result<Vec<Snapshot>> {
        let target_url = target_url.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, target_url, digest, content, observed_at
                 FROM snapshots
                 WHERE target_url = ?1
                 ORDER BY observed_at DESC, id DESC
                 LIMIT ?2",
            )?;

            let rows = stmt.query_map(params![target_url, to_i64(limit)?], snapshot_from_row)?;

            let mut snapshots = Vec::new();
            for row in rows {
                snapshots.push(row.context("failed to decode snapshot row")?);
            }
            Ok(snapshots)
        })
        .await
    }

    pub async fn tracked_targets(&self) -> Result<Vec<TargetSummary>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT target_url, COUNT(*), MIN(observed_at), MAX(observed_at)
                 FROM snapshots
                 GROUP BY target_url
                 ORDER BY target_url ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut targets = Vec::new();
            while let Some(row) = rows.next()? {
                targets.push(TargetSummary {
                    target_url: row.get(0)?,
                    snapshot_count: to_u64(row.get::<_, i64>(1)?, "snapshot_count")?,
                    first_observed_at: parse_datetime(&row.get::<_, String>(2)?, "first_observed_at")?,
                    last_observed_at: parse_datetime(&row.get::<_, String>(3)?, "last_observed_at")?,
                });
            }

            Ok(targets)
        })
        .await
    }
}
