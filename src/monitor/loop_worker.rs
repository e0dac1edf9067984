use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{db::SnapshotStore, notify::Notifier, settings::Target};

use super::{clock::Clock, digest::compute_digest, fetcher::PageFetcher};

/// What happened to one target during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    /// First observation stored; nothing to compare against.
    Baseline,
    Unchanged,
    /// New state stored and the alert delivered.
    Changed,
    /// New state stored but the alert could not be sent.
    NotifyFailed,
    FetchFailed,
    StoreFailed,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub baseline: usize,
    pub unchanged: usize,
    pub changed: usize,
    pub notify_failed: usize,
    pub fetch_failed: usize,
    pub store_failed: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: TargetOutcome) {
        match outcome {
            TargetOutcome::Baseline => self.baseline += 1,
            TargetOutcome::Unchanged => self.unchanged += 1,
            TargetOutcome::Changed => self.changed += 1,
            TargetOutcome::NotifyFailed => self.notify_failed += 1,
            TargetOutcome::FetchFailed => self.fetch_failed += 1,
            TargetOutcome::StoreFailed => self.store_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.baseline
            + self.unchanged
            + self.changed
            + self.notify_failed
            + self.fetch_failed
            + self.store_failed
    }
}

/// Fetch → digest → compare → persist → notify, for every configured target.
pub struct Monitor {
    targets: Vec<Target>,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl Monitor {
    pub fn new(
        targets: Vec<Target>,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            targets,
            fetcher,
            store,
            notifier,
            clock,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// One pass over all targets, strictly in order. A failure on one target
    /// never stops the others.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        for target in &self.targets {
            let outcome = self.check_target(target).await;
            debug!("{} -> {:?}", target.url, outcome);
            report.record(outcome);
        }
        report
    }

    pub async fn check_target(&self, target: &Target) -> TargetOutcome {
        let content = match self.fetcher.fetch(&target.url).await {
            Ok(content) => content,
            Err(err) => {
                warn!("Skipping {} this cycle: {err}", target.url);
                return TargetOutcome::FetchFailed;
            }
        };

        let digest = compute_digest(&content);

        let previous = match self.store.latest_digest(&target.url).await {
            Ok(previous) => previous,
            Err(err) => {
                error!("Could not read history for {}: {err:#}", target.url);
                return TargetOutcome::StoreFailed;
            }
        };

        match previous {
            None => {
                if let Err(err) = self.persist(target, &digest, &content).await {
                    error!("Failed to store baseline for {}: {err:#}", target.url);
                    return TargetOutcome::StoreFailed;
                }
                info!("Recorded baseline for {}", target.url);
                TargetOutcome::Baseline
            }
            Some(previous) if previous == digest => {
                debug!("No change for {}", target.url);
                TargetOutcome::Unchanged
            }
            Some(_) => {
                // Persist first: a crash before the alert must not cause a
                // second alert for the same state on the next run.
                if let Err(err) = self.persist(target, &digest, &content).await {
                    error!("Failed to store snapshot for {}: {err:#}", target.url);
                    return TargetOutcome::StoreFailed;
                }
                info!("Content change detected for {}", target.url);

                match self.notifier.send(target, &content).await {
                    Ok(()) => TargetOutcome::Changed,
                    Err(err) => {
                        error!("Error sending alert for {}: {err:#}", target.url);
                        TargetOutcome::NotifyFailed
                    }
                }
            }
        }
    }

    async fn persist(&self, target: &Target, digest: &str, content: &str) -> anyhow::Result<()> {
        self.store
            .append(&target.url, digest, content, self.clock.now())
            .await
    }
}

/// Runs cycles on a fixed cadence until `cancel_token` fires. The first cycle
/// starts immediately; a cycle that overruns the interval pushes the next
/// tick back instead of bunching ticks up.
pub async fn monitor_loop(monitor: Monitor, interval: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cycles: u64 = 0;

    info!(
        "Starting monitor for {} target(s) with {}s interval",
        monitor.targets().len(),
        interval.as_secs()
    );

    loop {
        // Cancellation wins over a tick that is already due, e.g. after an
        // overrunning cycle.
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                info!("Monitor loop shutting down after {} cycle(s)", cycles);
                break;
            }
            _ = ticker.tick() => {
                cycles += 1;
                let started = Instant::now();

                let report = monitor.run_cycle().await;

                info!(
                    "Cycle {} finished in {}ms: {} baseline, {} unchanged, {} changed, {} notify failed, {} fetch failed, {} store failed",
                    cycles,
                    started.elapsed().as_millis(),
                    report.baseline,
                    report.unchanged,
                    report.changed,
                    report.notify_failed,
                    report.fetch_failed,
                    report.store_failed,
                );
            }
        }
    }
}
