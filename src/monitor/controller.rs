use anyhow::{bail, Context, Result};
use log::info;
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use super::loop_worker::{monitor_loop, Monitor};

/// Owns the background monitor task.
pub struct MonitorController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl MonitorController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, monitor: Monitor, interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("monitor already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(monitor_loop(monitor, interval, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Signals the loop and waits for it. A cycle in progress runs to the end.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            info!("Stopping monitor");
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("monitor loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for MonitorController {
    fn default() -> Self {
        Self::new()
    }
}
