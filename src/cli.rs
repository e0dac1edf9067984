use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use crate::{
    db::Database,
    monitor::{Monitor, MonitorController, ProxyFetcher, SystemClock},
    notify::{EmailNotifier, SmtpRelay},
    settings::{Settings, DEFAULT_CONFIG_PATH, DEFAULT_DB_PATH},
};

#[derive(Debug, Parser)]
#[command(version, about = "Watch web pages through a SOCKS5 proxy and mail on change")]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// SQLite snapshot history
    #[arg(long, global = true, default_value = DEFAULT_DB_PATH)]
    pub db: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check all configured pages on the configured interval (default)
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Show stored snapshots
    History {
        /// Target URL; lists all tracked targets when omitted
        url: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Print the stored page content too
        #[arg(long)]
        content: bool,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command.unwrap_or(Command::Run { once: false }) {
        Command::Run { once } => run_monitor(&cli.config, cli.db, once).await,
        Command::History {
            url,
            limit,
            content,
        } => show_history(cli.db, url, limit, content).await,
    }
}

async fn run_monitor(config_path: &std::path::Path, db_path: PathBuf, once: bool) -> Result<()> {
    // Configuration comes first: nothing touches disk or network if it is bad.
    let settings = Settings::load(config_path)?;
    info!(
        "Configuration loaded from {} ({} site(s))",
        config_path.display(),
        settings.sites.len()
    );

    let database = Database::new(db_path).context("failed to initialize snapshot store")?;
    let fetcher = ProxyFetcher::from_settings(&settings)?;
    let relay = SmtpRelay::new(&settings.email)?;
    let notifier = EmailNotifier::new(&settings.email, Box::new(relay))?;

    let monitor = Monitor::new(
        settings.sites.clone(),
        Arc::new(fetcher),
        Arc::new(database),
        Arc::new(notifier),
        Arc::new(SystemClock),
    );

    if once {
        let report = monitor.run_cycle().await;
        info!("Single cycle complete: {report:?}");
        return Ok(());
    }

    let mut controller = MonitorController::new();
    controller.start(monitor, settings.check_interval())?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    controller.stop().await
}

async fn show_history(db_path: PathBuf, url: Option<String>, limit: usize, content: bool) -> Result<()> {
    // Read-only: a mistyped --db path must not leave an empty store behind.
    let database = Database::open_read_only(db_path).context("failed to open snapshot store")?;

    let Some(url) = url else {
        let targets = database.tracked_targets().await?;
        if targets.is_empty() {
            println!("No snapshots recorded yet in {}.", database.path().display());
        }
        for target in targets {
            let latest_digest = database
                .latest_snapshot(&target.target_url)
                .await?
                .map(|snapshot| snapshot.digest)
                .unwrap_or_default();
            println!(
                "{}\t{} snapshot(s)\tfirst {}\tlast {}\tdigest {}",
                target.target_url,
                target.snapshot_count,
                target.first_observed_at.to_rfc3339(),
                target.last_observed_at.to_rfc3339(),
                latest_digest
            );
        }
        return Ok(());
    };

    let snapshots = database.snapshot_history(&url, limit).await?;
    if snapshots.is_empty() {
        println!("No snapshots recorded for {url}.");
    }
    for snapshot in snapshots {
        println!(
            "{}\t{}\t{} bytes",
            snapshot.observed_at.to_rfc3339(),
            snapshot.digest,
            snapshot.content.len()
        );
        if content {
            println!("{}\n", snapshot.content);
        }
    }
    Ok(())
}
