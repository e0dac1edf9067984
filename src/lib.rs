pub mod cli;
pub mod db;
pub mod monitor;
pub mod notify;
pub mod settings;

pub use db::{Database, Snapshot, SnapshotStore};
pub use monitor::{CycleReport, Monitor, TargetOutcome};
pub use settings::{Settings, Target};

/// Logging reads `RUST_LOG`, defaulting to `info`.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
