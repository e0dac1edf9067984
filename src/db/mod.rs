use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use tokio::sync::oneshot;

mod helpers;
mod migrations;
pub mod models;
mod repositories;

use migrations::{check_schema_version, run_migrations};

pub use models::{Snapshot, TargetSummary};
pub use repositories::snapshots::SnapshotStore;

#[derive(Debug, Clone, Copy)]
enum OpenMode {
    ReadWrite,
    ReadOnly,
}

fn open_connection(path: &Path, mode: OpenMode) -> Result<Connection> {
    match mode {
        OpenMode::ReadWrite => {
            let conn = Connection::open(path).context("failed to open SQLite database")?;
            if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                error!("Failed to enable WAL mode: {err}");
            }
            // A snapshot must be on disk before its alert goes out.
            if let Err(err) = conn.pragma_update(None, "synchronous", "FULL") {
                error!("Failed to set synchronous=FULL: {err}");
            }
            Ok(conn)
        }
        OpenMode::ReadOnly => Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("failed to open SQLite database read-only"),
    }
}

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

#[derive(Debug)]
struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

/// Snapshot history backed by a single SQLite connection.
///
/// The connection lives on a dedicated thread; callers hand it closures
/// through [`Database::execute`] and await the result, so every statement
/// runs strictly one after another.
#[derive(Clone, Debug)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    /// Opens (creating if needed) the store at `db_path` and brings its
    /// schema up to date.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create database directory {}", parent.display())
                })?;
            }
        }

        Self::spawn(db_path, OpenMode::ReadWrite)
    }

    /// Opens an existing store for queries only. Nothing is created or
    /// migrated; a missing file is an error.
    pub fn open_read_only(db_path: PathBuf) -> Result<Self> {
        if !db_path.is_file() {
            bail!("no snapshot store at {}", db_path.display());
        }

        Self::spawn(db_path, OpenMode::ReadOnly)
    }

    fn spawn(db_path: PathBuf, mode: OpenMode) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("page-monitor-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&path_for_thread, mode) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                let init_result = match mode {
                    OpenMode::ReadWrite => {
                        run_migrations(&mut conn).context("failed to run database migrations")
                    }
                    OpenMode::ReadOnly => check_schema_version(&conn),
                };
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {} ({mode:?})", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }
}
