use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{broadcast, oneshot};

use super::{
    change_channel, next_origin, SharedStorage, StorageEvent, StorageWatcher,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const SCHEMA_VERSION: i32 = 1;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<StorageEvent>,
    path: PathBuf,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to storage thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join storage thread: {join_err:?}");
            }
        }
    }
}

/// Storage backed by a SQLite file, so separate processes on one machine
/// share the lock and the pending queue.
///
/// All statements run on one worker thread. Change notifications reach
/// handles in this process only; other processes pick changes up on their
/// next poll.
#[derive(Clone)]
pub struct SqliteStorage {
    inner: Arc<DatabaseInner>,
    origin: u64,
}

impl SqliteStorage {
    pub fn open(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create storage directory {}", parent.display())
                })?;
            }
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("learnclock-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite storage")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.busy_timeout(BUSY_TIMEOUT) {
                    error!("Failed to set busy timeout: {err}");
                }

                let init_result = init_schema(&conn).context("failed to initialize storage schema");
                if ready_tx.send(init_result).is_err() {
                    error!("Storage initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Storage thread shutting down");
            })
            .with_context(|| "failed to spawn storage worker thread")?;

        ready_rx
            .recv()
            .context("storage worker exited before signaling readiness")??;

        info!("Shared storage opened at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
                events: change_channel(),
                path: db_path,
            }),
            origin: next_origin(),
        })
    }

    /// Another handle on the same file, with its own origin.
    pub fn connect(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            origin: next_origin(),
        }
    }

    pub fn path(&self) -> &Path {
        self.inner.path.as_path()
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Storage caller dropped before receiving result");
            }
        }));

        self.inner
            .sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to storage thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("storage thread terminated unexpectedly"))?
    }

    fn notify(&self, key: &str) {
        let _ = self.inner.events.send(StorageEvent {
            key: key.to_string(),
            origin: self.origin,
        });
    }
}

#[async_trait]
impl SharedStorage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("failed to read '{key}'"))
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let owned_key = key.to_string();
        let value = value.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO kv_entries (key, value, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                     value = excluded.value,
                     updated_at = excluded.updated_at",
                params![owned_key, value, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("failed to write '{owned_key}'"))?;
            Ok(())
        })
        .await?;
        self.notify(key);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let owned_key = key.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![owned_key])
                .with_context(|| format!("failed to remove '{owned_key}'"))?;
            Ok(())
        })
        .await?;
        self.notify(key);
        Ok(())
    }

    fn watch(&self) -> StorageWatcher {
        StorageWatcher::new(self.origin, &self.inner.events)
    }
}

/// The key/value table is the only schema there is; `user_version` guards
/// against files written by a newer build.
fn init_schema(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;
    if version > SCHEMA_VERSION {
        bail!("storage version ({version}) is newer than supported schema ({SCHEMA_VERSION})");
    }

    conn.execute_batch(include_str!("schemas/schema_v1.sql"))
        .context("failed to create kv_entries table")?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    Ok(())
}
