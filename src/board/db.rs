use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};

use crate::errors::{Result, StoreContext};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, preventing synchronous SQLite
/// I/O from tying up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    ///
    /// Domain failures come back as an `anyhow::Error` wrapping the original
    /// `TrackerError`, so callers can `downcast_ref` to classify them.
    pub async fn call<F, R>(&self, f: F) -> anyhow::Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard).map_err(anyhow::Error::from)
        })
        .await
        .map_err(|e| anyhow::anyhow!("DB task panicked: {}", e))?
    }

    /// Acquire the database mutex synchronously. Used at startup and in tests;
    /// never from a hot async path.
    pub fn lock_sync(&self) -> anyhow::Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// SQLite-backed store for pipelines, stages, items, their stage history,
/// stage rules and generated tasks.
///
/// Operations are split by concern across `stages`, `items`, `history`,
/// `rules` and `analytics`; each adds an `impl BoardDb` block.
pub struct BoardDb {
    pub(crate) conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and install the schema.
    pub fn new(path: &Path) -> Result<Self> {
        Self::open(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Like `new`, with an explicit busy timeout. Concurrent writers wait up to
    /// this long for the write lock before failing.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path).context("open database")?;
        conn.busy_timeout(busy_timeout).context("set busy timeout")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .context("enable WAL journal")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("enable foreign keys")?;
        self.install_schema()
    }

    fn install_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS pipelines (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS stages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    pipeline_id INTEGER NOT NULL REFERENCES pipelines(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    stage_order INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pipeline_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    stage_id INTEGER NOT NULL REFERENCES stages(id),
                    person_id INTEGER,
                    organization_id INTEGER,
                    owner_user_id TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS pipeline_item_stage_history (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    pipeline_item_id INTEGER NOT NULL REFERENCES pipeline_items(id) ON DELETE CASCADE,
                    stage_id INTEGER NOT NULL REFERENCES stages(id) ON DELETE CASCADE,
                    entered_at TEXT NOT NULL,
                    left_at TEXT
                );

                CREATE TABLE IF NOT EXISTS stage_rules (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    stage_id INTEGER NOT NULL UNIQUE REFERENCES stages(id) ON DELETE CASCADE,
                    template_title TEXT NOT NULL,
                    offset_days INTEGER NOT NULL CHECK (offset_days >= 0)
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    title TEXT NOT NULL,
                    owner_user_id TEXT NOT NULL,
                    due_at TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    person_id INTEGER,
                    pipeline_item_id INTEGER REFERENCES pipeline_items(id) ON DELETE SET NULL
                );

                CREATE INDEX IF NOT EXISTS idx_stages_pipeline ON stages(pipeline_id, stage_order);
                CREATE INDEX IF NOT EXISTS idx_items_stage ON pipeline_items(stage_id);
                CREATE INDEX IF NOT EXISTS idx_history_item ON pipeline_item_stage_history(pipeline_item_id);
                CREATE INDEX IF NOT EXISTS idx_history_stage ON pipeline_item_stage_history(stage_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_item ON tasks(pipeline_item_id);

                -- At most one open interval per item, enforced by storage as well.
                CREATE UNIQUE INDEX IF NOT EXISTS idx_history_one_open
                    ON pipeline_item_stage_history(pipeline_item_id) WHERE left_at IS NULL;
                ",
            )
            .context("create tables")
    }

    /// Begin a write transaction that takes SQLite's write lock immediately.
    ///
    /// `new_unchecked` lets the transaction borrow `&self`; the `DbHandle`
    /// mutex (or single ownership in sync callers) guarantees exclusive use of
    /// this connection. Other connections to the same file wait on the busy
    /// timeout rather than interleaving.
    pub(crate) fn begin_write(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("begin transaction")
    }
}

/// Canonical fixed-width storage form, so lexical order equals time order.
pub(crate) fn db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(idx, &raw)
}

pub(crate) fn opt_time_column(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|value| parse_db_time(idx, &value)).transpose()
}

fn parse_db_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Reject empty or whitespace-only input, returning the trimmed value.
pub(crate) fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(crate::errors::TrackerError::validation(format!(
            "{} is required",
            field
        )));
    }
    Ok(trimmed)
}

// ── Tests ─────────────────────────────────────────────────────────────
