//! Stage History Ledger: append-only dwell intervals per pipeline item.
//!
//! Only the Item Tracker writes here. Each item has exactly one open entry
//! (`left_at IS NULL`), and it names the item's current stage. The open entry
//! is always located by query and closed with a conditional update; the
//! affected-row count tells the caller whether it won the race.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;

use super::db::{BoardDb, db_time, opt_time_column, time_column};
use super::models::{StageHistoryEntry, hours_between};
use crate::errors::{Result, StoreContext};

const HISTORY_COLUMNS: &str = "id, pipeline_item_id, stage_id, entered_at, left_at";

/// Snapshot of the open-entry invariant for one item.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LedgerStatus {
    pub item_id: i64,
    pub current_stage_id: i64,
    pub open_entries: i64,
    pub open_stage_id: Option<i64>,
}

impl LedgerStatus {
    pub fn is_consistent(&self) -> bool {
        self.open_entries == 1 && self.open_stage_id == Some(self.current_stage_id)
    }
}

impl BoardDb {
    /// Every interval of an item, oldest first.
    pub fn item_history(&self, item_id: i64) -> Result<Vec<StageHistoryEntry>> {
        self.require_item(item_id)?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM pipeline_item_stage_history
                 WHERE pipeline_item_id = ?1 ORDER BY entered_at, id"
            ))
            .context("prepare item_history")?;
        let rows = stmt
            .query_map(params![item_id], entry_from_row)
            .context("query item history")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read history row")
    }

    pub fn open_entry(&self, item_id: i64) -> Result<Option<StageHistoryEntry>> {
        load_open_entry(&self.conn, item_id)
    }

    pub fn verify_item_ledger(&self, item_id: i64) -> Result<LedgerStatus> {
        let item = self.require_item(item_id)?;
        let (open_entries, open_stage_id): (i64, Option<i64>) = self
            .conn
            .query_row(
                "SELECT COUNT(*), MAX(stage_id) FROM pipeline_item_stage_history
                 WHERE pipeline_item_id = ?1 AND left_at IS NULL",
                params![item_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("count open history entries")?;
        Ok(LedgerStatus {
            item_id,
            current_stage_id: item.stage_id,
            open_entries,
            open_stage_id,
        })
    }
}

// ── Writes (Item Tracker only, inside its transaction) ────────────────

pub(crate) fn open_entry_tx(
    conn: &Connection,
    item_id: i64,
    stage_id: i64,
    at: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO pipeline_item_stage_history (pipeline_item_id, stage_id, entered_at)
         VALUES (?1, ?2, ?3)",
        params![item_id, stage_id, db_time(at)],
    )
    .context("open history entry")?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn load_open_entry(conn: &Connection, item_id: i64) -> Result<Option<StageHistoryEntry>> {
    conn.query_row(
        &format!(
            "SELECT {HISTORY_COLUMNS} FROM pipeline_item_stage_history
             WHERE pipeline_item_id = ?1 AND left_at IS NULL"
        ),
        params![item_id],
        entry_from_row,
    )
    .optional()
    .context("load open history entry")
}

/// Close the item's open entry for `stage_id`. Returns the affected-row count:
/// 1 when this caller closed it, 0 when someone else already did.
pub(crate) fn close_open_entry_tx(
    conn: &Connection,
    item_id: i64,
    stage_id: i64,
    at: DateTime<Utc>,
) -> Result<usize> {
    conn.execute(
        "UPDATE pipeline_item_stage_history SET left_at = ?1
         WHERE pipeline_item_id = ?2 AND stage_id = ?3 AND left_at IS NULL",
        params![db_time(at), item_id, stage_id],
    )
    .context("close history entry")
}

// ── Reads for analytics ───────────────────────────────────────────────

/// Dwell time in hours of every closed visit to a stage.
pub(crate) fn closed_durations_for_stage(conn: &Connection, stage_id: i64) -> Result<Vec<f64>> {
    closed_durations(
        conn,
        "SELECT entered_at, left_at FROM pipeline_item_stage_history
         WHERE stage_id = ?1 AND left_at IS NOT NULL",
        stage_id,
    )
}

/// Dwell time in hours of every closed visit to any stage of a pipeline.
pub(crate) fn closed_durations_for_pipeline(
    conn: &Connection,
    pipeline_id: i64,
) -> Result<Vec<f64>> {
    closed_durations(
        conn,
        "SELECT h.entered_at, h.left_at FROM pipeline_item_stage_history h
         JOIN stages s ON s.id = h.stage_id
         WHERE s.pipeline_id = ?1 AND h.left_at IS NOT NULL",
        pipeline_id,
    )
}

fn closed_durations(conn: &Connection, sql: &str, key: i64) -> Result<Vec<f64>> {
    let mut stmt = conn.prepare(sql).context("prepare closed durations")?;
    let rows = stmt
        .query_map(params![key], |row| {
            Ok(hours_between(time_column(row, 0)?, time_column(row, 1)?))
        })
        .context("query closed durations")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("read closed duration")
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<StageHistoryEntry> {
    Ok(StageHistoryEntry {
        id: row.get(0)?,
        pipeline_item_id: row.get(1)?,
        stage_id: row.get(2)?,
        entered_at: time_column(row, 3)?,
        left_at: opt_time_column(row, 4)?,
    })
}
