//! Item Tracker: pipeline-item lifecycle and the stage-transition state machine.
//!
//! An item's states are the stages of its pipeline. `move_item` closes the open
//! history entry with a conditional update, opens the next one and repoints the
//! item, all in one immediate transaction. If the conditional close touches no
//! row, another transition already won and the move fails with
//! `TransitionConflict`. Stage-rule automation runs after commit and can never
//! undo the move.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info, warn};

use super::db::{BoardDb, db_time, required, time_column};
use super::history::{close_open_entry_tx, load_open_entry, open_entry_tx};
use super::models::{ItemDetail, NewItem, PipelineItem};
use super::stages::load_stage;
use crate::errors::{Result, StoreContext, TrackerError};

/// When a transition is stamped.
#[derive(Debug, Clone, Copy)]
enum MoveTime {
    At(DateTime<Utc>),
    /// Read after the write lock is taken, so a wait on the lock cannot
    /// produce a timestamp older than the entry being closed.
    Now,
}

pub(crate) const ITEM_COLUMNS: &str =
    "id, title, stage_id, person_id, organization_id, owner_user_id, created_at";

impl BoardDb {
    pub fn create_item(&self, new: NewItem) -> Result<PipelineItem> {
        self.create_item_at(new, Utc::now())
    }

    /// Create an item in `new.stage_id` and open its first history entry.
    pub fn create_item_at(&self, new: NewItem, at: DateTime<Utc>) -> Result<PipelineItem> {
        let title = required("Item title", &new.title)?;
        let owner = required("Owner user id", &new.owner_user_id)?;
        if new.stage_id <= 0 {
            return Err(TrackerError::validation("Stage id is required"));
        }

        let tx = self.begin_write()?;
        if load_stage(&tx, new.stage_id)?.is_none() {
            return Err(TrackerError::not_found("Stage", new.stage_id));
        }
        tx.execute(
            "INSERT INTO pipeline_items
                (title, stage_id, person_id, organization_id, owner_user_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                title,
                new.stage_id,
                new.person_id,
                new.organization_id,
                owner,
                db_time(at)
            ],
        )
        .context("insert item")?;
        let item_id = tx.last_insert_rowid();
        open_entry_tx(&tx, item_id, new.stage_id, at)?;
        tx.commit().context("commit create_item")?;

        info!(item_id, stage_id = new.stage_id, "Pipeline item created");
        let item = self.require_item(item_id)?;
        self.fire_stage_rule(&item, item.stage_id, at);
        Ok(item)
    }

    pub fn get_item(&self, id: i64) -> Result<Option<PipelineItem>> {
        load_item(&self.conn, id)
    }

    pub fn require_item(&self, id: i64) -> Result<PipelineItem> {
        self.get_item(id)?
            .ok_or_else(|| TrackerError::not_found("Pipeline item", id))
    }

    /// An item with its full stage history and the tasks generated for it.
    pub fn item_detail(&self, id: i64) -> Result<ItemDetail> {
        let item = self.require_item(id)?;
        let history = self.item_history(id)?;
        let tasks = self.list_tasks_for_item(id)?;
        Ok(ItemDetail {
            item,
            history,
            tasks,
        })
    }

    /// Items currently in any stage of a pipeline, most recently created first.
    pub fn list_items(&self, pipeline_id: i64) -> Result<Vec<PipelineItem>> {
        self.require_pipeline(pipeline_id)?;
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ITEM_COLUMNS} FROM pipeline_items
                 WHERE stage_id IN (SELECT id FROM stages WHERE pipeline_id = ?1)
                 ORDER BY created_at DESC, id DESC"
            ))
            .context("prepare list_items")?;
        let rows = stmt
            .query_map(params![pipeline_id], item_from_row)
            .context("query items")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read item row")
    }

    /// Move an item, stamping the transition with the clock read once the
    /// write lock is held.
    pub fn move_item(&self, item_id: i64, new_stage_id: i64) -> Result<PipelineItem> {
        let item = self.require_item(item_id)?;
        self.transition(&item, new_stage_id, MoveTime::Now)
    }

    /// Move an item at a caller-supplied instant. `at` may not precede the
    /// moment the item entered its current stage.
    pub fn move_item_at(
        &self,
        item_id: i64,
        new_stage_id: i64,
        at: DateTime<Utc>,
    ) -> Result<PipelineItem> {
        let item = self.require_item(item_id)?;
        self.transition(&item, new_stage_id, MoveTime::At(at))
    }

    /// Move an item that was read earlier. The transition is checked against
    /// `snapshot.stage_id`: if the item has left that stage since, the move
    /// fails with `TransitionConflict` and nothing is written.
    pub fn move_item_from(&self, snapshot: &PipelineItem, new_stage_id: i64) -> Result<PipelineItem> {
        self.transition(snapshot, new_stage_id, MoveTime::Now)
    }

    pub fn move_item_from_at(
        &self,
        snapshot: &PipelineItem,
        new_stage_id: i64,
        at: DateTime<Utc>,
    ) -> Result<PipelineItem> {
        self.transition(snapshot, new_stage_id, MoveTime::At(at))
    }

    fn transition(
        &self,
        snapshot: &PipelineItem,
        new_stage_id: i64,
        when: MoveTime,
    ) -> Result<PipelineItem> {
        let item_id = snapshot.id;
        let from_stage_id = snapshot.stage_id;
        if new_stage_id == from_stage_id {
            debug!(item_id, stage_id = new_stage_id, "Move to current stage ignored");
            return Ok(snapshot.clone());
        }

        let tx = self.begin_write()?;
        let target = load_stage(&tx, new_stage_id)?
            .ok_or_else(|| TrackerError::not_found("Stage", new_stage_id))?;
        // Items cannot point at a deleted stage, so a missing source stage
        // means the snapshot is stale.
        let source = load_stage(&tx, from_stage_id)?
            .ok_or(TrackerError::TransitionConflict { item_id })?;
        if target.pipeline_id != source.pipeline_id {
            return Err(TrackerError::validation(format!(
                "stage {} belongs to pipeline {}, but item {} is in pipeline {}",
                target.id, target.pipeline_id, item_id, source.pipeline_id
            )));
        }

        let open = load_open_entry(&tx, item_id)?
            .filter(|entry| entry.stage_id == from_stage_id)
            .ok_or(TrackerError::TransitionConflict { item_id })?;
        let at = match when {
            MoveTime::At(at) if at < open.entered_at => {
                return Err(TrackerError::validation(format!(
                    "item {} cannot leave stage {} at {} before entering it at {}",
                    item_id,
                    from_stage_id,
                    at.to_rfc3339(),
                    open.entered_at.to_rfc3339()
                )));
            }
            MoveTime::At(at) => at,
            // Another process may have opened the entry with a clock running ahead of ours.
            MoveTime::Now => Utc::now().max(open.entered_at),
        };

        let closed = close_open_entry_tx(&tx, item_id, from_stage_id, at)?;
        if closed != 1 {
            return Err(TrackerError::TransitionConflict { item_id });
        }
        open_entry_tx(&tx, item_id, new_stage_id, at)?;
        let updated = tx
            .execute(
                "UPDATE pipeline_items SET stage_id = ?1 WHERE id = ?2 AND stage_id = ?3",
                params![new_stage_id, item_id, from_stage_id],
            )
            .context("update item stage")?;
        if updated != 1 {
            return Err(TrackerError::TransitionConflict { item_id });
        }
        tx.commit().context("commit move_item")?;

        info!(
            item_id,
            from_stage_id,
            to_stage_id = new_stage_id,
            "Pipeline item moved"
        );
        let moved = PipelineItem {
            stage_id: new_stage_id,
            ..snapshot.clone()
        };
        self.fire_stage_rule(&moved, new_stage_id, at);
        Ok(moved)
    }

    /// Delete an item. Its history goes with it; generated tasks stay, detached.
    pub fn delete_item(&self, item_id: i64) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM pipeline_items WHERE id = ?1", params![item_id])
            .context("delete item")?;
        if deleted == 0 {
            return Err(TrackerError::not_found("Pipeline item", item_id));
        }
        info!(item_id, "Pipeline item deleted");
        Ok(())
    }

    /// Post-commit automation. Failures are logged, never returned.
    fn fire_stage_rule(&self, item: &PipelineItem, stage_id: i64, at: DateTime<Utc>) {
        match self.on_item_entered_stage(item, stage_id, at) {
            Ok(Some(task)) => {
                info!(item_id = item.id, stage_id, task_id = task.id, "Stage rule created task");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    item_id = item.id,
                    stage_id,
                    error = %e,
                    "Stage rule automation failed; item has no follow-up task"
                );
            }
        }
    }
}

pub(crate) fn load_item(conn: &Connection, id: i64) -> Result<Option<PipelineItem>> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM pipeline_items WHERE id = ?1"),
        params![id],
        item_from_row,
    )
    .optional()
    .context("load item")
}

/// Reads `ITEM_COLUMNS` from the first seven columns of a row.
pub(crate) fn item_from_row(row: &Row<'_>) -> rusqlite::Result<PipelineItem> {
    Ok(PipelineItem {
        id: row.get(0)?,
        title: row.get(1)?,
        stage_id: row.get(2)?,
        person_id: row.get(3)?,
        organization_id: row.get(4)?,
        owner_user_id: row.get(5)?,
        created_at: time_column(row, 6)?,
    })
}
