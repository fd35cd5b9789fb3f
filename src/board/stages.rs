//! Stage Store: pipelines and their ordered stages.
//!
//! For every pipeline the `order` values of its stages are exactly `0..n-1`.
//! Every reordering write runs in one immediate transaction and re-checks that
//! invariant before committing, so a failed insert or delete leaves no shifted
//! rows behind.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

use super::db::{BoardDb, db_time, required, time_column};
use super::models::{NamedPosition, Pipeline, PipelineWithStages, Stage, StagePosition};
use crate::errors::{Result, StoreContext, TrackerError};

const STAGE_COLUMNS: &str = "id, pipeline_id, name, stage_order";

impl BoardDb {
    // ── Pipelines ─────────────────────────────────────────────────────

    /// Create a pipeline together with one stage per name, ordered as given.
    pub fn create_pipeline<S: AsRef<str>>(
        &self,
        name: &str,
        stage_names: &[S],
    ) -> Result<PipelineWithStages> {
        self.create_pipeline_at(name, stage_names, Utc::now())
    }

    pub fn create_pipeline_at<S: AsRef<str>>(
        &self,
        name: &str,
        stage_names: &[S],
        at: DateTime<Utc>,
    ) -> Result<PipelineWithStages> {
        let name = required("Pipeline name", name)?;
        if stage_names.is_empty() {
            return Err(TrackerError::validation(
                "a pipeline needs at least one stage",
            ));
        }
        let stage_names = stage_names
            .iter()
            .enumerate()
            .map(|(i, s)| required(&format!("Stage name #{}", i + 1), s.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        let tx = self.begin_write()?;
        tx.execute(
            "INSERT INTO pipelines (name, created_at) VALUES (?1, ?2)",
            params![name, db_time(at)],
        )
        .context("insert pipeline")?;
        let pipeline_id = tx.last_insert_rowid();

        for (order, stage_name) in stage_names.iter().enumerate() {
            tx.execute(
                "INSERT INTO stages (pipeline_id, name, stage_order) VALUES (?1, ?2, ?3)",
                params![pipeline_id, stage_name, order as i64],
            )
            .context("insert stage")?;
        }
        ensure_contiguous(&tx, pipeline_id)?;
        tx.commit().context("commit pipeline")?;

        info!(pipeline_id, name, stages = stage_names.len(), "Pipeline created");
        self.get_pipeline_with_stages(pipeline_id)
    }

    pub fn get_pipeline(&self, id: i64) -> Result<Option<Pipeline>> {
        load_pipeline(&self.conn, id)
    }

    pub fn require_pipeline(&self, id: i64) -> Result<Pipeline> {
        self.get_pipeline(id)?
            .ok_or_else(|| TrackerError::not_found("Pipeline", id))
    }

    pub fn list_pipelines(&self) -> Result<Vec<Pipeline>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM pipelines ORDER BY id")
            .context("prepare list_pipelines")?;
        let rows = stmt
            .query_map([], pipeline_from_row)
            .context("query pipelines")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read pipeline row")
    }

    pub fn get_pipeline_with_stages(&self, id: i64) -> Result<PipelineWithStages> {
        let pipeline = self.require_pipeline(id)?;
        let stages = load_stages(&self.conn, id)?;
        Ok(PipelineWithStages { pipeline, stages })
    }

    // ── Stages ────────────────────────────────────────────────────────

    pub fn get_stage(&self, id: i64) -> Result<Option<Stage>> {
        load_stage(&self.conn, id)
    }

    pub fn require_stage(&self, id: i64) -> Result<Stage> {
        self.get_stage(id)?
            .ok_or_else(|| TrackerError::not_found("Stage", id))
    }

    /// Stages of a pipeline in pipeline order.
    pub fn list_stages(&self, pipeline_id: i64) -> Result<Vec<Stage>> {
        self.require_pipeline(pipeline_id)?;
        load_stages(&self.conn, pipeline_id)
    }

    /// Insert a stage at the start, the end, or before the stage currently at
    /// `Index(i)`. An index equal to the stage count appends.
    pub fn add_stage(&self, pipeline_id: i64, name: &str, position: StagePosition) -> Result<Stage> {
        let name = required("Stage name", name)?;

        let tx = self.begin_write()?;
        if load_pipeline(&tx, pipeline_id)?.is_none() {
            return Err(TrackerError::not_found("Pipeline", pipeline_id));
        }
        let count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM stages WHERE pipeline_id = ?1",
                params![pipeline_id],
                |row| row.get(0),
            )
            .context("count stages")?;

        let order = match position {
            StagePosition::Named(NamedPosition::Start) => 0,
            StagePosition::Named(NamedPosition::End) => count,
            StagePosition::Index(index) => {
                let index = i64::from(index);
                if index > count {
                    return Err(TrackerError::validation(format!(
                        "stage index {} is out of range for a pipeline with {} stage(s)",
                        index, count
                    )));
                }
                index
            }
        };

        if order < count {
            tx.execute(
                "UPDATE stages SET stage_order = stage_order + 1
                 WHERE pipeline_id = ?1 AND stage_order >= ?2",
                params![pipeline_id, order],
            )
            .context("shift stages")?;
        }
        tx.execute(
            "INSERT INTO stages (pipeline_id, name, stage_order) VALUES (?1, ?2, ?3)",
            params![pipeline_id, name, order],
        )
        .context("insert stage")?;
        let stage_id = tx.last_insert_rowid();

        ensure_contiguous(&tx, pipeline_id)?;
        tx.commit().context("commit add_stage")?;

        info!(pipeline_id, stage_id, order, name, "Stage added");
        self.require_stage(stage_id)
    }

    /// Delete an empty stage and compact the remaining orders to `0..n-1`.
    ///
    /// The stage's rule and its closed history rows go with it.
    pub fn delete_stage(&self, stage_id: i64) -> Result<()> {
        let tx = self.begin_write()?;
        let stage =
            load_stage(&tx, stage_id)?.ok_or_else(|| TrackerError::not_found("Stage", stage_id))?;

        let item_count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM pipeline_items WHERE stage_id = ?1",
                params![stage_id],
                |row| row.get(0),
            )
            .context("count stage items")?;
        if item_count > 0 {
            return Err(TrackerError::StageNotEmpty {
                stage_id,
                item_count,
            });
        }

        tx.execute("DELETE FROM stages WHERE id = ?1", params![stage_id])
            .context("delete stage")?;
        renumber_stages(&tx, stage.pipeline_id)?;
        ensure_contiguous(&tx, stage.pipeline_id)?;
        tx.commit().context("commit delete_stage")?;

        info!(stage_id, pipeline_id = stage.pipeline_id, "Stage deleted");
        Ok(())
    }

    pub fn rename_stage(&self, stage_id: i64, name: &str) -> Result<Stage> {
        let name = required("Stage name", name)?;
        let updated = self
            .conn
            .execute(
                "UPDATE stages SET name = ?1 WHERE id = ?2",
                params![name, stage_id],
            )
            .context("rename stage")?;
        if updated == 0 {
            return Err(TrackerError::not_found("Stage", stage_id));
        }
        self.require_stage(stage_id)
    }
}

// ── Connection-level helpers (usable inside a transaction) ────────────

pub(crate) fn load_pipeline(conn: &Connection, id: i64) -> Result<Option<Pipeline>> {
    conn.query_row(
        "SELECT id, name, created_at FROM pipelines WHERE id = ?1",
        params![id],
        pipeline_from_row,
    )
    .optional()
    .context("load pipeline")
}

pub(crate) fn load_stage(conn: &Connection, id: i64) -> Result<Option<Stage>> {
    conn.query_row(
        &format!("SELECT {STAGE_COLUMNS} FROM stages WHERE id = ?1"),
        params![id],
        stage_from_row,
    )
    .optional()
    .context("load stage")
}

pub(crate) fn load_stages(conn: &Connection, pipeline_id: i64) -> Result<Vec<Stage>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {STAGE_COLUMNS} FROM stages WHERE pipeline_id = ?1 ORDER BY stage_order"
        ))
        .context("prepare list_stages")?;
    let rows = stmt
        .query_map(params![pipeline_id], stage_from_row)
        .context("query stages")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("read stage row")
}

/// Rewrite orders to `0..n-1`, keeping the existing relative order.
fn renumber_stages(conn: &Connection, pipeline_id: i64) -> Result<()> {
    let ids: Vec<i64> = {
        let mut stmt = conn
            .prepare("SELECT id FROM stages WHERE pipeline_id = ?1 ORDER BY stage_order, id")
            .context("prepare renumber")?;
        let rows = stmt
            .query_map(params![pipeline_id], |row| row.get(0))
            .context("query stage ids")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read stage id")?
    };
    for (order, id) in ids.iter().enumerate() {
        conn.execute(
            "UPDATE stages SET stage_order = ?1 WHERE id = ?2",
            params![order as i64, id],
        )
        .context("renumber stage")?;
    }
    Ok(())
}

/// Fails with `StageOrderCorrupted` unless the orders are exactly `0..n-1`.
pub(crate) fn ensure_contiguous(conn: &Connection, pipeline_id: i64) -> Result<()> {
    let orders: Vec<i64> = {
        let mut stmt = conn
            .prepare("SELECT stage_order FROM stages WHERE pipeline_id = ?1 ORDER BY stage_order")
            .context("prepare order check")?;
        let rows = stmt
            .query_map(params![pipeline_id], |row| row.get(0))
            .context("query stage orders")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read stage order")?
    };
    let contiguous = orders
        .iter()
        .enumerate()
        .all(|(expected, order)| *order == expected as i64);
    if !contiguous {
        return Err(TrackerError::StageOrderCorrupted {
            pipeline_id,
            orders,
        });
    }
    Ok(())
}

fn pipeline_from_row(row: &Row<'_>) -> rusqlite::Result<Pipeline> {
    Ok(Pipeline {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: time_column(row, 2)?,
    })
}

fn stage_from_row(row: &Row<'_>) -> rusqlite::Result<Stage> {
    Ok(Stage {
        id: row.get(0)?,
        pipeline_id: row.get(1)?,
        name: row.get(2)?,
        order: row.get(3)?,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::NewItem;
    use crate::errors::ErrorCategory;

    fn names(stages: &[Stage]) -> Vec<&str> {
        stages.iter().map(|s| s.name.as_str()).collect()
    }

    fn orders(stages: &[Stage]) -> Vec<i64> {
        stages.iter().map(|s| s.order).collect()
    }

    #[test]
    fn test_create_pipeline_orders_stages_by_index() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let created = db.create_pipeline("Sales", &["Lead", "Qualified", "Won"])?;

        assert!(created.pipeline.id > 0);
        assert_eq!(created.pipeline.name, "Sales");
        assert_eq!(names(&created.stages), ["Lead", "Qualified", "Won"]);
        assert_eq!(orders(&created.stages), [0, 1, 2]);
        assert!(created.stages.iter().all(|s| s.pipeline_id == created.pipeline.id));
        Ok(())
    }

    #[test]
    fn test_create_pipeline_validation() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let empty: [&str; 0] = [];

        let err = db.create_pipeline("  ", &["A"]).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = db.create_pipeline("Sales", &empty).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = db.create_pipeline("Sales", &["A", " "]).unwrap_err();
        assert!(err.to_string().contains("Stage name #2"));

        // Nothing was written by the failed attempts.
        assert!(db.list_pipelines()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_add_stage_at_start_shifts_everything() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Hiring", &["Screen", "Interview"])?;

        let stage = db.add_stage(p.pipeline.id, "Sourced", StagePosition::START)?;
        assert_eq!(stage.order, 0);

        let stages = db.list_stages(p.pipeline.id)?;
        assert_eq!(names(&stages), ["Sourced", "Screen", "Interview"]);
        assert_eq!(orders(&stages), [0, 1, 2]);
        Ok(())
    }

    #[test]
    fn test_add_stage_at_end_and_index() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Hiring", &["A", "C"])?;

        let end = db.add_stage(p.pipeline.id, "D", StagePosition::END)?;
        assert_eq!(end.order, 2);

        let middle = db.add_stage(p.pipeline.id, "B", StagePosition::Index(1))?;
        assert_eq!(middle.order, 1);

        let appended = db.add_stage(p.pipeline.id, "E", StagePosition::Index(4))?;
        assert_eq!(appended.order, 4);

        let stages = db.list_stages(p.pipeline.id)?;
        assert_eq!(names(&stages), ["A", "B", "C", "D", "E"]);
        assert_eq!(orders(&stages), [0, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn test_add_stage_rejects_out_of_range_index() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Hiring", &["A", "B"])?;

        let err = db
            .add_stage(p.pipeline.id, "Z", StagePosition::Index(3))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(db.list_stages(p.pipeline.id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_add_stage_unknown_pipeline() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.add_stage(99, "A", StagePosition::END).unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { entity: "Pipeline", id: 99 }));
        Ok(())
    }

    #[test]
    fn test_add_stage_rolls_back_when_order_is_corrupted() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Ops", &["A", "B", "C"])?;
        db.conn
            .execute(
                "UPDATE stages SET stage_order = 7 WHERE pipeline_id = ?1 AND name = 'C'",
                params![p.pipeline.id],
            )
            .context("corrupt order")?;

        let err = db
            .add_stage(p.pipeline.id, "A0", StagePosition::START)
            .unwrap_err();
        assert!(matches!(err, TrackerError::StageOrderCorrupted { .. }));

        // The shift and the insert were both rolled back.
        let stages = db.list_stages(p.pipeline.id)?;
        assert_eq!(names(&stages), ["A", "B", "C"]);
        assert_eq!(orders(&stages), [0, 1, 7]);
        Ok(())
    }

    #[test]
    fn test_delete_stage_compacts_order() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Support", &["New", "Triage", "Fix", "Closed"])?;

        db.delete_stage(p.stages[1].id)?;
        let stages = db.list_stages(p.pipeline.id)?;
        assert_eq!(names(&stages), ["New", "Fix", "Closed"]);
        assert_eq!(orders(&stages), [0, 1, 2]);

        db.delete_stage(p.stages[0].id)?;
        let stages = db.list_stages(p.pipeline.id)?;
        assert_eq!(names(&stages), ["Fix", "Closed"]);
        assert_eq!(orders(&stages), [0, 1]);
        Ok(())
    }

    #[test]
    fn test_delete_stage_with_items_reports_count() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["Lead", "Won"])?;
        let lead = p.stages[0].id;
        for title in ["Acme", "Globex"] {
            db.create_item(NewItem {
                title: title.into(),
                stage_id: lead,
                owner_user_id: "u-1".into(),
                ..Default::default()
            })?;
        }

        let err = db.delete_stage(lead).unwrap_err();
        match &err {
            TrackerError::StageNotEmpty {
                stage_id,
                item_count,
            } => {
                assert_eq!(*stage_id, lead);
                assert_eq!(*item_count, 2);
            }
            other => panic!("Expected StageNotEmpty, got {other:?}"),
        }
        assert!(err.to_string().contains("2 item(s)"));
        assert_eq!(db.list_stages(p.pipeline.id)?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_delete_unknown_stage() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.delete_stage(5).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        Ok(())
    }

    #[test]
    fn test_rename_stage() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["Lead"])?;

        let renamed = db.rename_stage(p.stages[0].id, "  Prospect ")?;
        assert_eq!(renamed.name, "Prospect");
        assert_eq!(renamed.order, 0);

        let err = db.rename_stage(p.stages[0].id, "").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = db.rename_stage(404, "X").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        Ok(())
    }

    #[test]
    fn test_order_stays_contiguous_across_mixed_edits() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Mixed", &["s0"])?;
        let pid = p.pipeline.id;

        let b = db.add_stage(pid, "s1", StagePosition::END)?;
        db.add_stage(pid, "s2", StagePosition::START)?;
        let d = db.add_stage(pid, "s3", StagePosition::Index(1))?;
        db.delete_stage(b.id)?;
        db.add_stage(pid, "s4", StagePosition::Index(2))?;
        db.delete_stage(d.id)?;

        let stages = db.list_stages(pid)?;
        assert_eq!(orders(&stages), (0..stages.len() as i64).collect::<Vec<_>>());
        assert_eq!(names(&stages), ["s2", "s4", "s0"]);
        Ok(())
    }
}
