//! Analytics Engine: read-only dwell-time reports over the stage history ledger.
//!
//! Durations are fractional hours. Averages are taken over closed visits only;
//! open entries contribute to `time_in_stage` of current items instead.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, warn};

use super::db::{BoardDb, opt_time_column};
use super::history::{closed_durations_for_pipeline, closed_durations_for_stage};
use super::items::item_from_row;
use super::models::{ItemDwell, PipelineReport, PipelineVelocity, StageReport, hours_between};
use super::stages::{load_pipeline, load_stages};
use crate::errors::{Result, StoreContext, TrackerError};

impl BoardDb {
    pub fn get_pipeline_report(&self, pipeline_id: i64) -> Result<PipelineReport> {
        self.get_pipeline_report_at(pipeline_id, Utc::now())
    }

    /// Per-stage report, in stage order, with `now` fixed to `at`.
    ///
    /// All stages are read inside one transaction, so a concurrent move is
    /// either fully visible or not at all.
    pub fn get_pipeline_report_at(
        &self,
        pipeline_id: i64,
        at: DateTime<Utc>,
    ) -> Result<PipelineReport> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("begin report read")?;
        let pipeline = load_pipeline(&tx, pipeline_id)?
            .ok_or_else(|| TrackerError::not_found("Pipeline", pipeline_id))?;
        let stages = load_stages(&tx, pipeline_id)?
            .into_iter()
            .map(|stage| -> Result<StageReport> {
                let items = current_items(&tx, stage.id, at)?;
                let average_time_in_stage = mean(&closed_durations_for_stage(&tx, stage.id)?);
                Ok(StageReport {
                    stage,
                    current_item_count: items.len() as i64,
                    average_time_in_stage,
                    items,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        tx.commit().context("end report read")?;

        debug!(pipeline_id, stages = stages.len(), "Pipeline report generated");
        Ok(PipelineReport {
            pipeline,
            generated_at: at,
            stages,
        })
    }

    /// One row per pipeline, ordered by pipeline id.
    ///
    /// `avg_time_in_pipeline` is the mean of every closed stage visit in the
    /// pipeline: per-visit dwell time, not start-to-finish item lifetime.
    pub fn get_pipeline_velocity_report(&self) -> Result<Vec<PipelineVelocity>> {
        let report = self
            .list_pipelines()?
            .into_iter()
            .map(|pipeline| -> Result<PipelineVelocity> {
                let total_items: i64 = self
                    .conn
                    .query_row(
                        "SELECT COUNT(DISTINCT i.id) FROM pipeline_items i
                         JOIN stages s ON s.id = i.stage_id
                         WHERE s.pipeline_id = ?1",
                        params![pipeline.id],
                        |row| row.get(0),
                    )
                    .context("count pipeline items")?;
                let durations = closed_durations_for_pipeline(&self.conn, pipeline.id)?;
                Ok(PipelineVelocity {
                    pipeline_id: pipeline.id,
                    pipeline_name: pipeline.name,
                    total_items,
                    avg_time_in_pipeline: mean(&durations),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(pipelines = report.len(), "Velocity report generated");
        Ok(report)
    }
}

/// Items currently in a stage with their time in it, most recently created first.
fn current_items(conn: &Connection, stage_id: i64, at: DateTime<Utc>) -> Result<Vec<ItemDwell>> {
    let mut stmt = conn
        .prepare(
            "SELECT i.id, i.title, i.stage_id, i.person_id, i.organization_id,
                    i.owner_user_id, i.created_at, h.entered_at
             FROM pipeline_items i
             LEFT JOIN pipeline_item_stage_history h
                ON h.pipeline_item_id = i.id AND h.left_at IS NULL
             WHERE i.stage_id = ?1
             ORDER BY i.created_at DESC, i.id DESC",
        )
        .context("prepare current items")?;
    let rows = stmt
        .query_map(params![stage_id], |row| {
            let item = item_from_row(row)?;
            let entered_at = match opt_time_column(row, 7)? {
                Some(entered_at) => entered_at,
                None => {
                    warn!(
                        item_id = item.id,
                        stage_id,
                        "Item has no open history entry; using its creation time"
                    );
                    item.created_at
                }
            };
            Ok(ItemDwell {
                time_in_stage: hours_between(entered_at, at),
                entered_at,
                item,
            })
        })
        .context("query current items")?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("read current item")
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::NewItem;
    use crate::logging::capture_logs;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn add(db: &BoardDb, title: &str, stage_id: i64, at: DateTime<Utc>) -> Result<i64> {
        let item = db.create_item_at(
            NewItem {
                title: title.into(),
                stage_id,
                owner_user_id: "u".into(),
                ..Default::default()
            },
            at,
        )?;
        Ok(item.id)
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[2.0, 4.0]), Some(3.0));
    }

    #[test]
    fn test_average_is_null_without_closed_visits() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["A", "B"])?;
        add(&db, "X", p.stages[0].id, t0())?;

        let report = db.get_pipeline_report_at(p.pipeline.id, t0() + Duration::hours(1))?;
        assert!(report.stages.iter().all(|s| s.average_time_in_stage.is_none()));
        assert_eq!(report.stages[0].items[0].time_in_stage, 1.0);
        Ok(())
    }

    #[test]
    fn test_average_over_two_and_four_hours() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["A", "B"])?;
        let (a, b) = (p.stages[0].id, p.stages[1].id);

        let x = add(&db, "X", a, t0())?;
        let y = add(&db, "Y", a, t0())?;
        db.move_item_at(x, b, t0() + Duration::hours(2))?;
        db.move_item_at(y, b, t0() + Duration::hours(4))?;

        let report = db.get_pipeline_report_at(p.pipeline.id, t0() + Duration::hours(6))?;
        assert_eq!(report.stages[0].average_time_in_stage, Some(3.0));
        assert_eq!(report.stages[1].average_time_in_stage, None);
        Ok(())
    }

    #[test]
    fn test_sales_scenario_report() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["A", "B"])?;
        let (a, b) = (p.stages[0].id, p.stages[1].id);
        let x = add(&db, "X", a, t0())?;
        db.move_item_at(x, b, t0() + Duration::minutes(90))?;

        let now = t0() + Duration::hours(4);
        let report = db.get_pipeline_report_at(p.pipeline.id, now)?;
        assert_eq!(report.generated_at, now);
        let names: Vec<&str> = report.stages.iter().map(|s| s.stage.name.as_str()).collect();
        assert_eq!(names, ["A", "B"]);

        let (sa, sb) = (&report.stages[0], &report.stages[1]);
        assert_eq!(sa.current_item_count, 0);
        assert!(sa.items.is_empty());
        assert_eq!(sa.average_time_in_stage, Some(1.5));

        assert_eq!(sb.current_item_count, 1);
        assert_eq!(sb.items[0].item.id, x);
        assert_eq!(sb.items[0].entered_at, t0() + Duration::minutes(90));
        assert_eq!(sb.items[0].time_in_stage, 2.5);
        Ok(())
    }

    #[test]
    fn test_stage_items_most_recent_first() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["A"])?;
        let old = add(&db, "old", p.stages[0].id, t0())?;
        let new = add(&db, "new", p.stages[0].id, t0() + Duration::hours(1))?;

        let report = db.get_pipeline_report_at(p.pipeline.id, t0() + Duration::hours(2))?;
        let ids: Vec<i64> = report.stages[0].items.iter().map(|d| d.item.id).collect();
        assert_eq!(ids, [new, old]);
        Ok(())
    }

    #[test]
    fn test_report_unknown_pipeline() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let err = db.get_pipeline_report(77).unwrap_err();
        assert_eq!(err.to_string(), "Pipeline 77 not found");
        Ok(())
    }

    #[test]
    fn test_velocity_pools_closed_visits_per_pipeline() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let sales = db.create_pipeline("Sales", &["A", "B", "C"])?;
        let hiring = db.create_pipeline("Hiring", &["Screen"])?;
        let [a, b, c] = [sales.stages[0].id, sales.stages[1].id, sales.stages[2].id];

        let x = add(&db, "X", a, t0())?;
        db.move_item_at(x, b, t0() + Duration::hours(1))?;
        db.move_item_at(x, c, t0() + Duration::hours(6))?;
        add(&db, "Y", a, t0())?;
        add(&db, "candidate", hiring.stages[0].id, t0())?;

        let velocity = db.get_pipeline_velocity_report()?;
        assert_eq!(velocity.len(), 2);

        assert_eq!(velocity[0].pipeline_name, "Sales");
        assert_eq!(velocity[0].total_items, 2);
        // Visits of 1h (A) and 5h (B).
        assert_eq!(velocity[0].avg_time_in_pipeline, Some(3.0));

        assert_eq!(velocity[1].pipeline_name, "Hiring");
        assert_eq!(velocity[1].total_items, 1);
        assert_eq!(velocity[1].avg_time_in_pipeline, None);
        Ok(())
    }

    #[test]
    fn test_missing_open_entry_is_logged() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["A"])?;
        let x = add(&db, "X", p.stages[0].id, t0())?;
        db.conn
            .execute(
                "DELETE FROM pipeline_item_stage_history WHERE pipeline_item_id = ?1",
                params![x],
            )
            .context("drop open entry")?;

        let (report, logs) = capture_logs(|| {
            db.get_pipeline_report_at(p.pipeline.id, t0() + Duration::hours(2))
        });
        let report = report?;
        let dwell = &report.stages[0].items[0];
        assert_eq!(dwell.entered_at, t0());
        assert_eq!(dwell.time_in_stage, 2.0);

        let warning = logs
            .lines()
            .find(|line| line.contains("WARN"))
            .expect("missing entry is logged");
        assert!(warning.contains("no open history entry"));
        assert!(warning.contains(&format!("item_id={}", x)));
        Ok(())
    }

    #[test]
    fn test_report_counts_each_item_once_during_concurrent_moves() -> Result<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("report.db");
        let db = BoardDb::new(&path)?;
        let p = db.create_pipeline("Sales", &["A", "B", "C"])?;
        let stage_ids: Vec<i64> = p.stages.iter().map(|s| s.id).collect();
        let item_id = add(&db, "X", stage_ids[0], t0())?;

        let done = Arc::new(AtomicBool::new(false));
        let mover = {
            let path = path.clone();
            let done = done.clone();
            let stage_ids = stage_ids.clone();
            std::thread::spawn(move || -> Result<()> {
                let conn = BoardDb::new(&path)?;
                let outcome = (1..=200).try_for_each(|n| {
                    conn.move_item(item_id, stage_ids[n % stage_ids.len()])
                        .map(|_| ())
                });
                done.store(true, Ordering::SeqCst);
                outcome
            })
        };

        let mut reports = 0;
        while !done.load(Ordering::SeqCst) || reports == 0 {
            let report = db.get_pipeline_report(p.pipeline.id)?;
            let counted: i64 = report.stages.iter().map(|s| s.current_item_count).sum();
            let listed: usize = report.stages.iter().map(|s| s.items.len()).sum();
            assert_eq!(counted, 1, "item counted {} times", counted);
            assert_eq!(listed, 1);
            reports += 1;
        }
        mover.join().expect("mover thread panicked")?;
        assert!(db.verify_item_ledger(item_id)?.is_consistent());
        Ok(())
    }
}
