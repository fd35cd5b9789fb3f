//! Stage Rule Engine: at most one automation rule per stage, and the tasks it
//! generates when an item enters that stage.

use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tracing::info;

use super::db::{BoardDb, db_time, required, time_column};
use super::models::{PipelineItem, StageRule, Task, TaskStatus};
use crate::errors::{Result, StoreContext, TrackerError, is_unique_violation};

const TASK_COLUMNS: &str = "id, title, owner_user_id, due_at, status, person_id, pipeline_item_id";

impl BoardDb {
    pub fn create_rule(
        &self,
        stage_id: i64,
        template_title: &str,
        offset_days: i64,
    ) -> Result<StageRule> {
        let template_title = validate_rule(template_title, offset_days)?;
        self.require_stage(stage_id)?;
        if self.get_rule(stage_id)?.is_some() {
            return Err(TrackerError::DuplicateStageRule { stage_id });
        }

        let inserted = self.conn.execute(
            "INSERT INTO stage_rules (stage_id, template_title, offset_days) VALUES (?1, ?2, ?3)",
            params![stage_id, template_title, offset_days],
        );
        match inserted {
            Ok(_) => {}
            // Lost a race with another writer between the check and the insert.
            Err(e) if is_unique_violation(&e) => {
                return Err(TrackerError::DuplicateStageRule { stage_id });
            }
            Err(e) => return Err(e).context("insert stage rule"),
        }

        info!(stage_id, offset_days, "Stage rule created");
        self.require_rule(stage_id)
    }

    pub fn update_rule(
        &self,
        stage_id: i64,
        template_title: &str,
        offset_days: i64,
    ) -> Result<StageRule> {
        let template_title = validate_rule(template_title, offset_days)?;
        let updated = self
            .conn
            .execute(
                "UPDATE stage_rules SET template_title = ?1, offset_days = ?2 WHERE stage_id = ?3",
                params![template_title, offset_days, stage_id],
            )
            .context("update stage rule")?;
        if updated == 0 {
            return Err(TrackerError::not_found("Stage rule", stage_id));
        }
        info!(stage_id, offset_days, "Stage rule updated");
        self.require_rule(stage_id)
    }

    /// Create the stage's rule, or update it when one exists. Returns the rule
    /// and whether it was newly created.
    pub fn put_rule(
        &self,
        stage_id: i64,
        template_title: &str,
        offset_days: i64,
    ) -> Result<(StageRule, bool)> {
        if self.get_rule(stage_id)?.is_some() {
            return Ok((self.update_rule(stage_id, template_title, offset_days)?, false));
        }
        Ok((self.create_rule(stage_id, template_title, offset_days)?, true))
    }

    pub fn delete_rule(&self, stage_id: i64) -> Result<()> {
        let deleted = self
            .conn
            .execute("DELETE FROM stage_rules WHERE stage_id = ?1", params![stage_id])
            .context("delete stage rule")?;
        if deleted == 0 {
            return Err(TrackerError::not_found("Stage rule", stage_id));
        }
        info!(stage_id, "Stage rule deleted");
        Ok(())
    }

    /// Rule for a stage, looked up by stage id.
    pub fn get_rule(&self, stage_id: i64) -> Result<Option<StageRule>> {
        self.conn
            .query_row(
                "SELECT id, stage_id, template_title, offset_days FROM stage_rules WHERE stage_id = ?1",
                params![stage_id],
                rule_from_row,
            )
            .optional()
            .context("load stage rule")
    }

    fn require_rule(&self, stage_id: i64) -> Result<StageRule> {
        self.get_rule(stage_id)?
            .ok_or_else(|| TrackerError::not_found("Stage rule", stage_id))
    }

    /// React to `item` entering `stage_id` at `at`: create the rule's task, if
    /// the stage has a rule. Called by the Item Tracker after its transaction
    /// commits; the caller logs and drops any error.
    pub(crate) fn on_item_entered_stage(
        &self,
        item: &PipelineItem,
        stage_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let Some(rule) = self.get_rule(stage_id)? else {
            return Ok(None);
        };
        let due_at = TimeDelta::try_days(rule.offset_days)
            .and_then(|offset| at.checked_add_signed(offset))
            .ok_or_else(|| {
                TrackerError::validation(format!(
                    "offset of {} days overflows the due date",
                    rule.offset_days
                ))
            })?;

        self.conn
            .execute(
                "INSERT INTO tasks (title, owner_user_id, due_at, status, person_id, pipeline_item_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    rule.template_title,
                    item.owner_user_id,
                    db_time(due_at),
                    TaskStatus::Pending.as_str(),
                    item.person_id,
                    item.id
                ],
            )
            .context("insert task")?;
        let task_id = self.conn.last_insert_rowid();
        self.get_task(task_id)?
            .map(Some)
            .ok_or_else(|| TrackerError::not_found("Task", task_id))
    }

    pub fn get_task(&self, id: i64) -> Result<Option<Task>> {
        self.conn
            .query_row(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id],
                task_from_row,
            )
            .optional()
            .context("load task")
    }

    /// Tasks generated for an item, oldest first.
    pub fn list_tasks_for_item(&self, item_id: i64) -> Result<Vec<Task>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE pipeline_item_id = ?1 ORDER BY id"
            ))
            .context("prepare list_tasks_for_item")?;
        let rows = stmt
            .query_map(params![item_id], task_from_row)
            .context("query tasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read task row")
    }
}

fn validate_rule(template_title: &str, offset_days: i64) -> Result<&str> {
    let template_title = required("Template title", template_title)?;
    if offset_days < 0 {
        return Err(TrackerError::validation(format!(
            "offset_days must be zero or more, got {}",
            offset_days
        )));
    }
    Ok(template_title)
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<StageRule> {
    Ok(StageRule {
        id: row.get(0)?,
        stage_id: row.get(1)?,
        template_title: row.get(2)?,
        offset_days: row.get(3)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(4)?;
    let status = status.parse::<TaskStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        owner_user_id: row.get(2)?,
        due_at: time_column(row, 3)?,
        status,
        person_id: row.get(5)?,
        pipeline_item_id: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::NewItem;
    use crate::errors::ErrorCategory;
    use chrono::{Duration, TimeZone};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_rule_crud() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["Lead", "Won"])?;
        let won = p.stages[1].id;

        assert!(db.get_rule(won)?.is_none());
        let rule = db.create_rule(won, " Send invoice ", 7)?;
        assert_eq!(rule.stage_id, won);
        assert_eq!(rule.template_title, "Send invoice");
        assert_eq!(rule.offset_days, 7);

        let rule = db.update_rule(won, "Send final invoice", 14)?;
        assert_eq!(rule.template_title, "Send final invoice");
        assert_eq!(rule.offset_days, 14);
        assert_eq!(db.get_rule(won)?, Some(rule));

        db.delete_rule(won)?;
        assert!(db.get_rule(won)?.is_none());
        Ok(())
    }

    #[test]
    fn test_duplicate_rule_is_conflict() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["Lead"])?;
        db.create_rule(p.stages[0].id, "Call", 1)?;

        let err = db.create_rule(p.stages[0].id, "Email", 2).unwrap_err();
        assert!(matches!(err, TrackerError::DuplicateStageRule { .. }));
        assert_eq!(err.category(), ErrorCategory::Conflict);
        Ok(())
    }

    #[test]
    fn test_rule_validation_and_missing_rule() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["Lead"])?;
        let lead = p.stages[0].id;

        let err = db.create_rule(lead, "", 1).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        let err = db.create_rule(lead, "Call", -1).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        let err = db.create_rule(999, "Call", 1).unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { entity: "Stage", .. }));

        let err = db.update_rule(lead, "Call", 1).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        let err = db.delete_rule(lead).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
        Ok(())
    }

    #[test]
    fn test_put_rule_creates_then_updates() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["Lead"])?;

        let (rule, created) = db.put_rule(p.stages[0].id, "Call", 1)?;
        assert!(created);
        let (updated, created) = db.put_rule(p.stages[0].id, "Call again", 2)?;
        assert!(!created);
        assert_eq!(updated.id, rule.id);
        assert_eq!(updated.offset_days, 2);
        Ok(())
    }

    #[test]
    fn test_move_into_ruled_stage_creates_one_task() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["Lead", "Proposal"])?;
        let (lead, proposal) = (p.stages[0].id, p.stages[1].id);
        db.create_rule(proposal, "Follow up on proposal", 3)?;

        let item = db.create_item_at(
            NewItem {
                title: "Acme".into(),
                stage_id: lead,
                person_id: Some(42),
                owner_user_id: "owner-7".into(),
                ..Default::default()
            },
            at(),
        )?;
        assert!(db.list_tasks_for_item(item.id)?.is_empty());

        let moved_at = at() + Duration::hours(5);
        db.move_item_at(item.id, proposal, moved_at)?;

        let tasks = db.list_tasks_for_item(item.id)?;
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.title, "Follow up on proposal");
        assert_eq!(task.due_at, moved_at + Duration::days(3));
        assert_eq!(task.owner_user_id, "owner-7");
        assert_eq!(task.person_id, Some(42));
        assert_eq!(task.pipeline_item_id, Some(item.id));
        assert_eq!(task.status, TaskStatus::Pending);
        Ok(())
    }

    #[test]
    fn test_no_rule_means_no_task() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["Lead"])?;
        let item = db.create_item(NewItem {
            title: "Acme".into(),
            stage_id: p.stages[0].id,
            owner_user_id: "u".into(),
            ..Default::default()
        })?;
        assert!(db.on_item_entered_stage(&item, p.stages[0].id, at())?.is_none());
        assert!(db.list_tasks_for_item(item.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_rule_removed_with_its_stage() -> Result<()> {
        let db = BoardDb::new_in_memory()?;
        let p = db.create_pipeline("Sales", &["Lead", "Lost"])?;
        db.create_rule(p.stages[1].id, "Ask for feedback", 0)?;
        db.delete_stage(p.stages[1].id)?;

        let rules: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM stage_rules", [], |row| row.get(0))
            .context("count rules")?;
        assert_eq!(rules, 0);
        Ok(())
    }
}
