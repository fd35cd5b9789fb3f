use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stage {
    pub id: i64,
    pub pipeline_id: i64,
    pub name: String,
    /// Zero-based position within the pipeline. Always contiguous.
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineWithStages {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub stages: Vec<Stage>,
}

/// Where `add_stage` inserts the new stage.
///
/// Serialized as `"start"`, `"end"` or a bare integer index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StagePosition {
    Index(u32),
    Named(NamedPosition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedPosition {
    Start,
    End,
}

impl StagePosition {
    pub const START: Self = Self::Named(NamedPosition::Start);
    pub const END: Self = Self::Named(NamedPosition::End);
}

impl FromStr for StagePosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(Self::START),
            "end" => Ok(Self::END),
            other => other
                .parse::<u32>()
                .map(Self::Index)
                .map_err(|_| format!("Invalid stage position: {} (expected start, end or an index)", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineItem {
    pub id: i64,
    pub title: String,
    pub stage_id: i64,
    pub person_id: Option<i64>,
    pub organization_id: Option<i64>,
    pub owner_user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Input for `create_item`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewItem {
    pub title: String,
    pub stage_id: i64,
    #[serde(default)]
    pub person_id: Option<i64>,
    #[serde(default)]
    pub organization_id: Option<i64>,
    pub owner_user_id: String,
}

/// One interval an item spent in one stage. Open while `left_at` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageHistoryEntry {
    pub id: i64,
    pub pipeline_item_id: i64,
    pub stage_id: i64,
    pub entered_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl StageHistoryEntry {
    pub fn is_open(&self) -> bool {
        self.left_at.is_none()
    }

    /// Dwell time in fractional hours; `None` while the entry is open.
    pub fn duration_hours(&self) -> Option<f64> {
        self.left_at.map(|left| hours_between(self.entered_at, left))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRule {
    pub id: i64,
    pub stage_id: i64,
    pub template_title: String,
    pub offset_days: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub owner_user_id: String,
    pub due_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub person_id: Option<i64>,
    pub pipeline_item_id: Option<i64>,
}

// API view types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDetail {
    pub item: PipelineItem,
    pub history: Vec<StageHistoryEntry>,
    pub tasks: Vec<Task>,
}

// Analytics report types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub pipeline: Pipeline,
    pub generated_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub current_item_count: i64,
    /// Mean dwell time in hours over closed visits; `None` when no visit has closed.
    pub average_time_in_stage: Option<f64>,
    /// Current items, most recently created first.
    pub items: Vec<ItemDwell>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDwell {
    pub item: PipelineItem,
    pub entered_at: DateTime<Utc>,
    /// Hours since the item entered its current stage.
    pub time_in_stage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineVelocity {
    pub pipeline_id: i64,
    pub pipeline_name: String,
    pub total_items: i64,
    /// Mean duration of every closed stage visit in the pipeline, in hours.
    ///
    /// This is per-visit dwell time pooled across stages, not the start-to-finish
    /// lifetime of an item. `None` when no visit has closed.
    pub avg_time_in_pipeline: Option<f64>,
}

/// Fractional hours between two instants (negative if `to` precedes `from`).
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
