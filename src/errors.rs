//! Typed error hierarchy for the stage tracker.
//!
//! Every library operation returns `TrackerError`. Variants fall into four
//! categories (see `ErrorCategory`):
//! - validation: a required field is missing or blank, or an enum value is invalid
//! - not found: a referenced pipeline, stage, item, rule or task does not exist
//! - conflict: a non-empty stage delete, a duplicate stage rule, or a lost
//!   stage-transition race
//! - persistence: any lower-level storage failure, with operation context

use thiserror::Error;

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

/// Coarse classification used by the CLI and HTTP layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    Conflict,
    Persistence,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Stage {stage_id} cannot be deleted: it still holds {item_count} item(s)")]
    StageNotEmpty { stage_id: i64, item_count: i64 },

    #[error("Stage {stage_id} already has an automation rule")]
    DuplicateStageRule { stage_id: i64 },

    #[error("Pipeline item {item_id} was moved by a concurrent request; reload and retry")]
    TransitionConflict { item_id: i64 },

    #[error("Stage order for pipeline {pipeline_id} is not contiguous: {orders:?}")]
    StageOrderCorrupted { pipeline_id: i64, orders: Vec<i64> },

    #[error("Database error during {operation}: {source}")]
    Persistence {
        operation: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

impl TrackerError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) => ErrorCategory::Validation,
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::StageNotEmpty { .. }
            | Self::DuplicateStageRule { .. }
            | Self::TransitionConflict { .. } => ErrorCategory::Conflict,
            Self::StageOrderCorrupted { .. } | Self::Persistence { .. } => {
                ErrorCategory::Persistence
            }
        }
    }

    /// Only a lost transition race is worth retrying as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransitionConflict { .. })
    }
}

/// Attaches operation context to raw storage errors, in the spirit of
/// `anyhow::Context`.
pub trait StoreContext<T> {
    fn context(self, operation: &'static str) -> Result<T>;
}

impl<T> StoreContext<T> for std::result::Result<T, rusqlite::Error> {
    fn context(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| TrackerError::Persistence { operation, source })
    }
}

/// True when SQLite rejected a write because of a UNIQUE or PRIMARY KEY constraint.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, message) => {
            code.code == rusqlite::ErrorCode::ConstraintViolation
                && message.as_deref().is_none_or(|value| {
                    value.contains("UNIQUE constraint failed")
                        || value.contains("PRIMARY KEY constraint failed")
                })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_carries_entity_and_id() {
        let err = TrackerError::not_found("Pipeline", 42);
        match &err {
            TrackerError::NotFound { entity, id } => {
                assert_eq!(*entity, "Pipeline");
                assert_eq!(*id, 42);
            }
            _ => panic!("Expected NotFound"),
        }
        assert_eq!(err.to_string(), "Pipeline 42 not found");
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[test]
    fn stage_not_empty_reports_count() {
        let err = TrackerError::StageNotEmpty {
            stage_id: 3,
            item_count: 7,
        };
        assert!(err.to_string().contains("7 item(s)"));
        assert_eq!(err.category(), ErrorCategory::Conflict);
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_transition_conflict_is_retryable() {
        assert!(TrackerError::TransitionConflict { item_id: 1 }.is_retryable());
        assert!(!TrackerError::DuplicateStageRule { stage_id: 1 }.is_retryable());
        assert!(!TrackerError::validation("title is required").is_retryable());
    }

    #[test]
    fn store_context_wraps_rusqlite_errors() {
        let raw: std::result::Result<(), rusqlite::Error> =
            Err(rusqlite::Error::QueryReturnedNoRows);
        let err = raw.context("load stage").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Persistence);
        assert!(err.to_string().contains("load stage"));
    }

    #[test]
    fn unique_violation_detected_from_sqlite_failure() -> Result<()> {
        let conn = rusqlite::Connection::open_in_memory().context("open")?;
        conn.execute_batch("CREATE TABLE t (k INTEGER UNIQUE); INSERT INTO t VALUES (1);")
            .context("setup")?;
        let err = conn
            .execute("INSERT INTO t VALUES (1)", [])
            .expect_err("duplicate insert should fail");
        assert!(is_unique_violation(&err));
        assert!(!is_unique_violation(&rusqlite::Error::QueryReturnedNoRows));
        Ok(())
    }

    #[test]
    fn all_errors_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&TrackerError::TransitionConflict { item_id: 9 });
        assert_std_error(&TrackerError::validation("x"));
    }
}
