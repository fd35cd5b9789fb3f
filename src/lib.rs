pub mod board;
pub mod config;
pub mod errors;
pub mod logging;

pub use board::db::{BoardDb, DbHandle};
pub use errors::{ErrorCategory, Result, TrackerError};
