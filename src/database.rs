use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::sensor::Reading;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatabaseError {
    #[error("database is busy")]
    Busy,
    #[error("not found")]
    NotFound,
    #[error("conflicting write")]
    Conflict,
    #[error("{0}")]
    Other(String),
}

/// Query contract of the time-ordered reading log.
///
/// Implementations are free to return rows in any order; callers that need
/// a particular ordering sort for themselves.
pub trait ReadingStore {
    fn add_reading(&self, reading: &Reading) -> Result<(), DatabaseError>;

    /// Newest reading of a stream, `None` if the stream never reported.
    fn latest(&self, stream: &str) -> Result<Option<Reading>, DatabaseError>;

    /// Readings with `start <= timestamp <= end`.
    fn within_window(&self, stream: &str, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Reading>, DatabaseError>;

    /// Up to `limit` readings stamped at or before `until`, newest first.
    fn most_recent(&self, stream: &str, until: DateTime<Utc>, limit: usize)
        -> Result<Vec<Reading>, DatabaseError>;

    fn count_readings(&self, stream: &str) -> Result<i64, DatabaseError>;
}
