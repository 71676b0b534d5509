use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::database::{DatabaseError, ReadingStore};
use crate::sensor::Reading;

pub use crate::config::default_streams;

/// In-memory store. Window queries come back in insertion order, which is
/// deliberately not chronological.
#[derive(Default)]
pub struct MemoryStore {
    readings: Mutex<Vec<Reading>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn push(&self, stream: &str, value: f64, timestamp: DateTime<Utc>) {
        self.readings.lock().unwrap().push(Reading::new(stream, value, timestamp));
    }

    pub fn fail_stream(&self, stream: &str) {
        self.failing.lock().unwrap().insert(stream.to_string());
    }

    fn check(&self, stream: &str) -> Result<(), DatabaseError> {
        if self.failing.lock().unwrap().contains(stream) {
            Err(DatabaseError::Busy)
        } else {
            Ok(())
        }
    }

    fn of_stream(&self, stream: &str) -> Vec<Reading> {
        self.readings
            .lock()
            .unwrap()
            .iter()
            .filter(|reading| reading.stream_id == stream)
            .cloned()
            .collect()
    }
}

impl ReadingStore for MemoryStore {
    fn add_reading(&self, reading: &Reading) -> Result<(), DatabaseError> {
        self.check(&reading.stream_id)?;
        self.readings.lock().unwrap().push(reading.clone());
        Ok(())
    }

    fn latest(&self, stream: &str) -> Result<Option<Reading>, DatabaseError> {
        self.check(stream)?;
        Ok(self.of_stream(stream).into_iter().max_by_key(|reading| reading.timestamp))
    }

    fn within_window(&self, stream: &str, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Reading>, DatabaseError>
    {
        self.check(stream)?;
        let mut readings = self.of_stream(stream);
        readings.retain(|reading| reading.timestamp >= start && reading.timestamp <= end);
        Ok(readings)
    }

    fn most_recent(&self, stream: &str, until: DateTime<Utc>, limit: usize)
        -> Result<Vec<Reading>, DatabaseError>
    {
        self.check(stream)?;
        let mut readings = self.of_stream(stream);
        readings.retain(|reading| reading.timestamp <= until);
        readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        readings.truncate(limit);
        Ok(readings)
    }

    fn count_readings(&self, stream: &str) -> Result<i64, DatabaseError> {
        self.check(stream)?;
        Ok(self.of_stream(stream).len() as i64)
    }
}
