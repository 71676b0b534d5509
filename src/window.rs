use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::database::{DatabaseError, ReadingStore};
use crate::sensor::Reading;

pub const DEFAULT_WINDOW_HOURS: i64 = 24;
pub const MIN_WINDOW_HOURS: i64 = 1;
pub const MAX_WINDOW_HOURS: i64 = 720;

pub const MIN_WINDOW_ROWS: usize = 50;
pub const MAX_WINDOW_ROWS: usize = 200;

/// Slice of a stream's history used for statistics and charts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Window {
    /// Readings from the last `hours` hours, up to now.
    Time { hours: i64 },
    /// The `limit` most recent readings at or before now.
    Count { limit: usize },
}

pub fn clamp_hours(requested: i64) -> i64 {
    requested.clamp(MIN_WINDOW_HOURS, MAX_WINDOW_HOURS)
}

pub fn clamp_rows(requested: i64) -> usize {
    requested.clamp(MIN_WINDOW_ROWS as i64, MAX_WINDOW_ROWS as i64) as usize
}

impl Window {
    pub fn hours(requested: i64) -> Self {
        Window::Time { hours: clamp_hours(requested) }
    }

    pub fn rows(requested: i64) -> Self {
        Window::Count { limit: clamp_rows(requested) }
    }

    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Window::Time { hours } => Some(now - Duration::hours(hours)),
            Window::Count { .. } => None,
        }
    }

    /// Asks the store for this window's rows. The result is not trusted to be
    /// filtered or ordered; pass it through [`Window::select`].
    pub fn fetch<S: ReadingStore + ?Sized>(&self, store: &S, stream: &str, now: DateTime<Utc>)
        -> Result<Vec<Reading>, DatabaseError>
    {
        match *self {
            Window::Time { hours } => store.within_window(stream, now - Duration::hours(hours), now),
            Window::Count { limit } => store.most_recent(stream, now, limit),
        }
    }

    /// Filters `readings` to the window and orders them chronologically.
    pub fn select(&self, mut readings: Vec<Reading>, now: DateTime<Utc>) -> Vec<Reading> {
        let start = self.start(now);
        readings.retain(|reading| {
            reading.timestamp <= now && start.map_or(true, |start| reading.timestamp >= start)
        });
        readings.sort_by(|a, b| {
            a.timestamp.cmp(&b.timestamp).then(a.value.total_cmp(&b.value))
        });

        match *self {
            Window::Count { limit } if readings.len() > limit => {
                let excess = readings.len() - limit;
                readings.split_off(excess)
            }
            _ => readings,
        }
    }
}

impl Default for Window {
    fn default() -> Self {
        Window::Time { hours: DEFAULT_WINDOW_HOURS }
    }
}

/// Statistics over one stream's window.
///
/// `average` is 0 for an empty window; check `count` before trusting it.
/// `min` and `max` are `None` rather than 0 so that "no data" cannot be
/// mistaken for a reading of zero.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowStats {
    pub count: usize,
    pub average: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Chronological, oldest first.
    pub series: Vec<Reading>,
}

impl WindowStats {
    pub fn empty() -> Self {
        WindowStats {
            count: 0,
            average: 0.0,
            min: None,
            max: None,
            series: Vec::new(),
        }
    }

    pub fn range(&self) -> Option<f64> {
        match (self.min, self.max) {
            (Some(min), Some(max)) => Some(max - min),
            _ => None,
        }
    }

    /// Summarises an already selected series.
    pub fn from_series(series: Vec<Reading>) -> Self {
        if series.is_empty() {
            return WindowStats::empty();
        }

        let mut average = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for (i, reading) in series.iter().enumerate() {
            // Running mean keeps a window of identical values exact.
            average += (reading.value - average) / (i + 1) as f64;
            min = min.min(reading.value);
            max = max.max(reading.value);
        }

        WindowStats {
            count: series.len(),
            average,
            min: Some(min),
            max: Some(max),
            series,
        }
    }
}

pub fn aggregate(readings: Vec<Reading>, window: Window, now: DateTime<Utc>) -> WindowStats {
    WindowStats::from_series(window.select(readings, now))
}
