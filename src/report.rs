//! Device status report: freshness per stream, the folded device state and
//! windowed statistics, assembled from one pass over the configured streams.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{ser::SerializeStruct, Serialize};

use crate::database::ReadingStore;
use crate::liveness::{self, Freshness, Threshold};
use crate::sensor::{DeviceState, LivenessPolicy, Reading, StreamDescriptor};
use crate::window::{self, Window, WindowStats};

/// Caller-supplied knobs, unvalidated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusRequest {
    pub threshold_seconds: Option<i64>,
    pub window_hours: Option<i64>,
    pub window_limit: Option<i64>,
}

/// Defaults applied when a request leaves a knob out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReportSettings {
    pub threshold: Threshold,
    pub window_hours: i64,
    pub policy: LivenessPolicy,
}

impl Default for ReportSettings {
    fn default() -> Self {
        ReportSettings {
            threshold: Threshold::default(),
            window_hours: window::DEFAULT_WINDOW_HOURS,
            policy: LivenessPolicy::AnyFresh,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    StoreUnavailable { stream: String, error: String },
    ClockAnomaly { stream: String, timestamp: DateTime<Utc> },
    InvalidParameter { name: &'static str, requested: i64, applied: i64 },
}

impl StatusRequest {
    /// Resolves the request against `settings`, clamping out-of-range values.
    /// Every adjusted parameter yields a diagnostic.
    pub fn resolve(&self, settings: &ReportSettings) -> (Threshold, Window, Vec<Diagnostic>) {
        let mut diagnostics = Vec::new();

        let threshold = Threshold::from_request(self.threshold_seconds, settings.threshold);
        if let Some(requested) = self.threshold_seconds {
            if requested != threshold.seconds() {
                diagnostics.push(Diagnostic::InvalidParameter {
                    name: "threshold",
                    requested,
                    applied: threshold.seconds(),
                });
            }
        }

        let window = match (self.window_limit, self.window_hours) {
            (Some(requested), _) => {
                let applied = window::clamp_rows(requested);
                if requested != applied as i64 {
                    diagnostics.push(Diagnostic::InvalidParameter {
                        name: "limit",
                        requested,
                        applied: applied as i64,
                    });
                }
                Window::Count { limit: applied }
            }
            (None, Some(requested)) => {
                let applied = window::clamp_hours(requested);
                if requested != applied {
                    diagnostics.push(Diagnostic::InvalidParameter {
                        name: "hours",
                        requested,
                        applied,
                    });
                }
                Window::Time { hours: applied }
            }
            (None, None) => Window::hours(settings.window_hours),
        };

        (threshold, window, diagnostics)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StreamStatus {
    pub stream_id: String,
    pub latest_reading: Option<Reading>,
    pub freshness: Freshness,
    pub stats: WindowStats,
    /// The store could not answer for this stream; everything else is "never reported".
    pub unavailable: bool,
}

impl StreamStatus {
    fn never_reported(stream_id: &str, unavailable: bool) -> Self {
        StreamStatus {
            stream_id: stream_id.to_string(),
            latest_reading: None,
            freshness: Freshness::NeverReported,
            stats: WindowStats::empty(),
            unavailable,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.freshness.is_fresh()
    }

    pub fn windowed_count(&self) -> usize {
        self.stats.count
    }

    pub fn windowed_values(&self) -> &[Reading] {
        &self.stats.series
    }
}

impl Serialize for StreamStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Point {
            value: f64,
            timestamp: DateTime<Utc>,
        }

        let series: Vec<Point> = self.stats.series
            .iter()
            .map(|reading| Point { value: reading.value, timestamp: reading.timestamp })
            .collect();

        let mut state = serializer.serialize_struct("stream_status", 10)?;
        state.serialize_field("is_fresh", &self.is_fresh())?;
        state.serialize_field("latest_value", &self.latest_reading.as_ref().map(|r| r.value))?;
        state.serialize_field("latest_timestamp", &self.latest_reading.as_ref().map(|r| r.timestamp))?;
        state.serialize_field("window_count", &self.stats.count)?;
        state.serialize_field("window_average", &self.stats.average)?;
        state.serialize_field("window_min", &self.stats.min)?;
        state.serialize_field("window_max", &self.stats.max)?;
        state.serialize_field("window_range", &self.stats.range())?;
        state.serialize_field("series", &series)?;
        state.serialize_field("unavailable", &self.unavailable)?;
        state.end()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub overall_state: DeviceState,
    pub last_seen: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
    pub threshold_seconds: i64,
    pub policy: LivenessPolicy,
    pub window: Window,
    #[serde(rename = "streams")]
    pub per_stream: BTreeMap<String, StreamStatus>,
    pub diagnostics: Vec<Diagnostic>,
}

impl DeviceStatus {
    pub fn failed_streams(&self) -> Vec<&str> {
        self.per_stream
            .values()
            .filter(|status| status.unavailable)
            .map(|status| status.stream_id.as_str())
            .collect()
    }
}

fn stream_status<S: ReadingStore + ?Sized>(
    store: &S,
    stream: &StreamDescriptor,
    now: DateTime<Utc>,
    threshold: Threshold,
    window: Window,
    diagnostics: &mut Vec<Diagnostic>,
) -> StreamStatus {
    let fetched = store.latest(&stream.id)
        .and_then(|latest| window.fetch(store, &stream.id, now).map(|rows| (latest, rows)));

    let (latest, rows) = match fetched {
        Ok(fetched) => fetched,
        Err(err) => {
            warn!("Reading store failed for {}: {}", stream.id, err);
            diagnostics.push(Diagnostic::StoreUnavailable {
                stream: stream.id.clone(),
                error: err.to_string(),
            });
            return StreamStatus::never_reported(&stream.id, true);
        }
    };

    let freshness = liveness::classify(latest.as_ref(), now, threshold);
    if let (Freshness::FromFuture, Some(reading)) = (freshness, latest.as_ref()) {
        warn!("Latest {} reading is stamped in the future: {}", stream.id, reading.timestamp);
        diagnostics.push(Diagnostic::ClockAnomaly {
            stream: stream.id.clone(),
            timestamp: reading.timestamp,
        });
    }

    StreamStatus {
        stream_id: stream.id.clone(),
        latest_reading: latest,
        freshness,
        stats: window::aggregate(rows, window, now),
        unavailable: false,
    }
}

/// Builds the status report for every configured stream. Never fails: store
/// errors degrade the affected stream and show up in `diagnostics`.
pub fn device_status<S: ReadingStore + ?Sized>(
    store: &S,
    streams: &[StreamDescriptor],
    now: DateTime<Utc>,
    request: &StatusRequest,
    settings: &ReportSettings,
) -> DeviceStatus {
    let (threshold, window, mut diagnostics) = request.resolve(settings);

    let per_stream: BTreeMap<String, StreamStatus> = streams
        .iter()
        .map(|stream| {
            let status = stream_status(store, stream, now, threshold, window, &mut diagnostics);
            (stream.id.clone(), status)
        })
        .collect();

    let overall_state = liveness::overall_state(
        per_stream.values().map(StreamStatus::is_fresh),
        settings.policy,
    );
    let last_seen = liveness::last_seen(per_stream.values().map(|s| s.latest_reading.as_ref()));

    debug!("Device {:?}, last seen {:?}, {} diagnostics", overall_state, last_seen, diagnostics.len());

    DeviceStatus {
        overall_state,
        last_seen,
        generated_at: now,
        threshold_seconds: threshold.seconds(),
        policy: settings.policy,
        window,
        per_stream,
        diagnostics,
    }
}
