use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single observation from one sensor stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    #[serde(rename = "stream")]
    pub stream_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    pub fn new(stream_id: &str, value: f64, timestamp: DateTime<Utc>) -> Self {
        Reading {
            stream_id: stream_id.to_string(),
            value,
            timestamp,
        }
    }
}

/// Static description of a stream the node reports on.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub id: String,
    pub label: String,
    pub unit: String,
    pub valid_min: f64,
    pub valid_max: f64,
}

impl StreamDescriptor {
    pub fn new(id: &str, label: &str, unit: &str, valid_min: f64, valid_max: f64) -> Self {
        StreamDescriptor {
            id: id.to_string(),
            label: label.to_string(),
            unit: unit.to_string(),
            valid_min,
            valid_max,
        }
    }

    pub fn accepts(&self, value: f64) -> bool {
        value.is_finite() && value >= self.valid_min && value <= self.valid_max
    }
}

pub fn find_stream<'a>(streams: &'a [StreamDescriptor], id: &str) -> Option<&'a StreamDescriptor> {
    streams.iter().find(|stream| stream.id == id)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
}

/// How per-stream freshness folds into the device state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessPolicy {
    /// A single fresh stream is enough for the node to be online.
    #[default]
    AnyFresh,
    AllFresh,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_rejects_out_of_range_and_non_finite() {
        let humidity = StreamDescriptor::new("humidity", "Humidity", "%", 0.0, 100.0);

        assert!(humidity.accepts(0.0));
        assert!(humidity.accepts(100.0));
        assert!(!humidity.accepts(100.5));
        assert!(!humidity.accepts(-0.1));
        assert!(!humidity.accepts(f64::NAN));
        assert!(!humidity.accepts(f64::INFINITY));
    }

    #[test]
    fn device_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DeviceState::Online).unwrap(), "\"online\"");
        assert_eq!(serde_json::to_string(&DeviceState::Offline).unwrap(), "\"offline\"");
    }

    #[test]
    fn policy_parses_from_snake_case() {
        let policy: LivenessPolicy = serde_json::from_str("\"all_fresh\"").unwrap();
        assert_eq!(policy, LivenessPolicy::AllFresh);
        assert_eq!(LivenessPolicy::default(), LivenessPolicy::AnyFresh);
    }
}
