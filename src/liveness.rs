use chrono::{DateTime, Duration, Utc};

use crate::sensor::{DeviceState, LivenessPolicy, Reading};

pub const DEFAULT_THRESHOLD_SECONDS: i64 = 60;
pub const MAX_THRESHOLD_SECONDS: i64 = 10 * 365 * 86_400;

/// Maximum age of a reading that still counts as live. Always at least one second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Threshold(i64);

impl Threshold {
    pub fn seconds(self) -> i64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::seconds(self.0)
    }

    /// Requested values of zero or below fall back to `default`.
    pub fn from_request(requested: Option<i64>, default: Threshold) -> Self {
        match requested {
            Some(seconds) if seconds > 0 => Threshold(seconds.min(MAX_THRESHOLD_SECONDS)),
            _ => default,
        }
    }
}

impl Default for Threshold {
    fn default() -> Self {
        Threshold(DEFAULT_THRESHOLD_SECONDS)
    }
}

impl From<i64> for Threshold {
    fn from(seconds: i64) -> Self {
        Threshold::from_request(Some(seconds), Threshold::default())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    NeverReported,
    Fresh,
    Stale,
    /// Latest reading is stamped after `now`.
    FromFuture,
}

impl Freshness {
    pub fn is_fresh(self) -> bool {
        self == Freshness::Fresh
    }
}

pub fn classify(latest: Option<&Reading>, now: DateTime<Utc>, threshold: Threshold) -> Freshness {
    let reading = match latest {
        Some(reading) => reading,
        None => return Freshness::NeverReported,
    };

    let age = now.signed_duration_since(reading.timestamp);
    if age < Duration::zero() {
        Freshness::FromFuture
    } else if age <= threshold.as_duration() {
        Freshness::Fresh
    } else {
        Freshness::Stale
    }
}

pub fn is_fresh(latest: Option<&Reading>, now: DateTime<Utc>, threshold: Threshold) -> bool {
    classify(latest, now, threshold).is_fresh()
}

/// Folds per-stream freshness into the device state.
///
/// With `AllFresh` an empty stream set is offline: nothing vouches for the node.
pub fn overall_state<I>(freshness: I, policy: LivenessPolicy) -> DeviceState
where
    I: IntoIterator<Item = bool>,
{
    let mut seen_any = false;
    let mut any_fresh = false;
    let mut all_fresh = true;
    for fresh in freshness {
        seen_any = true;
        any_fresh |= fresh;
        all_fresh &= fresh;
    }

    let online = match policy {
        LivenessPolicy::AnyFresh => any_fresh,
        LivenessPolicy::AllFresh => seen_any && all_fresh,
    };
    if online { DeviceState::Online } else { DeviceState::Offline }
}

pub fn last_seen<'a, I>(latest: I) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = Option<&'a Reading>>,
{
    latest.into_iter().flatten().map(|reading| reading.timestamp).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn aged(secs: i64) -> Reading {
        Reading::new("temperature", 21.0, now() - Duration::seconds(secs))
    }

    #[test]
    fn freshness_matches_age_within_threshold() {
        for threshold in [1i64, 5, 60, 3600] {
            for age in -5..=threshold + 5 {
                let reading = aged(age);
                assert_eq!(
                    is_fresh(Some(&reading), now(), Threshold::from(threshold)),
                    (0..=threshold).contains(&age),
                    "age {} threshold {}", age, threshold
                );
            }
        }
    }

    #[test]
    fn boundaries_are_inclusive() {
        let threshold = Threshold::from(60);
        assert_eq!(classify(Some(&aged(0)), now(), threshold), Freshness::Fresh);
        assert_eq!(classify(Some(&aged(60)), now(), threshold), Freshness::Fresh);
        assert_eq!(classify(Some(&aged(61)), now(), threshold), Freshness::Stale);
    }

    #[test]
    fn future_readings_are_never_fresh() {
        let threshold = Threshold::from(i64::MAX);
        assert_eq!(threshold.seconds(), MAX_THRESHOLD_SECONDS);
        for ahead in [1, 59, 86_400 * 365] {
            assert_eq!(classify(Some(&aged(-ahead)), now(), threshold), Freshness::FromFuture);
        }
        let just_ahead = Reading::new("temperature", 1.0, now() + Duration::milliseconds(1));
        assert!(!is_fresh(Some(&just_ahead), now(), Threshold::default()));
    }

    #[test]
    fn missing_reading_never_reported() {
        assert_eq!(classify(None, now(), Threshold::default()), Freshness::NeverReported);
        assert!(!is_fresh(None, now(), Threshold::default()));
    }

    #[test]
    fn non_positive_threshold_falls_back_to_default() {
        let default = Threshold::default();
        assert_eq!(Threshold::from_request(Some(0), default).seconds(), 60);
        assert_eq!(Threshold::from_request(Some(-15), default).seconds(), 60);
        assert_eq!(Threshold::from_request(None, default).seconds(), 60);
        assert_eq!(Threshold::from_request(Some(1), default).seconds(), 1);
        assert_eq!(Threshold::from(0).seconds(), 60);
    }

    #[test]
    fn any_fresh_needs_a_single_live_stream() {
        assert_eq!(overall_state(vec![false, true, false], LivenessPolicy::AnyFresh), DeviceState::Online);
        assert_eq!(overall_state(vec![false, false, false], LivenessPolicy::AnyFresh), DeviceState::Offline);
        assert_eq!(overall_state(Vec::new(), LivenessPolicy::AnyFresh), DeviceState::Offline);
    }

    #[test]
    fn all_fresh_needs_every_stream() {
        assert_eq!(overall_state(vec![true, true], LivenessPolicy::AllFresh), DeviceState::Online);
        assert_eq!(overall_state(vec![true, false], LivenessPolicy::AllFresh), DeviceState::Offline);
        assert_eq!(overall_state(Vec::new(), LivenessPolicy::AllFresh), DeviceState::Offline);
    }

    #[test]
    fn last_seen_is_newest_reported_timestamp() {
        let older = aged(500);
        let newer = aged(10);
        assert_eq!(last_seen(vec![Some(&older), None, Some(&newer)]), Some(newer.timestamp));
        assert_eq!(last_seen(vec![None, None]), None);
    }
}
