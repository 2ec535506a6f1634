//! Decides when the fused risk level is recomputed and retransmitted.
//!
//! Three triggers, checked in priority order:
//!   1. forecast refresh: a nowcast for a new publication key was just logged
//!   2. sensor change: the microcontroller reported a different flag tuple
//!   3. heartbeat: the last update is at least `heartbeat` old
//!
//! The first trigger that holds wins, so each update records exactly one
//! reason.
//!
//! # Clock injection
//! `due_at` and `record_update` take the current `Instant` as a parameter
//! rather than reading the clock, so the heartbeat is deterministic in tests.

use std::fmt;
use std::time::{Duration, Instant};

use crate::model::PublicationKey;

/// Heartbeat period used when the configuration does not set one.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(10);

/// Why a risk update was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateReason {
    ForecastRefresh,
    SensorChange,
    Heartbeat,
}

impl fmt::Display for UpdateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateReason::ForecastRefresh => write!(f, "forecast refresh"),
            UpdateReason::SensorChange => write!(f, "sensor change"),
            UpdateReason::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

// ---------------------------------------------------------------------------
// Publication dedup
// ---------------------------------------------------------------------------

/// Remembers the last publication key that was fetched and logged.
#[derive(Debug, Default)]
pub struct PublicationTracker {
    last: Option<PublicationKey>,
}

impl PublicationTracker {
    /// Starts from a key already present in the log, if any.
    pub fn resume_from(last: Option<PublicationKey>) -> Self {
        Self { last }
    }

    pub fn is_new(&self, key: &PublicationKey) -> bool {
        self.last.as_ref() != Some(key)
    }

    /// Call only after the observation for `key` has been logged, so a failed
    /// fetch is retried on the next tick.
    pub fn mark_logged(&mut self, key: PublicationKey) {
        self.last = Some(key);
    }
}

// ---------------------------------------------------------------------------
// Update policy
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct UpdatePolicy {
    heartbeat: Duration,
    last_update: Option<Instant>,
}

impl UpdatePolicy {
    pub fn new(heartbeat: Duration) -> Self {
        Self {
            heartbeat,
            last_update: None,
        }
    }

    /// Returns the reason an update is due at `now`, or `None`.
    ///
    /// Before the first update the heartbeat is always due, so the
    /// microcontroller gets a risk level on the first tick.
    pub fn due_at(
        &self,
        forecast_refreshed: bool,
        sensor_changed: bool,
        now: Instant,
    ) -> Option<UpdateReason> {
        if forecast_refreshed {
            Some(UpdateReason::ForecastRefresh)
        } else if sensor_changed {
            Some(UpdateReason::SensorChange)
        } else if self.heartbeat_elapsed(now) {
            Some(UpdateReason::Heartbeat)
        } else {
            None
        }
    }

    pub fn record_update(&mut self, now: Instant) {
        self.last_update = Some(now);
    }

    fn heartbeat_elapsed(&self, now: Instant) -> bool {
        match self.last_update {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.heartbeat,
        }
    }
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_updated_at(t0: Instant) -> UpdatePolicy {
        let mut policy = UpdatePolicy::default();
        policy.record_update(t0);
        policy
    }

    // --- Heartbeat ----------------------------------------------------------

    #[test]
    fn test_first_tick_fires_heartbeat() {
        let policy = UpdatePolicy::default();
        assert_eq!(
            policy.due_at(false, false, Instant::now()),
            Some(UpdateReason::Heartbeat)
        );
    }

    #[test]
    fn test_no_update_before_heartbeat_period() {
        let t0 = Instant::now();
        let policy = policy_updated_at(t0);
        for secs in [0, 1, 5, 9] {
            assert_eq!(
                policy.due_at(false, false, t0 + Duration::from_secs(secs)),
                None,
                "nothing should fire {secs}s after the last update"
            );
        }
        assert_eq!(
            policy.due_at(false, false, t0 + Duration::from_millis(9_999)),
            None
        );
    }

    #[test]
    fn test_heartbeat_fires_at_exactly_ten_seconds() {
        let t0 = Instant::now();
        let policy = policy_updated_at(t0);
        assert_eq!(
            policy.due_at(false, false, t0 + Duration::from_secs(10)),
            Some(UpdateReason::Heartbeat)
        );
        assert_eq!(
            policy.due_at(false, false, t0 + Duration::from_secs(42)),
            Some(UpdateReason::Heartbeat)
        );
    }

    #[test]
    fn test_recording_an_update_restarts_heartbeat() {
        let t0 = Instant::now();
        let mut policy = policy_updated_at(t0);
        let t1 = t0 + Duration::from_secs(4);
        policy.record_update(t1);
        assert_eq!(policy.due_at(false, false, t0 + Duration::from_secs(10)), None);
        assert_eq!(
            policy.due_at(false, false, t1 + Duration::from_secs(10)),
            Some(UpdateReason::Heartbeat)
        );
    }

    // --- Priority -----------------------------------------------------------

    #[test]
    fn test_forecast_refresh_wins_over_everything() {
        let t0 = Instant::now();
        let policy = policy_updated_at(t0);
        assert_eq!(
            policy.due_at(true, true, t0 + Duration::from_secs(30)),
            Some(UpdateReason::ForecastRefresh)
        );
    }

    #[test]
    fn test_sensor_change_wins_over_heartbeat() {
        let t0 = Instant::now();
        let policy = policy_updated_at(t0);
        assert_eq!(
            policy.due_at(false, true, t0 + Duration::from_secs(30)),
            Some(UpdateReason::SensorChange)
        );
    }

    #[test]
    fn test_event_triggers_fire_inside_heartbeat_window() {
        let t0 = Instant::now();
        let policy = policy_updated_at(t0);
        let soon = t0 + Duration::from_secs(1);
        assert_eq!(policy.due_at(true, false, soon), Some(UpdateReason::ForecastRefresh));
        assert_eq!(policy.due_at(false, true, soon), Some(UpdateReason::SensorChange));
    }

    // --- Publication tracker ------------------------------------------------

    #[test]
    fn test_publication_key_is_new_once() {
        let mut tracker = PublicationTracker::default();
        let key = PublicationKey::new("20240501", "1230");
        assert!(tracker.is_new(&key));
        tracker.mark_logged(key.clone());
        assert!(!tracker.is_new(&key));
        assert!(tracker.is_new(&PublicationKey::new("20240501", "1300")));
    }

    #[test]
    fn test_tracker_resumes_from_logged_key() {
        let key = PublicationKey::new("20240501", "1230");
        let tracker = PublicationTracker::resume_from(Some(key.clone()));
        assert!(!tracker.is_new(&key));
        assert!(tracker.is_new(&PublicationKey::new("20240501", "1300")));
    }
}
