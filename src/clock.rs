//! Simulation clock alignment
//!
//! The backend runs a simulated clock that drifts from the local wall clock
//! by an arbitrary amount. Every state snapshot carries `sim_time`; the offset
//! `local_now - sim_time` measured on arrival maps local time back onto the
//! simulation timeline until the next snapshot replaces it.

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::Result;
use crate::types::StateFrame;

/// Difference between local wall-clock time and simulation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockOffset(TimeDelta);

impl ClockOffset {
    /// Offset that maps `local_now` onto `sim_time`.
    pub fn between(local_now: DateTime<Utc>, sim_time: DateTime<Utc>) -> Self {
        Self(local_now - sim_time)
    }

    /// Simulation time corresponding to a local instant.
    pub fn simulation_now(&self, local_now: DateTime<Utc>) -> DateTime<Utc> {
        local_now - self.0
    }

    pub fn as_delta(&self) -> TimeDelta {
        self.0
    }
}

/// Holds the current clock offset and refreshes it from snapshots.
pub struct ClockSynchronizer {
    offset: watch::Sender<ClockOffset>,
}

impl Default for ClockSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSynchronizer {
    pub fn new() -> Self {
        let (offset, _) = watch::channel(ClockOffset::default());
        Self { offset }
    }

    /// Recompute the offset from a snapshot received at `local_now`.
    ///
    /// An unreadable `sim_time` leaves the previous offset in place.
    pub fn resync(&self, state: &StateFrame, local_now: DateTime<Utc>) -> Result<ClockOffset> {
        let sim_time = state.sim_time().inspect_err(|e| {
            warn!("Keeping previous clock offset: {}", e);
        })?;

        let offset = ClockOffset::between(local_now, sim_time);
        debug!(offset_ms = offset.as_delta().num_milliseconds(), "Clock resynchronized");
        self.offset.send_replace(offset);
        Ok(offset)
    }

    pub fn offset(&self) -> ClockOffset {
        *self.offset.borrow()
    }

    /// Watch receiver for offset changes
    pub fn watch(&self) -> watch::Receiver<ClockOffset> {
        self.offset.subscribe()
    }

    /// Current simulation time estimate.
    pub fn simulation_now(&self) -> DateTime<Utc> {
        self.offset().simulation_now(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::state_json;
    use crate::types::Frame;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn state(sim_time: &str) -> std::sync::Arc<StateFrame> {
        match Frame::parse(&state_json(sim_time, vec![])).unwrap() {
            Frame::State(state) => state,
            _ => unreachable!(),
        }
    }

    #[test]
    fn offset_maps_local_time_onto_simulation_time() {
        let sync = ClockSynchronizer::new();
        let local = Utc.with_ymd_and_hms(2025, 9, 11, 12, 0, 30).unwrap();

        let offset = sync.resync(&state("2025-09-11T12:00:00Z"), local).unwrap();
        assert_eq!(offset.as_delta(), TimeDelta::seconds(30));

        let later = local + TimeDelta::milliseconds(1500);
        assert_eq!(
            offset.simulation_now(later),
            Utc.with_ymd_and_hms(2025, 9, 11, 12, 0, 1).unwrap() + TimeDelta::milliseconds(500)
        );
    }

    #[test]
    fn simulation_ahead_of_local_gives_negative_offset() {
        let local = Utc.with_ymd_and_hms(2025, 9, 11, 12, 0, 0).unwrap();
        let sim = local + TimeDelta::hours(3);
        let offset = ClockOffset::between(local, sim);

        assert!(offset.as_delta() < TimeDelta::zero());
        assert_eq!(offset.simulation_now(local), sim);
    }

    #[test]
    fn each_snapshot_replaces_the_offset() {
        let sync = ClockSynchronizer::new();
        let local = Utc.with_ymd_and_hms(2025, 9, 11, 12, 0, 10).unwrap();

        sync.resync(&state("2025-09-11T12:00:00Z"), local).unwrap();
        sync.resync(&state("2025-09-11T12:00:08Z"), local).unwrap();

        assert_eq!(sync.offset().as_delta(), TimeDelta::seconds(2));
    }

    #[test]
    fn unreadable_sim_time_keeps_previous_offset() {
        let sync = ClockSynchronizer::new();
        let local = Utc.with_ymd_and_hms(2025, 9, 11, 12, 0, 10).unwrap();
        sync.resync(&state("2025-09-11T12:00:00Z"), local).unwrap();
        let mut watcher = sync.watch();
        watcher.mark_unchanged();

        assert!(sync.resync(&state("soon"), local).is_err());
        assert_eq!(sync.offset().as_delta(), TimeDelta::seconds(10));
        assert!(!watcher.has_changed().unwrap());
    }

    #[test]
    fn naive_sim_time_counts_as_utc() {
        let sync = ClockSynchronizer::new();
        let local = Utc.with_ymd_and_hms(2025, 9, 11, 12, 0, 0).unwrap();
        let offset = sync.resync(&state("2025-09-11T11:59:59.500000"), local).unwrap();
        assert_eq!(offset.as_delta(), TimeDelta::milliseconds(500));
    }

    proptest! {
        #[test]
        fn prop_offset_recovers_sim_time(local_ms in 0i64..4_000_000_000_000, skew_ms in -86_400_000i64..86_400_000) {
            let local = Utc.timestamp_millis_opt(local_ms).unwrap();
            let sim = local + TimeDelta::milliseconds(skew_ms);
            prop_assert_eq!(ClockOffset::between(local, sim).simulation_now(local), sim);
        }
    }
}
