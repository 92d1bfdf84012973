//! Per-frame motion interpolation
//!
//! Turns the latest snapshot into a position and heading per train. Each call
//! recomputes everything from the snapshot, the clock offset and the static
//! layout; nothing is carried over between render frames.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clock::ClockOffset;
use crate::config::InterpolationConfig;
use crate::geometry::{SegmentKind, TrackLayout};
use crate::types::{StateFrame, TrainRecord};

/// Cubic ease `u²(3 − 2u)` on the clamped input.
pub fn smoothstep(u: f64) -> f64 {
    let u = if u.is_nan() { 0.0 } else { u.clamp(0.0, 1.0) };
    u * u * (3.0 - 2.0 * u)
}

/// Where one train is drawn this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPosition<'a> {
    pub train: &'a TrainRecord,
    pub x: f64,
    pub y: f64,
    /// Radians from +x toward +y
    pub heading: f64,
    /// Linear progress through the block, in `[0, 1]`
    pub progress: f64,
    /// Fraction actually sampled along the segment
    pub eased: f64,
    pub segment: SegmentKind,
}

/// Computes render positions from snapshots and geometry.
#[derive(Debug, Clone)]
pub struct MotionInterpolator {
    layout: Arc<TrackLayout>,
    config: InterpolationConfig,
}

impl MotionInterpolator {
    pub fn new(layout: Arc<TrackLayout>, config: InterpolationConfig) -> Self {
        Self { layout, config }
    }

    pub fn layout(&self) -> &TrackLayout {
        &self.layout
    }

    /// Linear progress of `train` through its block at `sim_now`.
    ///
    /// `anchor` is the snapshot's simulation time; missing timing hints are
    /// replaced by a window of `fallback_window_ms` centered on it.
    pub fn progress(&self, train: &TrainRecord, sim_now: DateTime<Utc>, anchor: DateTime<Utc>) -> f64 {
        if train.is_dwelling() {
            return self.config.dwell_progress.clamp(0.0, 1.0);
        }

        let half = i64::try_from(self.config.fallback_window_ms / 2)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .unwrap_or(TimeDelta::MAX);
        // Saturate at the representable range instead of overflowing
        let entered = train
            .entered_block_at()
            .unwrap_or_else(|| anchor.checked_sub_signed(half).unwrap_or(DateTime::<Utc>::MIN_UTC));
        let exits = train
            .will_exit_at()
            .unwrap_or_else(|| anchor.checked_add_signed(half).unwrap_or(DateTime::<Utc>::MAX_UTC));

        let span = exits - entered;
        if span <= TimeDelta::zero() {
            return if sim_now < entered { 0.0 } else { 1.0 };
        }

        (seconds(sim_now - entered) / seconds(span)).clamp(0.0, 1.0)
    }

    /// Position of one train, or `None` if its block has no geometry.
    pub fn position<'a>(
        &self,
        train: &'a TrainRecord,
        sim_now: DateTime<Utc>,
        anchor: DateTime<Utc>,
    ) -> Option<RenderPosition<'a>> {
        let segment = self.layout.get(&train.at_block)?;

        let progress = self.progress(train, sim_now, anchor);
        // Dwelling trains sit at the pinned fraction, not an eased one
        let eased = if train.is_dwelling() { progress } else { smoothstep(progress) };
        let sample = segment.sample(eased);

        Some(RenderPosition {
            train,
            x: sample.point.x,
            y: sample.point.y,
            heading: sample.heading,
            progress,
            eased,
            segment: segment.kind(),
        })
    }

    /// Positions for every drawable train in `state` at local time `local_now`.
    pub fn frame<'a>(
        &self,
        state: &'a StateFrame,
        offset: ClockOffset,
        local_now: DateTime<Utc>,
    ) -> Vec<RenderPosition<'a>> {
        let sim_now = offset.simulation_now(local_now);
        let anchor = state.sim_time().unwrap_or(sim_now);

        state.trains.iter().filter_map(|train| self.position(train, sim_now, anchor)).collect()
    }
}

fn seconds(delta: TimeDelta) -> f64 {
    match delta.num_microseconds() {
        Some(micros) => micros as f64 / 1e6,
        None => delta.num_milliseconds() as f64 / 1e3,
    }
}
