//! Render-tick scheduling
//!
//! A [`RenderLoop`] invokes a callback once per display tick until stopped.
//! The callback reads already-ingested values only; it must not block.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One display tick.
#[derive(Debug, Clone, Copy)]
pub struct RenderTick {
    /// Zero-based tick counter
    pub frame_index: u64,
    /// Monotonic tick instant
    pub at: Instant,
    /// Wall-clock time of the tick, for clock-offset mapping
    pub wall: DateTime<Utc>,
}

/// Source of display ticks.
#[async_trait::async_trait]
pub trait TickSource: Send + 'static {
    /// Wait for the next tick. `None` ends the loop.
    async fn next_tick(&mut self) -> Option<Instant>;
}

/// Fixed-rate ticks from a tokio interval; late ticks are skipped, not bunched.
pub struct IntervalTicks {
    interval: Interval,
}

impl IntervalTicks {
    pub fn new(hz: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / f64::from(hz.max(1)));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait::async_trait]
impl TickSource for IntervalTicks {
    async fn next_tick(&mut self) -> Option<Instant> {
        Some(self.interval.tick().await)
    }
}

/// Running render loop. Dropping it stops the loop.
pub struct RenderLoop {
    cancel: CancellationToken,
    handle: Option<JoinHandle<u64>>,
}

impl RenderLoop {
    /// Start invoking `render` on every tick from `source`.
    pub fn spawn<S, F>(source: S, render: F) -> Self
    where
        S: TickSource,
        F: FnMut(RenderTick) + Send + 'static,
    {
        Self::spawn_with_token(source, CancellationToken::new(), render)
    }

    /// Like [`spawn`](Self::spawn), but the loop also ends when `cancel` fires.
    pub fn spawn_with_token<S, F>(mut source: S, cancel: CancellationToken, mut render: F) -> Self
    where
        S: TickSource,
        F: FnMut(RenderTick) + Send + 'static,
    {
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut frame_index = 0u64;
            loop {
                let at = tokio::select! {
                    _ = token.cancelled() => break,
                    tick = source.next_tick() => match tick {
                        Some(at) => at,
                        None => break,
                    },
                };

                render(RenderTick { frame_index, at, wall: Utc::now() });
                frame_index += 1;
            }
            debug!("Render loop stopped after {} frames", frame_index);
            frame_index
        });

        Self { cancel, handle: Some(handle) }
    }

    /// Stop scheduling frames. Safe to call more than once.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the loop to end and return how many frames it rendered.
    pub async fn join(mut self) -> u64 {
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        match handle.await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Render loop task failed: {}", e);
                0
            }
        }
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
