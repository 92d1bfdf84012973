//! Frame ingestion
//!
//! Raw channel messages are parsed into [`Frame`]s and published into two
//! watch cells: the most recent frame of any kind, and the most recent state
//! snapshot. Readers never block the ingestor and always see a complete value.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, trace};

use crate::types::{Frame, StateFrame};

/// Parses messages and holds the latest frame and snapshot.
pub struct FrameIngestor {
    latest_frame: watch::Sender<Option<Arc<Frame>>>,
    latest_state: watch::Sender<Option<Arc<StateFrame>>>,
    dropped: AtomicU64,
}

impl Default for FrameIngestor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameIngestor {
    pub fn new() -> Self {
        let (latest_frame, _) = watch::channel(None);
        let (latest_state, _) = watch::channel(None);
        Self { latest_frame, latest_state, dropped: AtomicU64::new(0) }
    }

    /// Parse one raw message.
    ///
    /// Invalid messages are logged and dropped; previously stored values stay
    /// untouched. Only state frames replace the latest snapshot.
    pub fn ingest(&self, raw: &str) -> Option<Arc<Frame>> {
        let frame = match Frame::parse(raw) {
            Ok(frame) => Arc::new(frame),
            Err(e) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("Dropping invalid message ({} so far): {}", dropped, e);
                return None;
            }
        };

        trace!(kind = %frame.kind(), "Frame ingested");
        if let Some(state) = frame.as_state() {
            self.latest_state.send_replace(Some(Arc::clone(state)));
        }
        self.latest_frame.send_replace(Some(Arc::clone(&frame)));
        Some(frame)
    }

    /// Store a snapshot obtained outside the live channel.
    pub fn ingest_state(&self, state: StateFrame) -> Arc<StateFrame> {
        let state = Arc::new(state);
        self.latest_state.send_replace(Some(Arc::clone(&state)));
        self.latest_frame.send_replace(Some(Arc::new(Frame::State(Arc::clone(&state)))));
        state
    }

    /// Store a snapshot obtained outside the live channel unless the held
    /// one is already further along in simulation time.
    ///
    /// Returns whether `state` was stored.
    pub fn ingest_state_if_newer(&self, state: Arc<StateFrame>) -> bool {
        let stored = self.latest_state.send_if_modified(|current| {
            if current.as_ref().is_some_and(|held| is_older(&state, held)) {
                return false;
            }
            *current = Some(Arc::clone(&state));
            true
        });

        if stored {
            self.latest_frame.send_replace(Some(Arc::new(Frame::State(state))));
        } else {
            debug!("Ignoring snapshot at {} older than the held one", state.sim_time);
        }
        stored
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.latest_frame.borrow().clone()
    }

    pub fn latest_state(&self) -> Option<Arc<StateFrame>> {
        self.latest_state.borrow().clone()
    }

    /// Number of messages rejected as invalid
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Read-only handle for consumers on other tasks.
    pub fn reader(&self) -> FrameReader {
        FrameReader { frames: self.latest_frame.subscribe(), states: self.latest_state.subscribe() }
    }
}

/// Unparseable times never count as older.
fn is_older(candidate: &StateFrame, held: &StateFrame) -> bool {
    matches!((candidate.sim_time(), held.sim_time()), (Ok(candidate), Ok(held)) if candidate < held)
}

/// Read side of a [`FrameIngestor`]
#[derive(Clone)]
pub struct FrameReader {
    frames: watch::Receiver<Option<Arc<Frame>>>,
    states: watch::Receiver<Option<Arc<StateFrame>>>,
}

impl FrameReader {
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.frames.borrow().clone()
    }

    pub fn latest_state(&self) -> Option<Arc<StateFrame>> {
        self.states.borrow().clone()
    }

    /// Snapshots as they are replaced, starting with the current one if any.
    pub fn state_updates(&self) -> impl Stream<Item = Arc<StateFrame>> + use<> {
        WatchStream::new(self.states.clone()).filter_map(|state| async move { state })
    }

    /// Frames of every kind, starting with the current one if any.
    ///
    /// Frames arriving faster than the consumer polls are coalesced.
    pub fn frame_updates(&self) -> impl Stream<Item = Arc<Frame>> + use<> {
        WatchStream::new(self.frames.clone()).filter_map(|frame| async move { frame })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{EVENT_JSON, HEARTBEAT_JSON, state_json, train_json};
    use crate::types::FrameKind;

    fn snapshot(sim_time: &str) -> String {
        state_json(sim_time, vec![train_json("T1", "B2", None, None, 0.0)])
    }

    #[test]
    fn state_frames_replace_the_snapshot() {
        let ingestor = FrameIngestor::new();
        assert!(ingestor.latest_state().is_none());

        ingestor.ingest(&snapshot("2025-09-11T12:00:00Z")).unwrap();
        ingestor.ingest(&snapshot("2025-09-11T12:00:01Z")).unwrap();

        assert_eq!(ingestor.latest_state().unwrap().sim_time, "2025-09-11T12:00:01Z");
        assert_eq!(ingestor.latest_frame().unwrap().kind(), FrameKind::State);
    }

    #[test]
    fn events_and_heartbeats_leave_the_snapshot_alone() {
        let ingestor = FrameIngestor::new();
        ingestor.ingest(&snapshot("2025-09-11T12:00:00Z"));

        ingestor.ingest(EVENT_JSON).unwrap();
        assert_eq!(ingestor.latest_frame().unwrap().kind(), FrameKind::Event);

        ingestor.ingest(HEARTBEAT_JSON).unwrap();
        assert_eq!(ingestor.latest_frame().unwrap().kind(), FrameKind::Heartbeat);
        assert_eq!(ingestor.latest_state().unwrap().sim_time, "2025-09-11T12:00:00Z");
    }

    #[test]
    fn invalid_messages_change_nothing() {
        let ingestor = FrameIngestor::new();
        ingestor.ingest(&snapshot("2025-09-11T12:00:00Z"));
        let before = ingestor.latest_frame().unwrap();

        assert!(ingestor.ingest(r#"{"type":"explosion"}"#).is_none());
        assert!(ingestor.ingest("{truncated").is_none());

        assert!(Arc::ptr_eq(&before, &ingestor.latest_frame().unwrap()));
        assert_eq!(ingestor.dropped(), 2);
    }

    #[test]
    fn late_out_of_band_snapshot_does_not_regress() {
        let ingestor = FrameIngestor::new();
        ingestor.ingest(&snapshot("2025-09-11T12:05:00Z"));

        let stale = Frame::parse(&snapshot("2025-09-11T12:00:00Z")).unwrap();
        let stale = stale.as_state().cloned().unwrap();
        assert!(!ingestor.ingest_state_if_newer(stale));
        assert_eq!(ingestor.latest_state().unwrap().sim_time, "2025-09-11T12:05:00Z");

        let fresh = Frame::parse(&snapshot("2025-09-11T12:06:00Z")).unwrap();
        assert!(ingestor.ingest_state_if_newer(fresh.as_state().cloned().unwrap()));
        assert_eq!(ingestor.latest_state().unwrap().sim_time, "2025-09-11T12:06:00Z");
        assert_eq!(ingestor.latest_frame().unwrap().kind(), FrameKind::State);
    }

    #[tokio::test]
    async fn reader_streams_snapshot_replacements() {
        let ingestor = FrameIngestor::new();
        let reader = ingestor.reader();
        let mut updates = Box::pin(reader.state_updates());

        ingestor.ingest(&snapshot("2025-09-11T12:00:00Z"));
        assert_eq!(updates.next().await.unwrap().sim_time, "2025-09-11T12:00:00Z");

        ingestor.ingest(HEARTBEAT_JSON);
        ingestor.ingest(&snapshot("2025-09-11T12:00:02Z"));
        assert_eq!(updates.next().await.unwrap().sim_time, "2025-09-11T12:00:02Z");
        assert_eq!(reader.latest_state().unwrap().sim_time, "2025-09-11T12:00:02Z");
    }
}
