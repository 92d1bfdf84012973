//! Core types for the live channel.
//!
//! This module provides the data structures that travel over the wire and the
//! lifecycle types the channel publishes:
//! - [`Frame`] is the tagged union of everything the backend streams
//! - [`StateFrame`] is a full authoritative snapshot, [`TrainRecord`] one train in it
//! - [`ConnectionState`] and [`ChannelStatus`] describe the channel lifecycle
//! - [`parse_timestamp`] reads the backend's ISO-8601 timestamps
//!
//! Timestamps stay as received and are parsed on use, so a snapshot with an
//! unreadable `sim_time` is still a valid snapshot.
//!
//! ```rust
//! use railsync::types::{Frame, FrameKind};
//!
//! let frame = Frame::parse(r#"{"type":"heartbeat","ts":"2025-09-11T12:34:56.123456"}"#).unwrap();
//! assert_eq!(frame.kind(), FrameKind::Heartbeat);
//! assert!(Frame::parse(r#"{"type":"explosion"}"#).is_err());
//! ```

mod connection_state;
mod frame;
mod timestamp;

pub use connection_state::{ChannelStatus, ConnectionState};
pub use frame::{
    BlockIssue, BlockState, EventFrame, EventKind, Frame, FrameKind, HeartbeatFrame, IssueType,
    Kpis, SimulationStatus, StateFrame, TrainPriority, TrainRecord,
};
pub use timestamp::{format_timestamp, parse_timestamp};
