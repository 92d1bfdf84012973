//! Wire frames streamed by the simulation backend

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::timestamp::parse_timestamp;
use crate::{Result, SyncError};

/// A frame received over the live channel.
///
/// Frames are discriminated by their `type` field. Anything that does not
/// deserialize into one of these variants is invalid and never reaches
/// consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Full authoritative snapshot
    State(Arc<StateFrame>),
    /// Discrete simulation event
    Event(EventFrame),
    /// Liveness signal
    Heartbeat(HeartbeatFrame),
}

impl Frame {
    /// Parse a raw text message into a frame.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| SyncError::parse("frame", e))
    }

    /// Declared kind of this frame
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::State(_) => FrameKind::State,
            Frame::Event(_) => FrameKind::Event,
            Frame::Heartbeat(_) => FrameKind::Heartbeat,
        }
    }

    /// The state snapshot, if this is a state frame
    pub fn as_state(&self) -> Option<&Arc<StateFrame>> {
        match self {
            Frame::State(state) => Some(state),
            _ => None,
        }
    }
}

/// Frame discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    State,
    Event,
    Heartbeat,
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            FrameKind::State => "state",
            FrameKind::Event => "event",
            FrameKind::Heartbeat => "heartbeat",
        })
    }
}

/// Authoritative snapshot of the whole simulation.
///
/// Each snapshot replaces the previous one entirely; fields are never merged
/// across frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct StateFrame {
    /// Simulation clock at the time of the snapshot (ISO-8601)
    pub sim_time: String,
    /// Block occupancy and issues
    pub blocks: Vec<BlockState>,
    /// Trains on the line
    pub trains: Vec<TrainRecord>,
    /// Aggregate indicators
    pub kpis: Kpis,
    /// Simulation lifecycle, when the backend reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SimulationStatus>,
}

impl StateFrame {
    /// Parse the snapshot's simulation time.
    pub fn sim_time(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.sim_time)
    }

    /// Look up a train by id
    pub fn train(&self, id: &str) -> Option<&TrainRecord> {
        self.trains.iter().find(|train| train.id == id)
    }

    /// Look up a block by id
    pub fn block(&self, id: &str) -> Option<&BlockState> {
        self.blocks.iter().find(|block| block.id == id)
    }
}

/// Occupancy and issue status of one block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct BlockState {
    pub id: String,
    #[serde(default)]
    pub occupied_by: Option<String>,
    #[serde(default)]
    pub issue: Option<BlockIssue>,
}

/// Issue attached to a block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct BlockIssue {
    #[serde(rename = "type")]
    pub kind: IssueType,
    /// When the issue started (ISO-8601)
    pub since: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    Blocked,
    SignalFailure,
    Maintenance,
}

/// One train in a snapshot. Read-only once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct TrainRecord {
    pub id: String,
    pub name: String,
    pub priority: TrainPriority,
    /// Block the train currently occupies
    pub at_block: String,
    #[serde(default)]
    pub next_block: Option<String>,
    /// Expected departure from the current block (ISO-8601)
    #[serde(default)]
    pub eta_next: Option<String>,
    /// When the train entered its current block (ISO-8601)
    #[serde(default)]
    pub entered_block_at: Option<String>,
    /// When the train is expected to leave its current block (ISO-8601)
    #[serde(default)]
    pub will_exit_at: Option<String>,
    pub delay_min: f64,
    pub dwell_sec_remaining: f64,
    pub speed_kmh: f64,
}

impl TrainRecord {
    /// Whether the train is standing at a platform
    pub fn is_dwelling(&self) -> bool {
        self.dwell_sec_remaining > 0.0
    }

    /// Parsed entry timestamp; `None` when absent or unparseable.
    pub fn entered_block_at(&self) -> Option<DateTime<Utc>> {
        self.entered_block_at.as_deref().and_then(|value| parse_timestamp(value).ok())
    }

    /// Parsed exit timestamp; `None` when absent or unparseable.
    pub fn will_exit_at(&self) -> Option<DateTime<Utc>> {
        self.will_exit_at.as_deref().and_then(|value| parse_timestamp(value).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "UPPERCASE")]
pub enum TrainPriority {
    Express,
    Regional,
    Freight,
}

/// Aggregate indicators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct Kpis {
    pub avg_delay_min: f64,
    pub trains_on_line: u32,
    #[serde(default)]
    pub conflicts_resolved: u32,
    #[serde(default)]
    pub energy_efficiency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "UPPERCASE")]
pub enum SimulationStatus {
    Idle,
    Running,
    Completed,
}

/// Discrete event emitted by the simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct EventFrame {
    pub event_id: String,
    pub event_kind: EventKind,
    #[serde(default)]
    pub block_id: Option<String>,
    #[serde(default)]
    pub train_id: Option<String>,
    /// Simulation time of the event (ISO-8601)
    pub timestamp: String,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    BlockFailed,
    BlockCleared,
    DelayInjected,
    TrainArrived,
    TrainDeparted,
    SimulationCompleted,
}

/// Keepalive frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct HeartbeatFrame {
    /// Wall-clock time on the backend (ISO-8601)
    pub ts: String,
}

impl HeartbeatFrame {
    /// Parse the heartbeat timestamp.
    pub fn ts(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.ts)
    }
}
