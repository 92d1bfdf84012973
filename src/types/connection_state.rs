//! Connection lifecycle types

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the live channel.
///
/// Only the channel's own driver moves between states; nothing outside the
/// channel can set one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(rename_all = "UPPERCASE")]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Upper-case label used in logs and status displays
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Open => "OPEN",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::Closed => "CLOSED",
        }
    }

    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable status of the live channel.
///
/// This is the only error state exposed to presentation: frame-level problems
/// never show up here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    /// Current lifecycle state
    pub state: ConnectionState,
    /// Most recent transport error since the last successful open
    pub last_error: Option<Arc<str>>,
    /// Consecutive failed attempts since the last successful open
    pub attempt: u32,
}

impl ChannelStatus {
    pub(crate) fn new(state: ConnectionState) -> Self {
        Self { state, last_error: None, attempt: 0 }
    }
}

impl Default for ChannelStatus {
    fn default() -> Self {
        Self::new(ConnectionState::Closed)
    }
}
