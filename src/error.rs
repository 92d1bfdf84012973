//! Error types for the synchronization client.
//!
//! All errors implement the `std::error::Error` trait and carry enough
//! structured context to decide whether an operation is worth retrying.
//!
//! ## Error Categories
//!
//! - **Transport Errors**: WebSocket connect/read/write failures
//! - **Probe Errors**: Health probe failures during endpoint discovery
//! - **Parse Errors**: Malformed frames, REST bodies or configuration
//! - **Clock Errors**: Unparseable simulation timestamps
//! - **Send Rejections**: Outbound messages attempted while not connected
//! - **HTTP Errors**: REST action failures and non-success statuses
//!
//! Most of these never reach presentation: discovery failures fall back to a
//! default address, transport failures become status changes, and malformed
//! frames are dropped at the frame boundary. Send rejections and REST failures
//! are returned to the caller, which decides whether to retry.
//!
//! ```rust
//! use railsync::{ConnectionState, SyncError};
//!
//! let error = SyncError::SendRejected { state: ConnectionState::Connecting };
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::ConnectionState;

/// Result type alias for synchronization operations.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Main error type for synchronization operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error("Transport failure: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Health probe of {base} failed: {reason}")]
    Probe { base: String, reason: String },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Invalid timestamp '{value}': {details}")]
    ClockParse { value: String, details: String },

    #[error("Send rejected while connection is {state}")]
    SendRejected { state: ConnectionState },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Invalid endpoint address '{address}': {details}")]
    InvalidAddress { address: String, details: String },

    #[error("Invalid request: {details}")]
    InvalidRequest { details: String },

    #[error("HTTP request to {url} failed")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Configuration file error: {path}")]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration value for {field}: {details}")]
    InvalidConfig { field: &'static str, details: String },
}

impl SyncError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { .. } => true,
            SyncError::Probe { .. } => true,
            SyncError::SendRejected { .. } => true,
            SyncError::Timeout { .. } => true,
            SyncError::Http { .. } => true,
            SyncError::Status { status, .. } => *status >= 500,
            SyncError::Parse { .. } => false,
            SyncError::ClockParse { .. } => false,
            SyncError::InvalidAddress { .. } => false,
            SyncError::InvalidRequest { .. } => false,
            SyncError::Config { .. } => false,
            SyncError::InvalidConfig { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            SyncError::Transport { .. } => vec![
                "Wait for the channel to reconnect",
                "Check that the backend is running",
                "Verify the WebSocket endpoint is reachable",
            ],
            SyncError::Probe { .. } => vec![
                "Check that the backend exposes GET /health",
                "Verify the candidate address and port",
            ],
            SyncError::Parse { .. } => vec![
                "Check frame format compatibility with the backend",
                "Verify the payload is valid JSON",
            ],
            SyncError::ClockParse { .. } => vec![
                "Check the backend emits ISO-8601 timestamps",
                "The previous clock offset remains in use",
            ],
            SyncError::SendRejected { .. } => vec![
                "Wait until the connection is open",
                "Observe the status stream before sending",
            ],
            SyncError::Timeout { .. } => vec![
                "Increase the timeout duration",
                "Check network latency to the backend",
            ],
            SyncError::InvalidAddress { .. } => vec![
                "Use an http:// or https:// base address",
                "Check the configured API base for typos",
            ],
            SyncError::InvalidRequest { .. } => vec![
                "Check request parameters against their documented ranges",
            ],
            SyncError::Http { .. } => vec![
                "Check that the backend is running",
                "Retry the action once the connection recovers",
            ],
            SyncError::Status { .. } => vec![
                "Inspect the backend logs for the rejected action",
                "Verify the request identifiers exist",
            ],
            SyncError::Config { .. } => vec![
                "Check the configuration file exists and is readable",
                "Verify the YAML structure",
            ],
            SyncError::InvalidConfig { .. } => vec![
                "Check the named field against its documented range",
                "Remove the field to fall back to its default",
            ],
        }
    }

    /// Helper constructor for transport errors.
    pub fn transport(reason: impl Into<String>) -> Self {
        SyncError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        SyncError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl ToString) -> Self {
        SyncError::Parse { context: context.into(), details: details.to_string() }
    }

    /// Helper constructor for invalid address errors.
    pub fn invalid_address(address: impl Into<String>, details: impl ToString) -> Self {
        SyncError::InvalidAddress { address: address.into(), details: details.to_string() }
    }

    /// Helper constructor for configuration range errors.
    pub fn invalid_config(field: &'static str, details: impl ToString) -> Self {
        SyncError::InvalidConfig { field, details: details.to_string() }
    }

    /// Helper constructor for HTTP errors.
    pub fn http(url: impl Into<String>, source: reqwest::Error) -> Self {
        SyncError::Http { url: url.into(), source }
    }
}
