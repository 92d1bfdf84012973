//! Client configuration
//!
//! Configuration is plain serde data with defaults for every field, so a YAML
//! file only needs to mention what it changes:
//!
//! ```yaml
//! api_base: http://rail-ops.local:8000
//! reconnect:
//!   initial_delay_ms: 500
//!   max_retries: 10
//! ```
//!
//! The `RAILSYNC_API_BASE` environment variable overrides `api_base`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, SyncError};

/// Environment variable that overrides the configured API base.
pub const API_BASE_ENV: &str = "RAILSYNC_API_BASE";

/// Port the backend listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 8000;

/// Widest accepted synthetic block window (one day)
pub const MAX_FALLBACK_WINDOW_MS: u64 = 86_400_000;

/// Top-level client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Caller-supplied backend address, tried first during discovery
    pub api_base: Option<String>,
    pub discovery: DiscoveryConfig,
    pub reconnect: ReconnectPolicy,
    pub render: RenderConfig,
    pub interpolation: InterpolationConfig,
}

impl ClientConfig {
    /// Parse configuration from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml_ng::from_str(yaml).map_err(|e| SyncError::parse("client configuration", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|source| SyncError::Config { path: path.to_path_buf(), source })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_yaml_str(&yaml)
    }

    /// Check that every tunable is inside its usable range.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.discovery.probe_timeout_ms == 0 {
            return Err(SyncError::invalid_config("discovery.probe_timeout_ms", "must be positive"));
        }

        let reconnect = &self.reconnect;
        if !reconnect.multiplier.is_finite() || reconnect.multiplier < 1.0 {
            return Err(SyncError::invalid_config(
                "reconnect.multiplier",
                format!("{} is not a finite value >= 1", reconnect.multiplier),
            ));
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(SyncError::invalid_config("reconnect.max_delay_ms", "smaller than initial_delay_ms"));
        }
        if reconnect.connect_timeout_ms == 0 {
            return Err(SyncError::invalid_config("reconnect.connect_timeout_ms", "must be positive"));
        }

        if self.render.target_hz == 0 {
            return Err(SyncError::invalid_config("render.target_hz", "must be positive"));
        }

        let interpolation = &self.interpolation;
        if !(0.0..=1.0).contains(&interpolation.dwell_progress) {
            return Err(SyncError::invalid_config(
                "interpolation.dwell_progress",
                format!("{} is outside [0, 1]", interpolation.dwell_progress),
            ));
        }
        if interpolation.fallback_window_ms > MAX_FALLBACK_WINDOW_MS {
            return Err(SyncError::invalid_config(
                "interpolation.fallback_window_ms",
                format!("{} exceeds {}", interpolation.fallback_window_ms, MAX_FALLBACK_WINDOW_MS),
            ));
        }

        Ok(())
    }

    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base) = std::env::var(API_BASE_ENV) {
            let base = base.trim();
            if !base.is_empty() {
                debug!("API base overridden from {}: {}", API_BASE_ENV, base);
                self.api_base = Some(base.to_string());
            }
        }
        self
    }
}

/// Endpoint discovery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Host that served the view; probed before the loopback fallbacks
    pub same_host: Option<String>,
    pub port: u16,
    /// Per-candidate health probe timeout
    pub probe_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { same_host: None, port: DEFAULT_PORT, probe_timeout_ms: 1200 }
    }
}

impl DiscoveryConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Reconnection schedule for the live channel.
///
/// The delay before reconnection attempt `n` (1-based) is
/// `initial_delay * multiplier^(n-1)`, capped at `max_delay`. A multiplier of
/// 1.0 gives a fixed delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Consecutive failures tolerated before giving up; `None` retries forever
    pub max_retries: Option<u32>,
    /// Upper bound on one connect attempt, handshake included
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 10_000,
            multiplier: 2.0,
            max_retries: Some(20),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

impl ReconnectPolicy {
    /// Fixed delay between attempts.
    pub fn fixed(delay: Duration, max_retries: Option<u32>) -> Self {
        let millis = delay.as_millis() as u64;
        Self {
            initial_delay_ms: millis,
            max_delay_ms: millis,
            multiplier: 1.0,
            max_retries,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    /// Same schedule with a different per-attempt connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay before reconnection attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Whether another attempt is allowed after `failures` consecutive failures.
    pub fn allows(&self, failures: u32) -> bool {
        self.max_retries.is_none_or(|max| failures <= max)
    }
}

/// Render loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub target_hz: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { target_hz: 60 }
    }
}

/// Motion interpolation tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// Progress fraction at which dwelling trains are pinned
    pub dwell_progress: f64,
    /// Width of the synthetic window used when timing hints are missing
    pub fallback_window_ms: u64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self { dwell_progress: 0.05, fallback_window_ms: 4000 }
    }
}
