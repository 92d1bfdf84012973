//! REST actions against the simulation backend

use std::time::Duration;

use reqwest::{RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::discovery::endpoint_url;
use crate::types::{EventFrame, StateFrame};
use crate::{Result, SyncError};

/// Request timeout used when none is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepted range for injected delays, in minutes
pub const DELAY_MINUTES: std::ops::RangeInclusive<u32> = 1..=60;

/// Simulation parameter update. Unset fields are left unchanged by the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct ControlPayload {
    /// Minimum seconds between trains on a block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headway_sec: Option<u32>,
    /// Station dwell time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dwell_sec: Option<u32>,
    /// Weight for energy-aware scheduling, non-negative
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy_stop_penalty: Option<f64>,
    /// Simulation clock multiplier, strictly positive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation_speed: Option<f64>,
}

impl ControlPayload {
    pub fn validate(&self) -> Result<()> {
        if let Some(penalty) = self.energy_stop_penalty.filter(|p| !(p.is_finite() && *p >= 0.0)) {
            return Err(SyncError::InvalidRequest {
                details: format!("energy_stop_penalty must be >= 0, got {penalty}"),
            });
        }
        if let Some(speed) = self.simulation_speed.filter(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(SyncError::InvalidRequest {
                details: format!("simulation_speed must be > 0, got {speed}"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct DelayInjection<'a> {
    train_id: &'a str,
    delay_minutes: u32,
}

#[derive(Debug, Serialize)]
struct BlockIssueInjection<'a> {
    block_id: &'a str,
    blocked: bool,
}

/// Acknowledgement returned by action endpoints
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ActionResponse {
    pub status: String,
    pub message: Option<String>,
    /// Event recorded by the action, for injections
    pub event: Option<EventFrame>,
}

/// HTTP client for the backend's REST surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = base.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::http(base.clone(), e))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Current authoritative snapshot.
    pub async fn state(&self) -> Result<StateFrame> {
        let url = endpoint_url(&self.base, "/state")?;
        let body = self.execute(self.client.get(url.clone()), &url).await?;
        serde_json::from_str(&body).map_err(|e| SyncError::parse(format!("state from {url}"), e))
    }

    pub async fn start(&self) -> Result<ActionResponse> {
        info!("Starting simulation");
        self.post_empty("/start").await
    }

    pub async fn reset(&self) -> Result<ActionResponse> {
        info!("Resetting simulation");
        self.post_empty("/reset").await
    }

    pub async fn update_control(&self, control: &ControlPayload) -> Result<ActionResponse> {
        control.validate()?;
        self.post_json("/control", control).await
    }

    /// Delay a train by `delay_minutes` (1 to 60).
    pub async fn inject_delay(&self, train_id: &str, delay_minutes: u32) -> Result<ActionResponse> {
        if !DELAY_MINUTES.contains(&delay_minutes) {
            return Err(SyncError::InvalidRequest {
                details: format!("delay_minutes must be within 1..=60, got {delay_minutes}"),
            });
        }
        self.post_json("/inject/delay", &DelayInjection { train_id, delay_minutes }).await
    }

    /// Mark a block as blocked, or clear its issue.
    pub async fn set_block_issue(&self, block_id: &str, blocked: bool) -> Result<ActionResponse> {
        self.post_json("/inject/block-issue", &BlockIssueInjection { block_id, blocked }).await
    }

    async fn post_empty(&self, path: &str) -> Result<ActionResponse> {
        let url = endpoint_url(&self.base, path)?;
        let body = self.execute(self.client.post(url.clone()), &url).await?;
        parse_action(&body, &url)
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ActionResponse> {
        let url = endpoint_url(&self.base, path)?;
        let body = self.execute(self.client.post(url.clone()).json(body), &url).await?;
        parse_action(&body, &url)
    }

    async fn execute(&self, request: RequestBuilder, url: &Url) -> Result<String> {
        debug!("Requesting {}", url);
        let response = request.send().await.map_err(|e| SyncError::http(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status { url: url.to_string(), status: status.as_u16() });
        }

        response.text().await.map_err(|e| SyncError::http(url.as_str(), e))
    }
}

/// Action bodies are informational; an empty body is a bare acknowledgement.
fn parse_action(body: &str, url: &Url) -> Result<ActionResponse> {
    if body.trim().is_empty() {
        return Ok(ActionResponse::default());
    }
    serde_json::from_str(body).map_err(|e| SyncError::parse(format!("response from {url}"), e))
}
