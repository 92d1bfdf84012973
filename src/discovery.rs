//! Backend endpoint discovery
//!
//! The resolver walks an ordered candidate list and settles on the first
//! address whose `GET /health` answers with a success status. Candidates are
//! probed one at a time, each under its own timeout, so resolution finishes
//! within the sum of the per-candidate timeouts. When nothing answers the
//! resolver returns a deterministic default instead of failing: discovery must
//! never hold up startup.

use std::time::Duration;

use reqwest::Url;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, DiscoveryConfig};
use crate::{Result, SyncError};

/// Health check for one candidate base address.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns `Ok(())` when `base` answers healthy.
    async fn probe(&self, base: &str) -> Result<()>;
}

/// Probes `GET {base}/health` over HTTP. Any 2xx status is healthy and the
/// body is ignored.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::http("health probe client", e))?;
        Ok(Self { client, timeout })
    }
}

#[async_trait::async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, base: &str) -> Result<()> {
        let url = endpoint_url(base, "/health")?;
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| SyncError::Probe { base: base.to_string(), reason: e.to_string() })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SyncError::Status { url: url.to_string(), status: status.as_u16() })
        }
    }
}

/// How the resolved address was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Candidate at this index answered healthy
    Healthy { index: usize },
    /// No candidate answered; the deterministic default was chosen
    Fallback,
}

/// Outcome of endpoint discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Base address, without trailing slash
    pub base: String,
    pub resolution: Resolution,
}

impl ResolvedEndpoint {
    /// Use `base` as-is without probing.
    pub fn fixed(base: impl Into<String>) -> Self {
        Self { base: normalize_base(&base.into()), resolution: Resolution::Healthy { index: 0 } }
    }

    /// WebSocket address of the live channel
    pub fn websocket_url(&self) -> Result<String> {
        websocket_url(&self.base)
    }

    pub fn is_fallback(&self) -> bool {
        self.resolution == Resolution::Fallback
    }
}

/// Sequential first-healthy-wins resolver
pub struct EndpointResolver<P> {
    probe: P,
    candidates: Vec<String>,
    fallback: String,
    timeout: Duration,
}

impl<P: HealthProbe> EndpointResolver<P> {
    /// Create a resolver over an explicit candidate list.
    pub fn new(
        probe: P,
        candidates: impl IntoIterator<Item = String>,
        fallback: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            probe,
            candidates: dedup_candidates(candidates),
            fallback: normalize_base(&fallback.into()),
            timeout,
        }
    }

    /// Create a resolver with the candidate list derived from configuration.
    pub fn from_config(probe: P, config: &ClientConfig) -> Self {
        Self::new(
            probe,
            candidate_addresses(config),
            default_address(&config.discovery),
            config.discovery.probe_timeout(),
        )
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Probe candidates in order and return the first healthy one.
    ///
    /// Never fails: when every candidate is unhealthy the fallback address is
    /// returned.
    pub async fn resolve(&self) -> ResolvedEndpoint {
        for (index, base) in self.candidates.iter().enumerate() {
            match tokio::time::timeout(self.timeout, self.probe.probe(base)).await {
                Ok(Ok(())) => {
                    info!("Resolved backend endpoint {} (candidate {})", base, index);
                    return ResolvedEndpoint {
                        base: base.clone(),
                        resolution: Resolution::Healthy { index },
                    };
                }
                Ok(Err(e)) => debug!("Candidate {} unhealthy: {}", base, e),
                Err(_) => debug!("Candidate {} timed out after {:?}", base, self.timeout),
            }
        }

        warn!(
            "No healthy backend among {} candidates, falling back to {}",
            self.candidates.len(),
            self.fallback
        );
        ResolvedEndpoint { base: self.fallback.clone(), resolution: Resolution::Fallback }
    }
}

/// Candidate list: caller override, same-host guess, then loopback fallbacks.
pub fn candidate_addresses(config: &ClientConfig) -> Vec<String> {
    let port = config.discovery.port;
    let mut candidates = Vec::new();

    if let Some(base) = config.api_base.as_deref() {
        candidates.push(base.to_string());
    }
    if let Some(host) = config.discovery.same_host.as_deref() {
        candidates.push(format!("http://{host}:{port}"));
    }
    candidates.push(format!("http://localhost:{port}"));
    candidates.push(format!("http://127.0.0.1:{port}"));

    dedup_candidates(candidates)
}

/// Deterministic same-host default used when discovery finds nothing.
pub fn default_address(discovery: &DiscoveryConfig) -> String {
    let host = discovery.same_host.as_deref().unwrap_or("localhost");
    format!("http://{}:{}", host, discovery.port)
}

/// Map an HTTP(S) base to its WebSocket endpoint.
///
/// `http` becomes `ws`, `https` becomes `wss`, the path is forced to `/ws` and
/// any query or fragment is dropped.
pub fn websocket_url(base: &str) -> Result<String> {
    let mut url = Url::parse(base).map_err(|e| SyncError::invalid_address(base, e))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SyncError::invalid_address(base, format!("unsupported scheme '{other}'")));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::invalid_address(base, "cannot switch scheme"))?;
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);

    Ok(url.to_string())
}

/// Join a REST path onto a base address, keeping any path prefix of the base.
pub fn endpoint_url(base: &str, path: &str) -> Result<Url> {
    let joined = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    Url::parse(&joined).map_err(|e| SyncError::invalid_address(base, e))
}

fn normalize_base(base: &str) -> String {
    base.trim().trim_end_matches('/').to_string()
}

fn dedup_candidates(candidates: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::new();
    for candidate in candidates {
        let candidate = normalize_base(&candidate);
        if !candidate.is_empty() && !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}
