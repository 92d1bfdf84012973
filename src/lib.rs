//! Live-state synchronization client for railway control simulations.
//!
//! RailSync keeps a local view of a running simulation backend in step with
//! the server and turns it into smooth, render-ready train positions.
//!
//! # Features
//!
//! - **Discovery**: Sequential `/health` probing with a deterministic fallback
//! - **Resilient streaming**: One shared WebSocket with bounded reconnection backoff
//! - **Clock alignment**: Local wall clock mapped onto simulation time per snapshot
//! - **Smooth motion**: Arc-length sampled curves with eased block transitions
//!
//! # Data flow
//!
//! ```text
//! EndpointResolver → ReconnectingChannel → FrameIngestor → ClockSynchronizer
//!                                                       ↘ MotionInterpolator → render
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use railsync::{ClientConfig, RailSync, TrackLayout};
//!
//! #[tokio::main]
//! async fn main() -> railsync::Result<()> {
//!     let config = ClientConfig::default().with_env_overrides();
//!     let sync = RailSync::connect(&config, Arc::new(TrackLayout::demo())).await?;
//!
//!     let render = sync.spawn_render_loop(|tick, positions| {
//!         for p in positions {
//!             println!("#{} {} at ({:.1}, {:.1})", tick.frame_index, p.train.id, p.x, p.y);
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     render.stop();
//!     sync.shutdown();
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub mod config;

// Live channel
pub mod channel;
pub mod connector;
pub mod connectors;
pub mod discovery;
pub mod ingest;

// Time and motion
pub mod clock;
pub mod geometry;
pub mod interpolate;
pub mod render;

// Session
pub mod api;
pub mod sync;

// Core exports
pub use error::*;
pub use types::*;

pub use api::{ActionResponse, ApiClient, ControlPayload};
pub use channel::{ChannelBuilder, ReconnectingChannel};
pub use clock::{ClockOffset, ClockSynchronizer};
pub use config::{ClientConfig, DiscoveryConfig, InterpolationConfig, ReconnectPolicy, RenderConfig};
pub use connector::{Connector, Transport};
pub use connectors::WebSocketConnector;
pub use discovery::{EndpointResolver, HealthProbe, HttpHealthProbe, Resolution, ResolvedEndpoint};
pub use geometry::{Sample, Segment, SegmentKind, TrackLayout};
pub use ingest::{FrameIngestor, FrameReader};
pub use interpolate::{MotionInterpolator, RenderPosition, smoothstep};
pub use render::{IntervalTicks, RenderLoop, RenderTick, TickSource};
pub use sync::LiveSync;

/// Unified entry point for RailSync sessions.
///
/// # Examples
///
/// ## Discover and connect
/// ```rust,no_run
/// use std::sync::Arc;
/// use railsync::{ClientConfig, RailSync, TrackLayout};
///
/// #[tokio::main]
/// async fn main() -> railsync::Result<()> {
///     let sync = RailSync::connect(&ClientConfig::default(), Arc::new(TrackLayout::demo())).await?;
///     // Use session...
///     Ok(())
/// }
/// ```
///
/// ## Known address, no probing
/// ```rust,no_run
/// use railsync::RailSync;
///
/// #[tokio::main]
/// async fn main() -> railsync::Result<()> {
///     let sync = RailSync::connect_to("http://rail-ops.local:8000").await?;
///     Ok(())
/// }
/// ```
pub struct RailSync;

impl RailSync {
    /// Discover the backend from `config` and start a live session.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The resolved address cannot be mapped to a WebSocket URL
    /// - The HTTP client cannot be constructed
    ///
    /// An unreachable backend is not an error; the session keeps reconnecting.
    pub async fn connect(config: &ClientConfig, layout: std::sync::Arc<TrackLayout>) -> Result<LiveSync> {
        LiveSync::connect(config, layout).await
    }

    /// Start a session against a fixed base address with default settings
    /// and the demo layout.
    pub async fn connect_to(base: &str) -> Result<LiveSync> {
        let endpoint = ResolvedEndpoint::fixed(base);
        let connector = WebSocketConnector::new(endpoint.websocket_url()?);
        LiveSync::with_connector(
            endpoint,
            connector,
            &ClientConfig::default(),
            std::sync::Arc::new(TrackLayout::demo()),
        )
    }
}
