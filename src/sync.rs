//! Live synchronization session
//!
//! [`LiveSync`] wires discovery, the reconnecting channel, ingestion and clock
//! alignment together and exposes a read-only view for presentation code.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, DEFAULT_REQUEST_TIMEOUT};
use crate::channel::ReconnectingChannel;
use crate::clock::{ClockOffset, ClockSynchronizer};
use crate::config::ClientConfig;
use crate::connector::Connector;
use crate::connectors::WebSocketConnector;
use crate::discovery::{EndpointResolver, HttpHealthProbe, ResolvedEndpoint};
use crate::geometry::TrackLayout;
use crate::ingest::{FrameIngestor, FrameReader};
use crate::interpolate::{MotionInterpolator, RenderPosition};
use crate::render::{IntervalTicks, RenderLoop, RenderTick};
use crate::types::{ChannelStatus, ConnectionState, Frame, StateFrame};
use crate::{Result, SyncError};

/// Ingestion followed by clock alignment, applied per message.
struct Pipeline {
    ingestor: FrameIngestor,
    clock: ClockSynchronizer,
}

impl Pipeline {
    fn on_message(&self, raw: &str) -> Option<Arc<Frame>> {
        let frame = self.ingestor.ingest(raw)?;
        if let Some(state) = frame.as_state() {
            // A bad sim_time keeps the previous offset; already logged
            let _ = self.clock.resync(state, Utc::now());
        }
        Some(frame)
    }

    /// Snapshot that supersedes whatever is held, e.g. right after a reset.
    fn on_state(&self, state: StateFrame) -> Arc<StateFrame> {
        let state = self.ingestor.ingest_state(state);
        let _ = self.clock.resync(&state, Utc::now());
        state
    }

    /// Snapshot fetched out of band; a newer streamed one wins.
    fn on_fetched_state(&self, state: StateFrame) -> Arc<StateFrame> {
        let state = Arc::new(state);
        if self.ingestor.ingest_state_if_newer(Arc::clone(&state)) {
            let _ = self.clock.resync(&state, Utc::now());
            return state;
        }
        self.ingestor.latest_state().unwrap_or(state)
    }
}

/// Connected session against one backend.
///
/// Dropping the session shuts it down.
pub struct LiveSync {
    endpoint: ResolvedEndpoint,
    channel: ReconnectingChannel,
    pipeline: Arc<Pipeline>,
    api: ApiClient,
    interpolator: MotionInterpolator,
    render_hz: u32,
    cancel: CancellationToken,
    ingest_task: JoinHandle<()>,
}

impl LiveSync {
    /// Discover the backend and open the live channel.
    ///
    /// Discovery never fails; an unreachable backend shows up as a channel
    /// that keeps reconnecting.
    pub async fn connect(config: &ClientConfig, layout: Arc<TrackLayout>) -> Result<Self> {
        let probe = HttpHealthProbe::new(config.discovery.probe_timeout())?;
        let endpoint = EndpointResolver::from_config(probe, config).resolve().await;
        let connector = WebSocketConnector::new(endpoint.websocket_url()?);
        info!("Connecting live channel to {}", connector.target());
        Self::with_connector(endpoint, connector, config, layout)
    }

    /// Start a session over an explicit connector.
    pub fn with_connector<C: Connector>(
        endpoint: ResolvedEndpoint,
        connector: C,
        config: &ClientConfig,
        layout: Arc<TrackLayout>,
    ) -> Result<Self> {
        config.validate()?;
        let api = ApiClient::new(endpoint.base.clone(), DEFAULT_REQUEST_TIMEOUT)?;
        let pipeline = Arc::new(Pipeline { ingestor: FrameIngestor::new(), clock: ClockSynchronizer::new() });
        let cancel = CancellationToken::new();

        let builder = ReconnectingChannel::builder(config.reconnect.clone());
        let mut messages = builder.subscribe();
        let channel = builder.spawn(connector);

        let ingest_task = tokio::spawn({
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        message = messages.recv() => match message {
                            Ok(raw) => {
                                pipeline.on_message(&raw);
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!("Ingestion lagged, skipped {} messages", skipped);
                            }
                            Err(RecvError::Closed) => break,
                        },
                    }
                }
                debug!("Ingestion task stopped");
            }
        });

        Ok(Self {
            endpoint,
            channel,
            pipeline,
            api,
            interpolator: MotionInterpolator::new(layout, config.interpolation.clone()),
            render_hz: config.render.target_hz,
            cancel,
            ingest_task,
        })
    }

    pub fn endpoint(&self) -> &ResolvedEndpoint {
        &self.endpoint
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn interpolator(&self) -> &MotionInterpolator {
        &self.interpolator
    }

    pub fn status(&self) -> ChannelStatus {
        self.channel.status()
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn status_updates(&self) -> impl Stream<Item = ChannelStatus> + use<> {
        self.channel.status_updates()
    }

    /// Wait until the channel is open.
    pub async fn wait_until_open(&self, timeout: Duration) -> Result<()> {
        let mut status = self.channel.watch_status();
        match tokio::time::timeout(timeout, status.wait_for(|s| s.state.is_open())).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(SyncError::transport("channel driver stopped")),
            Err(_) => Err(SyncError::Timeout { duration: timeout }),
        }
    }

    pub fn latest_state(&self) -> Option<Arc<StateFrame>> {
        self.pipeline.ingestor.latest_state()
    }

    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.pipeline.ingestor.latest_frame()
    }

    /// Snapshots as they are replaced.
    pub fn state_updates(&self) -> impl Stream<Item = Arc<StateFrame>> + use<> {
        self.reader().state_updates()
    }

    /// Read-only handle to the ingested values
    pub fn reader(&self) -> FrameReader {
        self.pipeline.ingestor.reader()
    }

    /// Messages dropped as invalid since the session started
    pub fn dropped_messages(&self) -> u64 {
        self.pipeline.ingestor.dropped()
    }

    pub fn clock_offset(&self) -> ClockOffset {
        self.pipeline.clock.offset()
    }

    /// Send a text message on the open channel.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.channel.send(text)
    }

    /// Fetch the current snapshot over REST and ingest it.
    ///
    /// If the live channel delivered a later snapshot while the request was
    /// in flight, that one is kept and returned instead.
    pub async fn refresh_state(&self) -> Result<Arc<StateFrame>> {
        let state = self.api.state().await?;
        Ok(self.pipeline.on_fetched_state(state))
    }

    /// Start the simulation and pick up its first snapshot.
    pub async fn start(&self) -> Result<Arc<StateFrame>> {
        self.api.start().await?;
        self.refresh_state().await
    }

    /// Reset the simulation and pick up the fresh snapshot.
    ///
    /// Simulation time restarts, so the fetched snapshot replaces the held
    /// one unconditionally.
    pub async fn reset(&self) -> Result<Arc<StateFrame>> {
        self.api.reset().await?;
        let state = self.api.state().await?;
        Ok(self.pipeline.on_state(state))
    }

    /// Evaluate positions once, for local wall-clock time `local_now`.
    ///
    /// `render` receives an empty slice before the first snapshot arrives.
    pub fn with_render_frame<R>(
        &self,
        local_now: DateTime<Utc>,
        render: impl FnOnce(&[RenderPosition<'_>]) -> R,
    ) -> R {
        match self.latest_state() {
            Some(state) => render(self.interpolator.frame(&state, self.clock_offset(), local_now).as_slice()),
            None => render(&[]),
        }
    }

    /// Run `draw` at the configured render rate until the loop is stopped or
    /// the session shuts down.
    pub fn spawn_render_loop<F>(&self, mut draw: F) -> RenderLoop
    where
        F: FnMut(RenderTick, &[RenderPosition<'_>]) + Send + 'static,
    {
        let reader = self.reader();
        let offsets = self.pipeline.clock.watch();
        let interpolator = self.interpolator.clone();

        RenderLoop::spawn_with_token(IntervalTicks::new(self.render_hz), self.cancel.child_token(), move |tick| {
            match reader.latest_state() {
                Some(state) => {
                    let offset = *offsets.borrow();
                    draw(tick, interpolator.frame(&state, offset, tick.wall).as_slice());
                }
                None => draw(tick, &[]),
            }
        })
    }

    /// Stop ingestion and close the channel. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        info!("Shutting down live sync for {}", self.endpoint.base);
        self.cancel.cancel();
        self.channel.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled() && self.ingest_task.is_finished()
    }
}

impl Drop for LiveSync {
    fn drop(&mut self) {
        self.shutdown();
    }
}
