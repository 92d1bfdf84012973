//! Reconnecting live channel
//!
//! One driver task owns the physical connection and moves it through
//! `CONNECTING → OPEN → (CLOSING →) CLOSED`, scheduling a reconnection after
//! every unplanned close until the [`ReconnectPolicy`] runs out of retries.
//! Inbound messages fan out to any number of subscribers through a broadcast
//! channel; status is published through a watch channel.
//!
//! ```text
//!            connect ok              peer close / error
//! CONNECTING ──────────► OPEN ──────────────────────────► CLOSED ─┐
//!     ▲                   │ close()                          │    │ retries
//!     │                   ▼                                  │    │ exhausted
//!     │                CLOSING ──► CLOSED (terminal)          │    ▼
//!     └───────────── backoff delay ◄──────────────────────────┘  CLOSED (terminal)
//! ```

use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::ReconnectPolicy;
use crate::connector::{Connector, Transport};
use crate::types::{ChannelStatus, ConnectionState};
use crate::{Result, SyncError};

/// Messages buffered per subscriber before it starts lagging
const MESSAGE_CAPACITY: usize = 256;

type Outbound = Option<mpsc::UnboundedSender<String>>;

/// Pre-start handle that lets subscribers attach before the first message
/// can arrive.
pub struct ChannelBuilder {
    policy: ReconnectPolicy,
    status: watch::Sender<ChannelStatus>,
    outbound: watch::Sender<Outbound>,
    messages: broadcast::Sender<Arc<str>>,
}

impl ChannelBuilder {
    /// Attach a subscriber that will see every message from the first
    /// connection onward.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.messages.subscribe()
    }

    /// Start the driver task.
    pub fn spawn<C: Connector>(self, connector: C) -> ReconnectingChannel {
        let cancel = CancellationToken::new();
        self.status.send_replace(ChannelStatus::new(ConnectionState::Connecting));

        let channel = ReconnectingChannel {
            status: self.status.subscribe(),
            outbound: self.outbound.subscribe(),
            messages: self.messages.clone(),
            cancel: cancel.clone(),
        };

        let driver = ChannelDriver {
            connector,
            policy: self.policy,
            status: self.status,
            outbound: self.outbound,
            messages: self.messages,
            cancel,
        };
        tokio::spawn(driver.run());

        channel
    }
}

/// Persistent connection shared by many subscribers.
///
/// Dropping the channel tears it down, same as [`close`](Self::close).
pub struct ReconnectingChannel {
    status: watch::Receiver<ChannelStatus>,
    outbound: watch::Receiver<Outbound>,
    messages: broadcast::Sender<Arc<str>>,
    cancel: CancellationToken,
}

impl ReconnectingChannel {
    /// Prepare a channel; subscribe on the builder, then spawn it.
    pub fn builder(policy: ReconnectPolicy) -> ChannelBuilder {
        let (status, _) = watch::channel(ChannelStatus::default());
        let (outbound, _) = watch::channel(None);
        let (messages, _) = broadcast::channel(MESSAGE_CAPACITY);
        ChannelBuilder { policy, status, outbound, messages }
    }

    /// Start a channel with no subscribers attached yet.
    pub fn spawn<C: Connector>(connector: C, policy: ReconnectPolicy) -> Self {
        Self::builder(policy).spawn(connector)
    }

    /// Attach another subscriber. It sees messages from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.messages.subscribe()
    }

    /// Subscriber as a stream; lagged gaps are skipped.
    pub fn messages(&self) -> impl Stream<Item = Arc<str>> + use<> {
        BroadcastStream::new(self.subscribe()).filter_map(|item| async move {
            match item {
                Ok(message) => Some(message),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagged, skipped {} messages", skipped);
                    None
                }
            }
        })
    }

    /// Current status snapshot
    pub fn status(&self) -> ChannelStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Most recent transport error since the last successful open
    pub fn last_error(&self) -> Option<Arc<str>> {
        self.status.borrow().last_error.clone()
    }

    /// Watch receiver for status changes
    pub fn watch_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Status changes as a stream, starting with the current status.
    pub fn status_updates(&self) -> impl Stream<Item = ChannelStatus> + use<> {
        WatchStream::new(self.status.clone())
    }

    /// Send a text message on the open connection.
    ///
    /// Rejected with [`SyncError::SendRejected`] unless the channel is open;
    /// nothing is queued for a later connection.
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        let state = self.state();
        if !state.is_open() {
            return Err(SyncError::SendRejected { state });
        }

        let outbound = self.outbound.borrow();
        match outbound.as_ref() {
            Some(sender) => sender
                .send(text.into())
                .map_err(|_| SyncError::SendRejected { state: ConnectionState::Closing }),
            None => Err(SyncError::SendRejected { state: self.state() }),
        }
    }

    /// Tear down the channel. Safe to call more than once.
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Closing live channel");
            self.cancel.cancel();
        }
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum SessionEnd {
    Cancelled,
    Closed,
    Failed(SyncError),
}

enum Step {
    Cancelled,
    Inbound(Option<Result<String>>),
    Outbound(String),
}

struct ChannelDriver<C> {
    connector: C,
    policy: ReconnectPolicy,
    status: watch::Sender<ChannelStatus>,
    outbound: watch::Sender<Outbound>,
    messages: broadcast::Sender<Arc<str>>,
    cancel: CancellationToken,
}

impl<C: Connector> ChannelDriver<C> {
    async fn run(self) {
        info!("Channel driver started for {}", self.connector.target());
        let mut failures = 0u32;
        let mut delivered = 0u64;

        loop {
            self.status.send_modify(|status| status.state = ConnectionState::Connecting);

            let timeout = self.policy.connect_timeout();
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = tokio::time::timeout(timeout, self.connector.connect()) => {
                    result.unwrap_or_else(|_| Err(SyncError::Timeout { duration: timeout }))
                }
            };

            let failure = match connected {
                Ok(mut transport) => {
                    failures = 0;
                    let (sender, mut pending) = mpsc::unbounded_channel();
                    self.outbound.send_replace(Some(sender));
                    self.status.send_replace(ChannelStatus::new(ConnectionState::Open));
                    info!("Live channel open to {}", self.connector.target());

                    let end = self.pump(&mut transport, &mut pending, &mut delivered).await;

                    self.outbound.send_replace(None);
                    pending.close();
                    let mut discarded = 0usize;
                    while pending.try_recv().is_ok() {
                        discarded += 1;
                    }
                    if discarded > 0 {
                        debug!("Discarded {} unsent messages", discarded);
                    }

                    match end {
                        SessionEnd::Cancelled => {
                            self.status.send_modify(|status| status.state = ConnectionState::Closing);
                            if let Err(e) = transport.close().await {
                                debug!("Error while closing transport: {}", e);
                            }
                            break;
                        }
                        SessionEnd::Closed => {
                            info!("Live channel closed by peer");
                            None
                        }
                        SessionEnd::Failed(e) => {
                            warn!("Live channel failed: {}", e);
                            Some(e.to_string())
                        }
                    }
                }
                Err(e) => {
                    warn!("Connection attempt to {} failed: {}", self.connector.target(), e);
                    Some(e.to_string())
                }
            };

            failures += 1;
            self.status.send_modify(|status| {
                status.state = ConnectionState::Closed;
                status.attempt = failures;
                if let Some(reason) = failure {
                    status.last_error = Some(reason.into());
                }
            });

            if !self.policy.allows(failures) {
                error!("Giving up after {} consecutive failures", failures);
                break;
            }

            let delay = self.policy.delay_for(failures);
            debug!("Reconnecting in {:?} (attempt {})", delay, failures);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.status.send_modify(|status| status.state = ConnectionState::Closed);
        info!("Channel driver stopped ({} messages delivered)", delivered);
    }

    async fn pump(
        &self,
        transport: &mut C::Transport,
        pending: &mut mpsc::UnboundedReceiver<String>,
        delivered: &mut u64,
    ) -> SessionEnd {
        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => Step::Cancelled,
                inbound = transport.recv() => Step::Inbound(inbound),
                Some(text) = pending.recv() => Step::Outbound(text),
            };

            match step {
                Step::Cancelled => return SessionEnd::Cancelled,
                Step::Inbound(Some(Ok(text))) => {
                    *delivered += 1;
                    trace!(bytes = text.len(), "Message {} received", delivered);
                    // No subscribers is not an error
                    let _ = self.messages.send(Arc::from(text));
                }
                Step::Inbound(Some(Err(e))) => return SessionEnd::Failed(e),
                Step::Inbound(None) => return SessionEnd::Closed,
                Step::Outbound(text) => {
                    if let Err(e) = transport.send(text).await {
                        return SessionEnd::Failed(e);
                    }
                }
            }
        }
    }
}
