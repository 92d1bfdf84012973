//! Test fixtures and in-memory transports
//!
//! Shared by unit tests and benchmarks: JSON fixtures shaped like the
//! backend's frames, and a [`MemoryConnector`] that lets a test play the
//! server side of the live channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};

use crate::connector::{Connector, Transport};
use crate::{Result, SyncError};

/// Event frame for a delay injected on train T2
pub const EVENT_JSON: &str = r#"{"type":"event","event_id":"evt-0001","event_kind":"DELAY_INJECTED","block_id":null,"train_id":"T2","timestamp":"2025-09-11T12:00:03.250000","note":"Injected 5 min delay"}"#;

/// Heartbeat in the backend's naive UTC format
pub const HEARTBEAT_JSON: &str = r#"{"type":"heartbeat","ts":"2025-09-11T12:00:04.000000"}"#;

/// One train record. `T1` is an express; every other id is regional.
pub fn train_json(
    id: &str,
    block: &str,
    entered_block_at: Option<&str>,
    will_exit_at: Option<&str>,
    dwell_sec_remaining: f64,
) -> Value {
    let (name, priority) = if id == "T1" { ("EXP-12001", "EXPRESS") } else { ("REG-22002", "REGIONAL") };
    json!({
        "id": id,
        "name": name,
        "priority": priority,
        "at_block": block,
        "next_block": null,
        "eta_next": will_exit_at,
        "entered_block_at": entered_block_at,
        "will_exit_at": will_exit_at,
        "delay_min": 0,
        "dwell_sec_remaining": dwell_sec_remaining,
        "speed_kmh": 80.0,
    })
}

/// A running-state snapshot with block B1 blocked and the given trains.
pub fn state_json(sim_time: &str, trains: Vec<Value>) -> String {
    let occupied: Vec<(String, String)> = trains
        .iter()
        .filter_map(|t| Some((t["at_block"].as_str()?.to_string(), t["id"].as_str()?.to_string())))
        .collect();

    let blocks: Vec<Value> = (1..=11)
        .map(|n| {
            let id = format!("B{n}");
            let occupied_by = occupied.iter().find(|(block, _)| *block == id).map(|(_, train)| train.clone());
            let issue = (n == 1).then(|| json!({ "type": "BLOCKED", "since": sim_time }));
            json!({ "id": id, "occupied_by": occupied_by, "issue": issue })
        })
        .collect();

    let trains_on_line = trains.len();
    json!({
        "type": "state",
        "sim_time": sim_time,
        "blocks": blocks,
        "trains": trains,
        "kpis": { "avg_delay_min": 0.0, "trains_on_line": trains_on_line, "conflicts_resolved": 0, "energy_efficiency": 0.0 },
        "status": "RUNNING",
    })
    .to_string()
}

type Outcome = Result<MemoryTransport>;

/// Client side of an in-memory live channel.
pub struct MemoryConnector {
    outcomes: Mutex<mpsc::UnboundedReceiver<Outcome>>,
    attempts: Arc<AtomicUsize>,
}

/// Test-controlled server side; decides how each connect attempt ends.
pub struct MemoryServer {
    outcomes: mpsc::UnboundedSender<Outcome>,
    attempts: Arc<AtomicUsize>,
}

/// Create a connector and the server handle that feeds it.
pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));
    (
        MemoryConnector { outcomes: Mutex::new(rx), attempts: Arc::clone(&attempts) },
        MemoryServer { outcomes: tx, attempts },
    )
}

impl MemoryServer {
    /// Let the next connect attempt succeed.
    pub fn accept(&self) -> MemoryPeer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport { inbound: inbound_rx, outbound: outbound_tx };
        let _ = self.outcomes.send(Ok(transport));
        MemoryPeer { inbound: Some(inbound_tx), outbound: outbound_rx }
    }

    /// Fail the next connect attempt.
    pub fn refuse(&self, reason: &str) {
        let _ = self.outcomes.send(Err(SyncError::transport(reason)));
    }

    /// Connect attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&self) -> Result<Self::Transport> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().await;
        match outcomes.recv().await {
            Some(outcome) => outcome,
            None => Err(SyncError::transport("memory server dropped")),
        }
    }

    fn target(&self) -> &str {
        "memory"
    }
}

/// Server end of one accepted connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Result<String>>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Deliver a message to the client. False once the client has gone.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.inbound.as_ref().is_some_and(|tx| tx.send(Ok(text.into())).is_ok())
    }

    /// Break the connection with a transport error.
    pub fn fail(&self, reason: &str) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Err(SyncError::transport(reason)));
        }
    }

    /// Close the connection cleanly from the server side.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Next message sent by the client; `None` once the client dropped the transport.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }
}

/// Client end of one accepted connection.
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Result<String>>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn recv(&mut self) -> Option<Result<String>> {
        self.inbound.recv().await
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.outbound.send(text).map_err(|_| SyncError::transport("peer gone"))
    }

    async fn close(&mut self) -> Result<()> {
        self.inbound.close();
        Ok(())
    }
}

#[cfg(test)]
pub use http_stub::{CannedResponse, serve_canned};

#[cfg(test)]
mod http_stub {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Response served once by [`serve_canned`]
    pub struct CannedResponse {
        status: u16,
        body: String,
    }

    impl CannedResponse {
        pub fn ok(body: impl Into<String>) -> Self {
            Self { status: 200, body: body.into() }
        }

        pub fn status(status: u16, body: impl Into<String>) -> Self {
            Self { status, body: body.into() }
        }
    }

    /// Serve one HTTP request on a loopback port.
    ///
    /// Returns the base URL and a handle resolving to the raw request text.
    pub async fn serve_canned(response: CannedResponse) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;

            let reply = format!(
                "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                response.status,
                response.body.len(),
                response.body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            request
        });

        (base, handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}
