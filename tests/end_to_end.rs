//! End-to-end tests against a loopback backend
//!
//! The stub backend answers `GET /health` with 200 and upgrades every other
//! connection to a WebSocket, then plays a per-connection script.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use railsync::{
    ClientConfig, ConnectionState, EndpointResolver, FrameKind, HttpHealthProbe, LiveSync, ReconnectPolicy,
    Resolution, TrackLayout, WebSocketConnector,
};

const WAIT: Duration = Duration::from_secs(10);

/// What one WebSocket connection does
struct Script {
    frames: Vec<String>,
    hold_open: bool,
}

struct StubBackend {
    base: String,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
}

impl StubBackend {
    async fn start<F>(script: F) -> Self
    where
        F: Fn(usize) -> Script + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(script);

        let counter = Arc::clone(&connections);
        let inbox = Arc::clone(&received);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(handle(socket, Arc::clone(&script), Arc::clone(&counter), Arc::clone(&inbox)));
            }
        });

        Self { base, connections, received }
    }

    fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Text messages the backend has received from clients
    fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }
}

async fn handle<F>(
    mut socket: TcpStream,
    script: Arc<F>,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<String>>>,
) where
    F: Fn(usize) -> Script + Send + Sync + 'static,
{
    let mut head = [0u8; 16];
    let peeked = socket.peek(&mut head).await.unwrap_or(0);

    if head[..peeked].starts_with(b"GET /health") {
        let mut request = [0u8; 2048];
        let _ = socket.read(&mut request).await;
        let body = r#"{"status":"healthy"}"#;
        let reply = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = socket.write_all(reply.as_bytes()).await;
        return;
    }

    let Ok(mut ws) = accept_async(socket).await else {
        return;
    };
    let index = connections.fetch_add(1, Ordering::SeqCst);
    let Script { frames, hold_open } = script(index);

    for frame in frames {
        if ws.send(Message::text(frame)).await.is_err() {
            return;
        }
    }

    if hold_open {
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) => received.lock().unwrap().push(text.as_str().to_owned()),
                Message::Close(_) => break,
                _ => {}
            }
        }
    } else {
        let _ = ws.close(None).await;
    }
}

fn state_frame(sim_time: &str) -> String {
    json!({
        "type": "state",
        "sim_time": sim_time,
        "blocks": [{ "id": "B1", "occupied_by": "T1", "issue": null }],
        "trains": [{
            "id": "T1", "name": "EXP-12001", "priority": "EXPRESS",
            "at_block": "B1", "next_block": "B2", "eta_next": null,
            "entered_block_at": null, "will_exit_at": null,
            "delay_min": 0, "dwell_sec_remaining": 0, "speed_kmh": 80.0
        }],
        "kpis": { "avg_delay_min": 0.0, "trains_on_line": 1 },
        "status": "RUNNING"
    })
    .to_string()
}

fn config(base: &str) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.api_base = Some(base.to_string());
    config.discovery.probe_timeout_ms = 500;
    config.reconnect = ReconnectPolicy::fixed(Duration::from_millis(100), Some(10));
    config
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

#[tokio::test]
async fn resolver_skips_unhealthy_candidate() {
    init_tracing();
    let backend = StubBackend::start(|_| Script { frames: vec![], hold_open: true }).await;

    let probe = HttpHealthProbe::new(Duration::from_millis(500)).unwrap();
    let resolver = EndpointResolver::new(
        probe,
        ["http://bad.invalid:1".to_string(), backend.base.clone()],
        "http://localhost:8000",
        Duration::from_millis(500),
    );

    let endpoint = resolver.resolve().await;
    assert_eq!(endpoint.base, backend.base);
    assert_eq!(endpoint.resolution, Resolution::Healthy { index: 1 });

    let port = backend.base.rsplit(':').next().unwrap();
    assert_eq!(endpoint.websocket_url().unwrap(), format!("ws://127.0.0.1:{port}/ws"));
}

#[tokio::test]
async fn live_session_receives_snapshots() {
    init_tracing();
    let backend = StubBackend::start(|_| Script {
        frames: vec![state_frame("2025-09-11T12:00:00")],
        hold_open: true,
    })
    .await;

    let sync = LiveSync::connect(&config(&backend.base), Arc::new(TrackLayout::demo())).await.unwrap();
    assert!(!sync.endpoint().is_fallback());

    sync.wait_until_open(WAIT).await.unwrap();
    wait_until("first snapshot", || sync.latest_state().is_some()).await;

    let state = sync.latest_state().unwrap();
    assert_eq!(state.trains[0].id, "T1");
    assert_ne!(sync.clock_offset().as_delta(), chrono::TimeDelta::zero());

    sync.shutdown();
}

#[tokio::test]
async fn dropped_connection_reconnects_and_resumes() {
    init_tracing();
    let backend = StubBackend::start(|index| match index {
        0 => Script { frames: vec![state_frame("2025-09-11T12:00:00")], hold_open: false },
        _ => Script { frames: vec![state_frame("2025-09-11T12:05:00")], hold_open: true },
    })
    .await;

    let sync = LiveSync::connect(&config(&backend.base), Arc::new(TrackLayout::demo())).await.unwrap();

    wait_until("snapshot from second connection", || {
        sync.latest_state().is_some_and(|s| s.sim_time == "2025-09-11T12:05:00")
    })
    .await;
    sync.wait_until_open(WAIT).await.unwrap();

    assert_eq!(backend.connections(), 2);
    assert_eq!(sync.status().attempt, 0);
    sync.shutdown();
}

#[tokio::test]
async fn unknown_frame_type_is_ignored() {
    init_tracing();
    let backend = StubBackend::start(|_| Script {
        frames: vec![
            state_frame("2025-09-11T12:00:00"),
            r#"{"type":"explosion"}"#.to_string(),
            r#"{"type":"heartbeat","ts":"2025-09-11T12:00:01"}"#.to_string(),
        ],
        hold_open: true,
    })
    .await;

    let sync = LiveSync::connect(&config(&backend.base), Arc::new(TrackLayout::demo())).await.unwrap();
    wait_until("heartbeat", || sync.latest_frame().is_some_and(|f| f.kind() == FrameKind::Heartbeat)).await;

    let state = sync.latest_state().unwrap();
    assert_eq!(state.sim_time, "2025-09-11T12:00:00");
    assert_eq!(sync.state(), ConnectionState::Open);
    assert_eq!(sync.dropped_messages(), 1);
    sync.shutdown();
}

#[tokio::test]
async fn outbound_messages_reach_the_backend_only_while_open() {
    init_tracing();
    let backend = StubBackend::start(|_| Script { frames: vec![], hold_open: true }).await;
    let endpoint = railsync::ResolvedEndpoint::fixed(backend.base.clone());
    let connector = WebSocketConnector::new(endpoint.websocket_url().unwrap());

    let sync = LiveSync::with_connector(endpoint, connector, &config(&backend.base), Arc::new(TrackLayout::demo()))
        .unwrap();
    sync.wait_until_open(WAIT).await.unwrap();
    sync.send(r#"{"type":"hello"}"#).unwrap();
    wait_until("backend receipt", || !backend.received().is_empty()).await;
    assert_eq!(backend.received(), [r#"{"type":"hello"}"#]);

    sync.shutdown();
    wait_until("channel closed", || sync.state() == ConnectionState::Closed).await;
    assert!(sync.send("late").is_err());
}

#[tokio::test]
async fn unreachable_backend_falls_back_and_keeps_retrying() {
    init_tracing();
    let mut config = config("http://127.0.0.1:1");
    config.discovery.same_host = Some("127.0.0.1".to_string());
    config.discovery.port = 1;

    let sync = LiveSync::connect(&config, Arc::new(TrackLayout::demo())).await.unwrap();
    assert!(sync.endpoint().is_fallback());
    assert_eq!(sync.endpoint().base, "http://127.0.0.1:1");

    wait_until("failed attempts", || sync.status().attempt >= 2).await;
    assert!(sync.status().last_error.is_some());
    assert!(sync.latest_state().is_none());
    sync.shutdown();
}

#[tokio::test]
async fn stalled_websocket_handshake_is_retried() {
    init_tracing();
    // Accepts TCP and then never answers the upgrade request
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });

    let mut config = config(&base);
    config.reconnect = ReconnectPolicy::fixed(Duration::from_millis(50), Some(3))
        .with_connect_timeout(Duration::from_millis(200));
    let endpoint = railsync::ResolvedEndpoint::fixed(base.clone());
    let connector = WebSocketConnector::new(endpoint.websocket_url().unwrap());
    let sync = LiveSync::with_connector(endpoint, connector, &config, Arc::new(TrackLayout::demo())).unwrap();

    wait_until("timed out attempts", || sync.status().attempt >= 2).await;
    assert_ne!(sync.state(), ConnectionState::Open);
    assert!(sync.status().last_error.unwrap().contains("timed out"));
    assert!(accepted.load(Ordering::SeqCst) >= 2);
    sync.shutdown();
}
