//! In-memory gateway used by the scenario tests.

#![allow(dead_code)]

use async_trait::async_trait;
use gateway_session::{
    BackoffConfig, Connector, DelayRange, GatewayConfig, GatewayError, SessionRegistry,
    SessionSnapshot, Transport, TransportMessage,
};
use gateway_wire::{GatewayFrame, OpCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long any single wait in a test may take
pub const WAIT: Duration = Duration::from_secs(5);

/// What the client wrote to a mock transport
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Text(String),
    Close(u16),
}

/// Connector whose transports are served by the test
#[derive(Debug)]
pub struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerConnection>,
    failures: AtomicU32,
    urls: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, MockGateway) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            accepted: tx,
            failures: AtomicU32::new(0),
            urls: Mutex::new(Vec::new()),
        });
        (connector, MockGateway { incoming: rx })
    }

    /// Fail the next `count` connect attempts
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> gateway_session::Result<Box<dyn Transport>> {
        self.urls.lock().unwrap().push(url.to_string());

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::transport("connection refused"));
        }

        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let server = ServerConnection {
            url: url.to_string(),
            to_client,
            from_client,
        };
        self.accepted
            .send(server)
            .map_err(|_| GatewayError::transport("mock gateway is gone"))?;

        Ok(Box::new(MockTransport {
            to_server,
            from_server,
        }))
    }
}

struct MockTransport {
    to_server: mpsc::UnboundedSender<ClientMessage>,
    from_server: mpsc::UnboundedReceiver<TransportMessage>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&mut self, text: String) -> gateway_session::Result<()> {
        self.to_server
            .send(ClientMessage::Text(text))
            .map_err(|_| GatewayError::transport("server hung up"))
    }

    async fn recv(&mut self) -> Option<gateway_session::Result<TransportMessage>> {
        self.from_server.recv().await.map(Ok)
    }

    async fn close(&mut self, code: u16, _reason: &str) -> gateway_session::Result<()> {
        let _ = self.to_server.send(ClientMessage::Close(code));
        Ok(())
    }
}

/// Accepts the connections opened through a [`MockConnector`]
pub struct MockGateway {
    incoming: mpsc::UnboundedReceiver<ServerConnection>,
}

impl MockGateway {
    pub async fn accept(&mut self) -> ServerConnection {
        tokio::time::timeout(WAIT, self.incoming.recv())
            .await
            .expect("no connection within timeout")
            .expect("connector dropped")
    }

    /// Whether a connection is waiting, without blocking
    pub fn has_pending(&mut self) -> bool {
        self.incoming.try_recv().is_ok()
    }
}

/// Server side of one mock transport
pub struct ServerConnection {
    pub url: String,
    to_client: mpsc::UnboundedSender<TransportMessage>,
    from_client: mpsc::UnboundedReceiver<ClientMessage>,
}

impl ServerConnection {
    pub fn send(&self, frame: GatewayFrame) {
        let text = serde_json::to_string(&frame).unwrap();
        let _ = self.to_client.send(TransportMessage::Text(text));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(TransportMessage::Text(text.to_string()));
    }

    pub fn hello(&self, interval_ms: u64) {
        self.send(GatewayFrame::hello(interval_ms));
    }

    pub fn dispatch(&self, name: &str, seq: u64, data: Value) {
        self.send(GatewayFrame::dispatch(name, Some(seq), data));
    }

    pub fn ready(&self, seq: u64, session_id: &str) {
        self.send(GatewayFrame::dispatch("READY", Some(seq), ready_body(session_id)));
    }

    /// READY carrying `s: null`
    pub fn ready_unsequenced(&self, session_id: &str) {
        self.send(GatewayFrame::dispatch("READY", None, ready_body(session_id)));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(TransportMessage::Close {
            code: Some(code),
            reason: reason.to_string(),
        });
    }

    /// Next message from the client
    pub async fn recv(&mut self) -> Option<ClientMessage> {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("client sent nothing within timeout")
    }

    /// Next frame, skipping heartbeats unless `keep_heartbeats`
    async fn next_frame_inner(&mut self, keep_heartbeats: bool) -> GatewayFrame {
        loop {
            match self.recv().await {
                Some(ClientMessage::Text(text)) => {
                    let frame: GatewayFrame = serde_json::from_str(&text).unwrap();
                    if frame.op == OpCode::Heartbeat && !keep_heartbeats {
                        continue;
                    }
                    return frame;
                }
                other => panic!("expected a frame, got {:?}", other),
            }
        }
    }

    pub async fn next_frame(&mut self) -> GatewayFrame {
        self.next_frame_inner(false).await
    }

    pub async fn next_frame_with_heartbeats(&mut self) -> GatewayFrame {
        self.next_frame_inner(true).await
    }

    /// Wait for the client to close this transport
    pub async fn closed_with(&mut self) -> Option<u16> {
        loop {
            match self.recv().await {
                Some(ClientMessage::Close(code)) => return Some(code),
                Some(ClientMessage::Text(_)) => continue,
                None => return None,
            }
        }
    }

    /// Hello, expect Identify, answer READY
    pub async fn handshake(&mut self, seq: u64, session_id: &str) -> GatewayFrame {
        self.hello(45_000);
        let identify = self.next_frame().await;
        assert_eq!(identify.op, OpCode::Identify);
        self.ready(seq, session_id);
        identify
    }
}

fn ready_body(session_id: &str) -> Value {
    json!({
        "v": 10,
        "session_id": session_id,
        "resume_gateway_url": "wss://resume.test",
        "user": { "id": "1", "username": "bot", "discriminator": "0", "bot": true }
    })
}

/// Fast timings for tests
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        url: "wss://gateway.test".to_string(),
        backoff: BackoffConfig {
            floor: Duration::from_millis(10),
            cap: Duration::from_millis(50),
        },
        invalid_session_delay: DelayRange {
            min: Duration::from_millis(10),
            max: Duration::from_millis(20),
        },
        connect_timeout: Duration::from_secs(1),
        hello_timeout: Duration::from_secs(1),
        ..GatewayConfig::default()
    }
}

/// Wait until the session's snapshot satisfies `predicate`
pub async fn wait_for<F>(registry: &SessionRegistry, alias: &str, predicate: F) -> SessionSnapshot
where
    F: FnMut(&SessionSnapshot) -> bool,
{
    let mut rx = registry.subscribe(alias).unwrap();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("snapshot condition not reached within timeout")
        .expect("session task ended")
        .clone();
    snapshot
}
