//! Per-session connection state machine.
//!
//! A [`ConnectionManager`] owns one session's transport for its whole life.
//! It connects, waits for Hello, heartbeats, identifies or resumes, forwards
//! dispatch frames to the session's dispatch queue and reconnects on every
//! non-fatal loss. It publishes its state through a `watch` channel and only
//! stops when cancelled or when the service closes with a fatal code.

use crate::backoff::Backoff;
use crate::config::GatewayConfig;
use crate::dispatcher::DispatchEvent;
use crate::error::{FatalClose, GatewayError, Result};
use crate::heartbeat::{HeartbeatAction, HeartbeatScheduler};
use crate::ratelimit::RateLimiter;
use crate::state::{SessionSnapshot, SessionState};
use crate::transport::{Connector, Transport, TransportMessage};
use gateway_wire::event::names;
use gateway_wire::{
    client_close_discards_session, close, CloseKind, FrameCodec, GatewayFrame, Hello, Identify,
    Intents, OpCode, Ready, Resume, CLOSE_NORMAL, CLOSE_RESUMABLE,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound for a closing handshake
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests from the registry to a running session
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Write an encoded frame. The caller has already taken a rate limit slot.
    Send {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close the transport with `code` and reconnect
    Restart { code: u16 },
}

/// Why a transport loop ended
#[derive(Debug)]
enum Exit {
    /// Cancelled
    Stopped,
    /// Closed by the service with a fatal code
    Fatal(FatalClose),
    /// Lost; reconnect after the backoff
    Reconnect {
        reason: String,
        /// Code to close our side with, `None` when the transport is already gone
        close_with: Option<u16>,
        keep_session: bool,
    },
    /// InvalidSession received; re-handshake after the invalid session delay
    InvalidSession { resumable: bool },
    /// Restart requested through the registry
    Restart { code: u16 },
}

impl Exit {
    fn reconnect(reason: impl Into<String>) -> Self {
        Exit::Reconnect {
            reason: reason.into(),
            close_with: Some(CLOSE_RESUMABLE),
            keep_session: true,
        }
    }

    fn lost(reason: impl Into<String>) -> Self {
        Exit::Reconnect {
            reason: reason.into(),
            close_with: None,
            keep_session: true,
        }
    }

    fn from_error(err: GatewayError) -> Self {
        match err {
            GatewayError::Cancelled => Exit::Stopped,
            other => Exit::reconnect(other.to_string()),
        }
    }

    fn close_code(&self) -> Option<u16> {
        match self {
            Exit::Stopped => Some(CLOSE_NORMAL),
            Exit::Fatal(_) => None,
            Exit::Reconnect { close_with, .. } => *close_with,
            Exit::InvalidSession { .. } => Some(CLOSE_RESUMABLE),
            Exit::Restart { code } => Some(*code),
        }
    }
}

/// Result of reading one transport message
enum Inbound {
    Frame(GatewayFrame),
    Skip,
    Exit(Exit),
}

/// Drives one session
pub(crate) struct ConnectionManager {
    alias: String,
    token: String,
    intents: Intents,
    config: Arc<GatewayConfig>,
    connector: Arc<dyn Connector>,
    codec: FrameCodec,
    limiter: Arc<RateLimiter>,
    backoff: Backoff,
    cancel: CancellationToken,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::UnboundedSender<DispatchEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    connected_once: bool,
}

/// Everything a manager needs from the registry
pub(crate) struct ManagerParts {
    pub alias: String,
    pub token: String,
    pub intents: Intents,
    pub config: Arc<GatewayConfig>,
    pub connector: Arc<dyn Connector>,
    pub limiter: Arc<RateLimiter>,
    pub cancel: CancellationToken,
    pub commands: mpsc::Receiver<SessionCommand>,
    pub events: mpsc::UnboundedSender<DispatchEvent>,
    pub snapshot: watch::Sender<SessionSnapshot>,
}

impl ConnectionManager {
    pub(crate) fn new(parts: ManagerParts) -> Self {
        let codec = FrameCodec::new().with_max_frame_size(parts.config.max_frame_size);
        let backoff = Backoff::new(parts.config.backoff);
        Self {
            alias: parts.alias,
            token: parts.token,
            intents: parts.intents,
            codec,
            backoff,
            config: parts.config,
            connector: parts.connector,
            limiter: parts.limiter,
            cancel: parts.cancel,
            commands: parts.commands,
            events: parts.events,
            snapshot: parts.snapshot,
            session_id: None,
            sequence: None,
            resume_url: None,
            connected_once: false,
        }
    }

    /// Run until stopped or fatally closed; returns the final snapshot
    pub(crate) async fn run(mut self) -> SessionSnapshot {
        info!(alias = %self.alias, "Session starting");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_state(SessionState::Connecting);
            let transport = match self.connect().await {
                Ok(transport) => transport,
                Err(GatewayError::Cancelled) => break,
                Err(e) => {
                    self.record_connect_failure(&e);
                    let delay = self.backoff.next_delay();
                    if !self.pause(SessionState::Reconnecting, delay).await {
                        break;
                    }
                    continue;
                }
            };

            match self.drive(transport).await {
                Exit::Stopped => break,
                Exit::Fatal(fatal) => {
                    error!(alias = %self.alias, "{}, not reconnecting", fatal);
                    self.clear_resume_data();
                    self.snapshot.send_modify(|s| {
                        s.last_error = Some(fatal.to_string());
                        s.error = Some(fatal);
                    });
                    break;
                }
                Exit::Reconnect {
                    reason,
                    keep_session,
                    ..
                } => {
                    warn!(alias = %self.alias, "Connection lost: {}", reason);
                    if !keep_session {
                        self.clear_resume_data();
                    }
                    self.snapshot.send_modify(|s| s.last_error = Some(reason));
                    let delay = self.backoff.next_delay();
                    if !self.pause(SessionState::Reconnecting, delay).await {
                        break;
                    }
                }
                Exit::InvalidSession { resumable } => {
                    let state = if resumable {
                        SessionState::Resuming
                    } else {
                        self.clear_resume_data();
                        SessionState::Reconnecting
                    };
                    let delay = self.config.invalid_session_delay.sample();
                    if !self.pause(state, delay).await {
                        break;
                    }
                }
                Exit::Restart { code } => {
                    info!(alias = %self.alias, "Restarted with close code {}", code);
                    if client_close_discards_session(code) {
                        self.clear_resume_data();
                    }
                }
            }
        }

        self.set_state(SessionState::Closed);
        info!(alias = %self.alias, "Session closed");
        self.snapshot.borrow().clone()
    }

    /// Open a transport, to the resume endpoint when a resume is possible
    async fn connect(&mut self) -> Result<Box<dyn Transport>> {
        let url = match (&self.resume_url, self.can_resume()) {
            (Some(resume_url), true) => resume_url.clone(),
            _ => self.config.endpoint(),
        };
        debug!(alias = %self.alias, "Connecting to {}", url);

        let connector = self.connector.clone();
        let attempt = tokio::time::timeout(self.config.connect_timeout, connector.connect(&url));
        tokio::pin!(attempt);

        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(GatewayError::Cancelled),
                Some(command) = self.commands.recv() => {
                    self.idle_command(command);
                }
                result = &mut attempt => break result,
            }
        };

        let transport = match result {
            Ok(result) => result?,
            Err(_) => {
                return Err(GatewayError::transport(format!(
                    "connect to {} timed out after {:?}",
                    url, self.config.connect_timeout
                )))
            }
        };

        if self.connected_once {
            self.snapshot.send_modify(|s| s.reconnects += 1);
        }
        self.connected_once = true;
        self.snapshot.send_modify(|s| s.connect_failures = 0);
        Ok(transport)
    }

    fn record_connect_failure(&mut self, err: &GatewayError) {
        let budget = self.config.connect_retry_budget.max(1);
        let mut failures = 0;
        self.snapshot.send_modify(|s| {
            s.connect_failures += 1;
            s.last_error = Some(err.to_string());
            failures = s.connect_failures;
        });

        if failures % budget == 0 {
            warn!(
                alias = %self.alias,
                "Connect failed {} times in a row, still retrying: {}", failures, err
            );
        } else {
            debug!(alias = %self.alias, "Connect attempt {} failed: {}", failures, err);
        }
    }

    /// Handshake and serve one transport until it ends
    async fn drive(&mut self, mut transport: Box<dyn Transport>) -> Exit {
        self.set_state(SessionState::Handshaking);
        let exit = self.serve(transport.as_mut()).await;

        if let Some(code) = exit.close_code() {
            debug!(alias = %self.alias, "Closing transport with {}", code);
            match tokio::time::timeout(CLOSE_TIMEOUT, transport.close(code, "")).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(alias = %self.alias, "Close failed: {}", e),
                Err(_) => debug!(alias = %self.alias, "Close timed out"),
            }
        }
        exit
    }

    async fn serve(&mut self, transport: &mut dyn Transport) -> Exit {
        let hello = match self.await_hello(transport).await {
            Ok(hello) => hello,
            Err(exit) => return exit,
        };

        let mut heartbeat = HeartbeatScheduler::new(hello.interval());
        self.snapshot
            .send_modify(|s| s.heartbeat_interval = Some(hello.interval()));
        debug!(alias = %self.alias, "Hello received, heartbeat interval {:?}", hello.interval());

        let handshake = match self.handshake_frame() {
            Ok(frame) => frame,
            Err(e) => return Exit::from_error(e),
        };
        if let Err(e) = self.send_frame(transport, &handshake).await {
            return Exit::from_error(e);
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Exit::Stopped,
                _ = heartbeat.wait() => match heartbeat.fire() {
                    HeartbeatAction::Zombie => {
                        return Exit::reconnect("heartbeat was not acknowledged");
                    }
                    HeartbeatAction::Send => {
                        let frame = GatewayFrame::heartbeat(self.sequence);
                        if let Err(e) = self.send_frame(transport, &frame).await {
                            return Exit::from_error(e);
                        }
                    }
                },
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Send { text, reply }) => {
                        if !self.snapshot.borrow().is_ready() {
                            let _ = reply.send(Err(GatewayError::NotReady(self.alias.clone())));
                            continue;
                        }
                        match transport.send_text(text).await {
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) => {
                                let reason = e.to_string();
                                let _ = reply.send(Err(e));
                                return Exit::reconnect(reason);
                            }
                        }
                    }
                    Some(SessionCommand::Restart { code }) => return Exit::Restart { code },
                    None => return Exit::Stopped,
                },
                message = transport.recv() => {
                    let frame = match self.inbound(message) {
                        Inbound::Frame(frame) => frame,
                        Inbound::Skip => continue,
                        Inbound::Exit(exit) => return exit,
                    };
                    if let Some(exit) = self.handle_frame(transport, &mut heartbeat, frame).await {
                        return exit;
                    }
                }
            }
        }
    }

    async fn await_hello(&mut self, transport: &mut dyn Transport) -> std::result::Result<Hello, Exit> {
        let deadline = tokio::time::sleep(self.config.hello_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Exit::Stopped),
                _ = &mut deadline => {
                    return Err(Exit::reconnect(format!(
                        "no Hello within {:?}",
                        self.config.hello_timeout
                    )));
                }
                Some(command) = self.commands.recv() => {
                    if let Some(code) = self.idle_command(command) {
                        return Err(Exit::Restart { code });
                    }
                }
                message = transport.recv() => {
                    let frame = match self.inbound(message) {
                        Inbound::Frame(frame) => frame,
                        Inbound::Skip => continue,
                        Inbound::Exit(exit) => return Err(exit),
                    };
                    if frame.op != OpCode::Hello {
                        debug!(alias = %self.alias, "Ignoring {:?} before Hello", frame.op);
                        continue;
                    }
                    return frame
                        .hello_body()
                        .map_err(|e| Exit::reconnect(format!("bad Hello: {}", e)));
                }
            }
        }
    }

    fn handshake_frame(&self) -> Result<GatewayFrame> {
        match (&self.session_id, self.sequence) {
            (Some(session_id), Some(seq)) => {
                info!(alias = %self.alias, "Resuming session {} at sequence {}", session_id, seq);
                Ok(GatewayFrame::resume(&Resume {
                    token: self.token.clone(),
                    session_id: session_id.clone(),
                    seq,
                })?)
            }
            _ => {
                info!(alias = %self.alias, "Identifying with intents {:#x}", self.intents.bits());
                Ok(GatewayFrame::identify(&Identify {
                    token: self.token.clone(),
                    intents: self.intents,
                    properties: self.config.properties.clone(),
                })?)
            }
        }
    }

    /// Turn a transport message into a frame, or into the end of the loop
    fn inbound(&self, message: Option<Result<TransportMessage>>) -> Inbound {
        let decoded = match message {
            None => return Inbound::Exit(Exit::lost("transport stream ended")),
            Some(Err(e)) => return Inbound::Exit(Exit::lost(e.to_string())),
            Some(Ok(TransportMessage::Close { code, reason })) => {
                return Inbound::Exit(self.classify_close(code, reason))
            }
            Some(Ok(TransportMessage::Text(text))) => self.codec.decode(&text),
            Some(Ok(TransportMessage::Binary(bytes))) => self.codec.decode_binary(&bytes),
        };

        match decoded {
            Ok(frame) => Inbound::Frame(frame),
            Err(e) => {
                warn!(alias = %self.alias, "Dropping frame: {}", GatewayError::from(e));
                Inbound::Skip
            }
        }
    }

    fn classify_close(&self, code: Option<u16>, reason: String) -> Exit {
        let described = code.map(close::describe).unwrap_or("no close code");
        let code_text = code.map_or_else(|| "-".to_string(), |c| c.to_string());
        match self.config.close_policy.classify(code) {
            CloseKind::Fatal => {
                // Fatal codes are always present
                let code = code.unwrap_or_default();
                let reason = if reason.is_empty() {
                    described.to_string()
                } else {
                    reason
                };
                Exit::Fatal(FatalClose { code, reason })
            }
            CloseKind::Reidentify => Exit::Reconnect {
                reason: format!("closed with {} ({}), session invalidated", code_text, described),
                close_with: None,
                keep_session: false,
            },
            CloseKind::Resumable if reason.is_empty() => {
                Exit::lost(format!("closed with {} ({})", code_text, described))
            }
            CloseKind::Resumable => {
                Exit::lost(format!("closed with {} ({}): {}", code_text, described, reason))
            }
        }
    }

    async fn handle_frame(
        &mut self,
        transport: &mut dyn Transport,
        heartbeat: &mut HeartbeatScheduler,
        frame: GatewayFrame,
    ) -> Option<Exit> {
        match frame.op {
            OpCode::Dispatch => self.handle_dispatch(frame),
            OpCode::Heartbeat => {
                debug!(alias = %self.alias, "Server requested a heartbeat");
                let reply = GatewayFrame::heartbeat(self.sequence);
                self.send_frame(transport, &reply).await.err().map(Exit::from_error)
            }
            OpCode::HeartbeatAck => {
                heartbeat.acknowledge();
                let latency = heartbeat.latency();
                self.snapshot.send_modify(|s| {
                    s.last_heartbeat_ack = Some(SystemTime::now());
                    s.latency = latency;
                });
                None
            }
            OpCode::Reconnect => {
                info!(alias = %self.alias, "Server requested a reconnect");
                Some(Exit::reconnect("server requested a reconnect"))
            }
            OpCode::InvalidSession => {
                let resumable = frame.resumable() && self.can_resume();
                warn!(alias = %self.alias, "Session invalidated (resumable: {})", resumable);
                Some(Exit::InvalidSession { resumable })
            }
            OpCode::Hello => {
                debug!(alias = %self.alias, "Ignoring repeated Hello");
                None
            }
            op => {
                warn!(alias = %self.alias, "Dropping unexpected {:?} frame from server", op);
                None
            }
        }
    }

    fn handle_dispatch(&mut self, frame: GatewayFrame) -> Option<Exit> {
        let name = frame.t.clone().unwrap_or_default();

        if name.eq_ignore_ascii_case(names::READY) {
            let ready: Ready = match serde_json::from_value(frame.d.clone()) {
                Ok(ready) => ready,
                Err(e) => return Some(Exit::reconnect(format!("bad READY: {}", e))),
            };
            self.session_id = Some(ready.session_id.clone());
            self.sequence = frame.s;
            self.resume_url = ready.resume_gateway_url.as_deref().map(|url| {
                gateway_wire::gateway_url(url, self.config.version, &self.config.encoding)
            });
            self.backoff.reset();
            let ready_body = frame.d.clone();
            self.sync_resume_data();
            self.snapshot.send_modify(|s| {
                s.ready = Some(ready_body);
                s.last_error = None;
                s.backoff = self.backoff.current();
            });
            self.set_state(SessionState::Ready);
            info!(alias = %self.alias, "Session {} ready", ready.session_id);
        } else {
            if let Some(seq) = frame.s {
                if self.sequence.map_or(true, |current| seq > current) {
                    self.sequence = Some(seq);
                    self.sync_resume_data();
                }
            }

            if name.eq_ignore_ascii_case(names::RESUMED) {
                self.backoff.reset();
                let backoff = self.backoff.current();
                self.snapshot.send_modify(|s| {
                    s.last_error = None;
                    s.backoff = backoff;
                });
                self.set_state(SessionState::Ready);
                info!(alias = %self.alias, "Session resumed at sequence {:?}", self.sequence);
            }
        }

        let event = DispatchEvent {
            alias: self.alias.clone(),
            name,
            sequence: frame.s,
            data: frame.d,
        };
        if self.events.send(event).is_err() {
            debug!(alias = %self.alias, "Dispatch queue gone, dropping event");
        }
        None
    }

    /// Encode, take a rate limit slot and write
    async fn send_frame(&self, transport: &mut dyn Transport, frame: &GatewayFrame) -> Result<()> {
        let text = self.codec.encode(frame)?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(GatewayError::Cancelled),
            _ = self.limiter.acquire() => {}
        }
        debug!(alias = %self.alias, "Sending {:?}", frame.op);
        transport.send_text(text).await
    }

    /// Wait without a transport. Returns false when cancelled.
    async fn pause(&mut self, state: SessionState, delay: Duration) -> bool {
        let backoff = self.backoff.current();
        self.snapshot.send_modify(|s| s.backoff = backoff);
        self.set_state(state);
        debug!(alias = %self.alias, "Waiting {:?} before reconnecting", delay);

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                Some(command) = self.commands.recv() => {
                    if self.idle_command(command).is_some() {
                        return true;
                    }
                }
                _ = &mut sleep => return true,
            }
        }
    }

    /// Handle a command while no handshaken transport exists. Returns the
    /// close code of a restart request.
    fn idle_command(&mut self, command: SessionCommand) -> Option<u16> {
        match command {
            SessionCommand::Send { reply, .. } => {
                let _ = reply.send(Err(GatewayError::NotReady(self.alias.clone())));
                None
            }
            SessionCommand::Restart { code } => {
                if client_close_discards_session(code) {
                    self.clear_resume_data();
                }
                Some(code)
            }
        }
    }

    fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    fn clear_resume_data(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
        self.sync_resume_data();
        self.snapshot.send_modify(|s| s.ready = None);
    }

    fn sync_resume_data(&self) {
        let session_id = self.session_id.clone();
        let sequence = self.sequence;
        let resume_url = self.resume_url.clone();
        self.snapshot.send_modify(|s| {
            s.session_id = session_id;
            s.sequence = sequence;
            s.resume_url = resume_url;
        });
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.snapshot.borrow().state;
        if previous == state {
            return;
        }
        debug!(alias = %self.alias, "State {} -> {}", previous, state);
        self.snapshot.send_modify(|s| s.state = state);
    }
}
