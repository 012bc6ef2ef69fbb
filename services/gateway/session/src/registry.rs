//! Process-wide table of gateway sessions.
//!
//! The registry owns one entry per alias. Each entry holds the handles of a
//! running [`ConnectionManager`](crate::connection) task: its command channel,
//! its cancellation token, its rate limiter and the receiving side of its
//! snapshot channel. No map guard is held across an `.await`.

use crate::config::GatewayConfig;
use crate::connection::{ConnectionManager, ManagerParts, SessionCommand};
use crate::dispatcher::{EventDispatcher, HandlerBuilder, UnhandledBuilder};
use crate::error::{GatewayError, Result};
use crate::ratelimit::RateLimiter;
use crate::state::SessionSnapshot;
use crate::transport::{Connector, WsConnector};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gateway_wire::{FrameCodec, GatewayFrame, Intents};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COMMAND_BUFFER: usize = 64;

struct SessionEntry {
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    limiter: Arc<RateLimiter>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<SessionSnapshot>,
}

/// Registry of gateway sessions sharing one configuration and one dispatcher
pub struct SessionRegistry {
    config: Arc<GatewayConfig>,
    connector: Arc<dyn Connector>,
    dispatcher: Arc<EventDispatcher>,
    codec: FrameCodec,
    sessions: DashMap<String, SessionEntry>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("connector", &self.connector)
            .field("sessions", &self.aliases())
            .finish()
    }
}

impl SessionRegistry {
    /// Create a registry that connects over websockets
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Create a registry with a custom transport
    pub fn with_connector(config: GatewayConfig, connector: Arc<dyn Connector>) -> Self {
        let codec = FrameCodec::new().with_max_frame_size(config.max_frame_size);
        Self {
            config: Arc::new(config),
            connector,
            dispatcher: Arc::new(EventDispatcher::new()),
            codec,
            sessions: DashMap::new(),
        }
    }

    /// Configuration shared by all sessions
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Handler registry used by every session
    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    /// Register a handler; see [`EventDispatcher::on`]
    pub fn on(&self, event_name: impl Into<String>) -> HandlerBuilder<'_, Value> {
        self.dispatcher.on(event_name)
    }

    /// Register a catch-all handler; see [`EventDispatcher::on_unhandled`]
    pub fn on_unhandled(&self) -> UnhandledBuilder<'_> {
        self.dispatcher.on_unhandled()
    }

    /// Create a session and start connecting it in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(
        &self,
        token: impl Into<String>,
        intents: Intents,
        alias: impl Into<String>,
    ) -> Result<()> {
        let alias = alias.into();
        let vacant = match self.sessions.entry(alias.clone()) {
            Entry::Occupied(_) => return Err(GatewayError::DuplicateAlias(alias)),
            Entry::Vacant(vacant) => vacant,
        };

        let cancel = CancellationToken::new();
        let limiter = Arc::new(RateLimiter::new(self.config.rate_limit));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        // Unbounded so a slow handler never stalls heartbeats or frame reads.
        // A handler that never returns grows this queue without limit.
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(
            alias.clone(),
            intents,
            self.config.backoff.floor.min(self.config.backoff.cap),
        ));

        let manager = ConnectionManager::new(ManagerParts {
            alias: alias.clone(),
            token: token.into(),
            intents,
            config: self.config.clone(),
            connector: self.connector.clone(),
            limiter: limiter.clone(),
            cancel: cancel.clone(),
            commands: command_rx,
            events: event_tx,
            snapshot: snapshot_tx,
        });

        tokio::spawn(self.dispatcher.clone().run_queue(event_rx));
        let task = tokio::spawn(manager.run());

        vacant.insert(SessionEntry {
            commands: command_tx,
            cancel,
            limiter,
            snapshot: snapshot_rx,
            task,
        });
        info!(alias = %alias, "Registered session");
        Ok(())
    }

    /// Current snapshot of a session
    pub fn get(&self, alias: &str) -> Result<SessionSnapshot> {
        self.sessions
            .get(alias)
            .map(|entry| entry.snapshot.borrow().clone())
            .ok_or_else(|| GatewayError::UnknownAlias(alias.to_string()))
    }

    /// Receiver that observes every snapshot change of a session
    pub fn subscribe(&self, alias: &str) -> Result<watch::Receiver<SessionSnapshot>> {
        self.sessions
            .get(alias)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| GatewayError::UnknownAlias(alias.to_string()))
    }

    /// Aliases of all registered sessions, sorted
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        aliases.sort();
        aliases
    }

    /// Stop a session: cancel its task, close its transport with 1000 and
    /// remove it. Returns the final snapshot.
    pub async fn stop(&self, alias: &str) -> Result<SessionSnapshot> {
        let (_, entry) = self
            .sessions
            .remove(alias)
            .ok_or_else(|| GatewayError::UnknownAlias(alias.to_string()))?;

        debug!(alias = %alias, "Stopping session");
        entry.cancel.cancel();
        let snapshot = match entry.task.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(alias = %alias, "Session task ended abnormally: {}", e);
                entry.snapshot.borrow().clone()
            }
        };
        info!(alias = %alias, "Stopped session");
        Ok(snapshot)
    }

    /// Close the current transport with `close_code` and reconnect. Codes
    /// 1000 and 1001 discard the server-side session, so the next handshake
    /// is a fresh Identify; any other code keeps the session resumable.
    pub async fn restart(&self, alias: &str, close_code: u16) -> Result<()> {
        let commands = self.entry_commands(alias)?;
        commands
            .send(SessionCommand::Restart { code: close_code })
            .await
            .map_err(|_| GatewayError::NotReady(alias.to_string()))
    }

    /// Send a frame through a ready session, waiting for a rate limit slot.
    ///
    /// A slot claimed for a frame that never reaches the transport, because
    /// the session left Ready while the send waited, is handed back.
    pub async fn send(&self, alias: &str, frame: &GatewayFrame) -> Result<()> {
        let (commands, limiter, cancel, snapshot) = {
            let entry = self
                .sessions
                .get(alias)
                .ok_or_else(|| GatewayError::UnknownAlias(alias.to_string()))?;
            (
                entry.commands.clone(),
                entry.limiter.clone(),
                entry.cancel.clone(),
                entry.snapshot.clone(),
            )
        };
        let not_ready = || GatewayError::NotReady(alias.to_string());
        if !snapshot.borrow().is_ready() {
            return Err(not_ready());
        }

        let text = self.codec.encode(frame)?;
        let claimed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            claimed = limiter.acquire() => claimed,
        };
        if !snapshot.borrow().is_ready() {
            limiter.release(claimed).await;
            return Err(not_ready());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let outcome = match commands
            .send(SessionCommand::Send {
                text,
                reply: reply_tx,
            })
            .await
        {
            Ok(()) => reply_rx.await.unwrap_or_else(|_| Err(not_ready())),
            Err(_) => Err(not_ready()),
        };
        if let Err(GatewayError::NotReady(_)) = &outcome {
            limiter.release(claimed).await;
        }
        outcome
    }

    /// Stop every session
    pub async fn shutdown(&self) {
        let aliases = self.aliases();
        info!("Shutting down {} sessions", aliases.len());
        for alias in aliases {
            if let Err(e) = self.stop(&alias).await {
                debug!(alias = %alias, "Stop during shutdown: {}", e);
            }
        }
    }

    fn entry_commands(&self, alias: &str) -> Result<mpsc::Sender<SessionCommand>> {
        self.sessions
            .get(alias)
            .map(|entry| entry.commands.clone())
            .ok_or_else(|| GatewayError::UnknownAlias(alias.to_string()))
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        for entry in self.sessions.iter() {
            entry.cancel.cancel();
        }
    }
}
