//! Gateway sessions: websocket transport, Identify/Resume handshake,
//! heartbeats, reconnects and event dispatch.
//!
//! This crate keeps any number of long-lived gateway sessions alive. Each
//! session runs its own connection task that handshakes, heartbeats and
//! transparently resumes after transient disconnects; decoded dispatch events
//! are routed to handlers registered on a shared [`EventDispatcher`].
//!
//! ## Features
//!
//! - **Connection state machine**: Connecting, Handshaking, Ready, Reconnecting, Resuming, Closed
//! - **Heartbeats**: jittered first beat, zombie detection, latency tracking
//! - **Resume**: session id and sequence survive non-fatal disconnects
//! - **Rate limiting**: rolling window quota shared by all outbound sends
//! - **Dispatch**: alias filters, typed parsers, isolated handler failures
//!
//! ## Example
//!
//! ```rust,no_run
//! use gateway_session::{GatewayConfig, SessionRegistry};
//! use gateway_wire::{Intents, Message};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = SessionRegistry::new(GatewayConfig::default());
//!
//! registry
//!     .on("MESSAGE_CREATE")
//!     .parse_json::<Message>()
//!     .handle(|message: Message| async move {
//!         println!("{}: {}", message.author.unique_username(), message.content);
//!         Ok(())
//!     });
//!
//! registry.register("token", Intents::GUILD_MESSAGES | Intents::MESSAGE_CONTENT, "main")?;
//!
//! tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//! registry.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod config;
mod connection;
pub mod dispatcher;
pub mod error;
pub mod heartbeat;
pub mod ratelimit;
pub mod registry;
pub mod state;
pub mod transport;

// Re-export main types
pub use backoff::Backoff;
pub use config::{BackoffConfig, DelayRange, GatewayConfig, RateLimitConfig};
pub use dispatcher::{DispatchEvent, DispatchReport, EventDispatcher, HandlerBuilder, UnhandledBuilder};
pub use error::{FatalClose, GatewayError, HandlerError, Result};
pub use heartbeat::{HeartbeatAction, HeartbeatScheduler};
pub use ratelimit::RateLimiter;
pub use registry::SessionRegistry;
pub use state::{SessionSnapshot, SessionState};
pub use transport::{Connector, Transport, TransportMessage, WsConnector};
