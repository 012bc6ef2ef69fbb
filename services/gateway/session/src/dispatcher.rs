//! Event handler registry and dispatch.
//!
//! Handlers are registered with a builder:
//!
//! ```rust,no_run
//! use gateway_session::EventDispatcher;
//! use gateway_wire::Message;
//!
//! let dispatcher = EventDispatcher::new();
//! dispatcher
//!     .on("MESSAGE_CREATE")
//!     .alias("main")
//!     .parse_json::<Message>()
//!     .handle(|message: Message| async move {
//!         println!("{}: {}", message.author.unique_username(), message.content);
//!         Ok(())
//!     });
//! ```
//!
//! Every registration whose alias filter and event name match an event is
//! invoked, in registration order. A failing parser, a handler error or a
//! handler panic is logged and does not stop the remaining handlers.

use crate::error::HandlerError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// Boxed parser error
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A decoded dispatch frame on its way to handlers
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchEvent {
    /// Session the event arrived on
    pub alias: String,
    /// Event name
    pub name: String,
    /// Sequence number of the frame
    pub sequence: Option<u64>,
    /// Undecoded data body
    pub data: Value,
}

type Invoker =
    Arc<dyn Fn(DispatchEvent) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

type Parser<T> = Arc<dyn Fn(Value) -> Result<T, BoxError> + Send + Sync>;

struct Registration {
    alias_filter: String,
    event_name: Option<String>,
    invoke: Invoker,
}

impl Registration {
    fn matches_alias(&self, alias: &str) -> bool {
        self.alias_filter.is_empty() || self.alias_filter == alias
    }
}

/// Outcome of dispatching one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers invoked
    pub invoked: usize,
    /// Handlers that failed
    pub failed: usize,
}

/// Handler registry shared by all sessions of a registry
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<Vec<Registration>>,
    unhandled: RwLock<Vec<Registration>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a registration for `event_name` (matched case-insensitively)
    pub fn on(&self, event_name: impl Into<String>) -> HandlerBuilder<'_, Value> {
        HandlerBuilder {
            dispatcher: self,
            event_name: event_name.into(),
            alias_filter: String::new(),
            parser: Arc::new(|data: Value| Ok(data)),
        }
    }

    /// Start a registration for events no named handler matched
    pub fn on_unhandled(&self) -> UnhandledBuilder<'_> {
        UnhandledBuilder {
            dispatcher: self,
            alias_filter: String::new(),
        }
    }

    /// Number of named registrations
    pub fn handler_count(&self) -> usize {
        self.handlers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn push(&self, registration: Registration) {
        let list = if registration.event_name.is_some() {
            &self.handlers
        } else {
            &self.unhandled
        };
        list.write()
            .unwrap_or_else(|e| e.into_inner())
            .push(registration);
    }

    fn matching(&self, event: &DispatchEvent) -> Vec<Invoker> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let named: Vec<Invoker> = handlers
            .iter()
            .filter(|r| r.matches_alias(&event.alias))
            .filter(|r| {
                r.event_name
                    .as_deref()
                    .is_some_and(|name| name.eq_ignore_ascii_case(&event.name))
            })
            .map(|r| r.invoke.clone())
            .collect();
        drop(handlers);

        if !named.is_empty() {
            return named;
        }

        self.unhandled
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.matches_alias(&event.alias))
            .map(|r| r.invoke.clone())
            .collect()
    }

    /// Run every matching handler for `event`, one after another
    pub async fn dispatch(&self, event: DispatchEvent) -> DispatchReport {
        let invokers = self.matching(&event);
        if invokers.is_empty() {
            trace!(alias = %event.alias, "No handler for {}, dropping", event.name);
            return DispatchReport::default();
        }

        let mut report = DispatchReport::default();
        for invoke in invokers {
            report.invoked += 1;
            if let Err(e) = invoke(event.clone()).await {
                report.failed += 1;
                error!(alias = %event.alias, "{}", e);
            }
        }
        report
    }

    /// Drain one session's dispatch queue until its sender is dropped.
    ///
    /// Events run one at a time in arrival order. The queue is unbounded, so
    /// a handler that hangs holds back every later event of the session while
    /// the backlog keeps growing in memory.
    pub async fn run_queue(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<DispatchEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        debug!("Dispatch queue closed");
    }
}

/// Builder for a named handler registration
pub struct HandlerBuilder<'a, T> {
    dispatcher: &'a EventDispatcher,
    event_name: String,
    alias_filter: String,
    parser: Parser<T>,
}

impl<'a, T: Send + 'static> HandlerBuilder<'a, T> {
    /// Only match events from this session (empty matches all sessions)
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias_filter = alias.into();
        self
    }

    /// Replace the parser applied to the data body before the handler runs
    pub fn parser<U, E, F>(self, parser: F) -> HandlerBuilder<'a, U>
    where
        F: Fn(Value) -> Result<U, E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        HandlerBuilder {
            dispatcher: self.dispatcher,
            event_name: self.event_name,
            alias_filter: self.alias_filter,
            parser: Arc::new(move |data| parser(data).map_err(Into::into)),
        }
    }

    /// Deserialize the data body into `U`
    pub fn parse_json<U: DeserializeOwned + Send + 'static>(self) -> HandlerBuilder<'a, U> {
        self.parser(serde_json::from_value::<U>)
    }

    /// Register `handler`
    pub fn handle<H, Fut>(self, handler: H)
    where
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let parser = self.parser;
        let handler = Arc::new(handler);
        let invoke: Invoker = Arc::new(move |event: DispatchEvent| {
            let parser = parser.clone();
            let handler = handler.clone();
            isolate(event.name.clone(), async move {
                let DispatchEvent { name, data, .. } = event;
                let value = parser(data).map_err(|e| HandlerError::Parse {
                    event: name.clone(),
                    message: e.to_string(),
                })?;
                handler(value)
                    .await
                    .map_err(|error| HandlerError::Failed { event: name, error })
            })
        });

        debug!(
            "Registered handler for {} (alias filter '{}')",
            self.event_name, self.alias_filter
        );
        self.dispatcher.push(Registration {
            alias_filter: self.alias_filter,
            event_name: Some(self.event_name),
            invoke,
        });
    }
}

/// Builder for a catch-all registration
pub struct UnhandledBuilder<'a> {
    dispatcher: &'a EventDispatcher,
    alias_filter: String,
}

impl UnhandledBuilder<'_> {
    /// Only match events from this session (empty matches all sessions)
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias_filter = alias.into();
        self
    }

    /// Register `handler`; it receives the whole event
    pub fn handle<H, Fut>(self, handler: H)
    where
        H: Fn(DispatchEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoke: Invoker = Arc::new(move |event: DispatchEvent| {
            let handler = handler.clone();
            isolate(event.name.clone(), async move {
                let name = event.name.clone();
                handler(event)
                    .await
                    .map_err(|error| HandlerError::Failed { event: name, error })
            })
        });

        self.dispatcher.push(Registration {
            alias_filter: self.alias_filter,
            event_name: None,
            invoke,
        });
    }
}

/// Turn a panic inside a handler into a [`HandlerError`]
fn isolate<F>(event: String, future: F) -> BoxFuture<'static, Result<(), HandlerError>>
where
    F: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async move {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Panicked { event }),
        }
    }
    .boxed()
}
