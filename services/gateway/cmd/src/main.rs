//! Gateway session service binary.
//!
//! Loads the service configuration, registers one gateway session per
//! configured bot and logs the events they receive until interrupted.

use clap::Parser;
use gateway_session::{DispatchEvent, SessionRegistry, SessionSnapshot};
use gateway_wire::{GatewayEvent, Message};
use std::path::PathBuf;
use tracing::info;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::ServiceConfig;
use logging::GatewayLogFormatter;

/// Gateway session service
#[derive(Parser, Debug)]
#[command(name = "redb-gateway", version, about = "Keeps gateway bot sessions connected")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Gateway endpoint, overrides the configuration file
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("redb_gateway={}", args.log_level).parse()?)
        .add_directive(format!("gateway_session={}", args.log_level).parse()?)
        .add_directive(format!("gateway_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .event_format(GatewayLogFormatter::new("gateway"))
        .init();

    info!("Starting reDB Gateway Service v{}", env!("CARGO_PKG_VERSION"));

    let mut service_config = ServiceConfig::load_from_file(&args.config)?;
    if let Some(url) = args.url {
        info!("Gateway URL overridden by command line: {}", url);
        service_config.gateway.url = url;
    }

    let sessions = service_config.sessions()?;
    if sessions.is_empty() {
        anyhow::bail!(
            "no bots configured; list them under 'bots' in {:?} or set GATEWAY_TOKEN",
            args.config
        );
    }

    let registry = SessionRegistry::new(service_config.gateway);
    register_handlers(&registry);

    for session in sessions {
        component_info!(
            "registry",
            "Registering session '{}' with intents {:#x}",
            session.alias,
            session.intents.bits()
        );
        registry.register(session.token, session.intents, session.alias.clone())?;
        let snapshots = registry.subscribe(&session.alias)?;
        report_fatal_close(session.alias, snapshots);
    }

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, stopping sessions");

    registry.shutdown().await;
    info!("Gateway service stopped");
    Ok(())
}

/// Log a session's fatal close when it happens; the session is not retried
fn report_fatal_close(alias: String, mut snapshots: watch::Receiver<SessionSnapshot>) {
    tokio::spawn(async move {
        if let Ok(snapshot) = snapshots.wait_for(|s| s.error.is_some()).await {
            if let Some(fatal) = &snapshot.error {
                component_error!("registry", "Session '{}' gave up: {}", alias, fatal);
            }
        }
    });
}

/// Log what the sessions receive
fn register_handlers(registry: &SessionRegistry) {
    registry
        .on("MESSAGE_CREATE")
        .parse_json::<Message>()
        .handle(|message: Message| async move {
            let place = if message.is_direct() { "direct" } else { "guild" };
            component_info!(
                "events",
                "[{}] {}: {}",
                place,
                message.author.unique_username(),
                message.content
            );
            Ok(())
        });

    registry
        .on("READY")
        .parser(|data| GatewayEvent::parse("READY", data))
        .handle(|event: GatewayEvent| async move {
            if let GatewayEvent::Ready(ready) = event {
                let user = ready
                    .user
                    .map(|user| user.unique_username())
                    .unwrap_or_default();
                component_info!("events", "Logged in as {} (session {})", user, ready.session_id);
            }
            Ok(())
        });

    registry.on_unhandled().handle(|event: DispatchEvent| async move {
        tracing::debug!(alias = %event.alias, "Unhandled {} (sequence {:?})", event.name, event.sequence);
        Ok(())
    });
}
