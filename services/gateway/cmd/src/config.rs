//! Configuration handling for the gateway service.
//!
//! The service reads a YAML file with the shared gateway settings and the
//! list of bot sessions to run, then applies environment variable overrides.

use crate::component_warn;
use anyhow::{bail, Context, Result};
use gateway_session::GatewayConfig;
use gateway_wire::Intents;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use tracing::info;

/// Gateway service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Settings shared by every session
    pub gateway: GatewayConfig,
    /// Intents for bots that do not list their own
    #[serde(deserialize_with = "intents_from_yaml")]
    pub default_intents: Intents,
    /// Sessions to register at startup
    pub bots: Vec<BotConfig>,
}

/// One bot session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Session alias
    pub alias: String,
    /// Token, inline
    pub token: Option<String>,
    /// Name of the environment variable holding the token
    pub token_env: Option<String>,
    /// Intents, as an integer or as `GUILDS | GUILD_MESSAGES`
    #[serde(deserialize_with = "optional_intents_from_yaml")]
    pub intents: Option<Intents>,
}

/// A bot with its token resolved
#[derive(Debug, Clone, PartialEq)]
pub struct BotSession {
    pub alias: String,
    pub token: String,
    pub intents: Intents,
}

impl ServiceConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<ServiceConfig>(&content) {
                Ok(loaded) => {
                    config = loaded;
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => component_warn!(
                    "config",
                    "Failed to parse config file {:?} ({}), using defaults",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => component_warn!(
                "config",
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides(|key| std::env::var(key).ok())?;

        info!(
            "Final gateway configuration: endpoint={}, bots={}, rate_limit={}/{:?}",
            config.gateway.endpoint(),
            config.bots.len(),
            config.gateway.rate_limit.max_sends,
            config.gateway.rate_limit.window
        );

        Ok(config)
    }

    /// Apply `GATEWAY_*` overrides read through `lookup`
    fn apply_environment_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("GATEWAY_URL") {
            info!("Gateway URL overridden by environment: {}", url);
            self.gateway.url = url;
        }

        if let Some(version) = lookup("GATEWAY_VERSION") {
            self.gateway.version = version
                .parse()
                .with_context(|| format!("GATEWAY_VERSION '{}' is not a version number", version))?;
            info!("Gateway version overridden by environment: {}", version);
        }

        if let Some(intents) = lookup("GATEWAY_INTENTS") {
            self.default_intents = parse_intents(&intents)?;
            info!("Default intents overridden by environment: {:#x}", self.default_intents.bits());
        }

        if let Some(token) = lookup("GATEWAY_TOKEN") {
            if self.bots.is_empty() {
                info!("Running a single session with the token from GATEWAY_TOKEN");
                self.bots.push(BotConfig::default());
            }
            for bot in self.bots.iter_mut() {
                if bot.token.is_none() && bot.token_env.is_none() {
                    bot.token = Some(token.clone());
                }
            }
        }

        Ok(())
    }

    /// Resolve every bot's token and intents
    pub fn sessions(&self) -> Result<Vec<BotSession>> {
        self.sessions_with(|key| std::env::var(key).ok())
    }

    fn sessions_with<F>(&self, lookup: F) -> Result<Vec<BotSession>>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.bots
            .iter()
            .map(|bot| {
                let token = match (&bot.token, &bot.token_env) {
                    (Some(token), _) => token.clone(),
                    (None, Some(var)) => lookup(var).with_context(|| {
                        format!("bot '{}': environment variable {} is not set", bot.alias, var)
                    })?,
                    (None, None) => bail!("bot '{}' has no token", bot.alias),
                };
                Ok(BotSession {
                    alias: bot.alias.clone(),
                    token,
                    intents: bot.intents.unwrap_or(self.default_intents),
                })
            })
            .collect()
    }
}

/// Parse intents written as an integer or as flag names joined by `|`
pub fn parse_intents(raw: &str) -> Result<Intents> {
    let raw = raw.trim();
    if let Ok(bits) = raw.parse::<u64>() {
        return Ok(Intents::from_bits_retain(bits));
    }
    bitflags::parser::from_str::<Intents>(raw)
        .map_err(|e| anyhow::anyhow!("invalid intents '{}': {}", raw, e))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawIntents {
    Bits(u64),
    Names(String),
}

impl RawIntents {
    fn resolve<E: serde::de::Error>(self) -> std::result::Result<Intents, E> {
        match self {
            RawIntents::Bits(bits) => Ok(Intents::from_bits_retain(bits)),
            RawIntents::Names(names) => parse_intents(&names).map_err(E::custom),
        }
    }
}

fn intents_from_yaml<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Intents, D::Error> {
    RawIntents::deserialize(deserializer)?.resolve()
}

fn optional_intents_from_yaml<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<Intents>, D::Error> {
    Option::<RawIntents>::deserialize(deserializer)?
        .map(RawIntents::resolve)
        .transpose()
}
