//! Gateway session configuration.
//!
//! Durations are written as humantime strings (`"30s"`, `"250ms"`) when the
//! configuration comes from a file.

use gateway_wire::{ClosePolicy, ConnectionProperties, DEFAULT_GATEWAY_URL, GATEWAY_VERSION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration shared by every session of a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway endpoint without the version query
    pub url: String,
    /// Protocol version
    pub version: u8,
    /// Payload encoding (only json is supported)
    pub encoding: String,
    /// Outbound send quota
    pub rate_limit: RateLimitConfig,
    /// Reconnect delay bounds
    pub backoff: BackoffConfig,
    /// Upper bound for opening a transport
    #[serde(with = "humantime_duration")]
    pub connect_timeout: Duration,
    /// Consecutive connect failures after which the failure is reported
    pub connect_retry_budget: u32,
    /// Upper bound for receiving Hello after connecting
    #[serde(with = "humantime_duration")]
    pub hello_timeout: Duration,
    /// Delay before re-handshaking after an InvalidSession frame
    pub invalid_session_delay: DelayRange,
    /// Properties sent with Identify
    pub properties: ConnectionProperties,
    /// Close code classification
    pub close_policy: ClosePolicy,
    /// Largest frame accepted or sent
    pub max_frame_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_GATEWAY_URL.to_string(),
            version: GATEWAY_VERSION,
            encoding: "json".to_string(),
            rate_limit: RateLimitConfig::default(),
            backoff: BackoffConfig::default(),
            connect_timeout: Duration::from_secs(30),
            connect_retry_budget: 5,
            hello_timeout: Duration::from_secs(30),
            invalid_session_delay: DelayRange {
                min: Duration::from_secs(1),
                max: Duration::from_secs(5),
            },
            properties: ConnectionProperties::default(),
            close_policy: ClosePolicy::default(),
            max_frame_size: gateway_wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl GatewayConfig {
    /// Full endpoint including version and encoding
    pub fn endpoint(&self) -> String {
        gateway_wire::gateway_url(&self.url, self.version, &self.encoding)
    }
}

/// Send quota: `max_sends` per rolling `window`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sends allowed per window
    pub max_sends: u32,
    /// Window length
    #[serde(with = "humantime_duration")]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_sends: 120,
            window: Duration::from_secs(60),
        }
    }
}

/// Exponential backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First delay, and the delay after every successful handshake
    #[serde(with = "humantime_duration")]
    pub floor: Duration,
    /// Largest delay
    #[serde(with = "humantime_duration")]
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

/// Uniformly drawn delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    /// Lower bound
    #[serde(with = "humantime_duration")]
    pub min: Duration,
    /// Upper bound
    #[serde(with = "humantime_duration")]
    pub max: Duration,
}

impl DelayRange {
    /// Draw a delay in `[min, max]`
    pub fn sample(&self) -> Duration {
        use rand::Rng;

        if self.max <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.endpoint(), "wss://gateway.discord.gg/?v=10&encoding=json");
        assert_eq!(config.rate_limit.max_sends, 120);
        assert_eq!(config.rate_limit.window, Duration::from_secs(60));
        assert_eq!(config.backoff.floor, Duration::from_secs(1));
    }

    #[test]
    fn test_partial_config_from_json() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{
                "url": "wss://gateway.example",
                "rate_limit": { "max_sends": 10, "window": "5s" },
                "backoff": { "cap": "2m" },
                "hello_timeout": "250ms"
            }"#,
        )
        .unwrap();

        assert_eq!(config.endpoint(), "wss://gateway.example/?v=10&encoding=json");
        assert_eq!(config.rate_limit.max_sends, 10);
        assert_eq!(config.rate_limit.window, Duration::from_secs(5));
        assert_eq!(config.backoff.floor, Duration::from_secs(1));
        assert_eq!(config.backoff.cap, Duration::from_secs(120));
        assert_eq!(config.hello_timeout, Duration::from_millis(250));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let result: Result<GatewayConfig, _> =
            serde_json::from_str(r#"{ "connect_timeout": "soon" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_delay_range_sample() {
        let range = DelayRange {
            min: Duration::from_millis(10),
            max: Duration::from_millis(20),
        };
        for _ in 0..100 {
            let delay = range.sample();
            assert!(delay >= range.min && delay <= range.max);
        }

        let fixed = DelayRange {
            min: Duration::from_millis(5),
            max: Duration::from_millis(5),
        };
        assert_eq!(fixed.sample(), Duration::from_millis(5));
    }
}
