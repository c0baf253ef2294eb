use std::time::Duration;

use serde::Deserialize;
use sutantra_common::models::ClientRole;

use crate::error::SessionError;
use crate::supervisor::RetryPolicy;

pub const DEFAULT_NODE_URL: &str = "ws://localhost:8080/ws";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionConfigInput {
    pub node_url: Option<String>,
    pub role: Option<String>,
    pub connect_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub liveness_interval_ms: Option<u64>,
    pub keepalive: Option<bool>,
    pub stats_interval_ms: Option<u64>,
    pub stats_smoothing: Option<f64>,
    pub reconnect: ReconnectConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReconnectConfigInput {
    pub enabled: Option<bool>,
    pub strategy: Option<String>,
    pub interval_ms: Option<u64>,
    pub max_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub policy: RetryPolicy,
    /// `None` retries until an explicit disconnect.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            policy: RetryPolicy::Fixed(Duration::from_secs(10)),
            max_attempts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub node_url: String,
    pub role: ClientRole,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub liveness_interval: Duration,
    pub keepalive: bool,
    pub stats_interval: Duration,
    /// EWMA weight of the newest throughput sample, in (0, 1].
    pub stats_smoothing: Option<f64>,
    pub reconnect: ReconnectConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            node_url: DEFAULT_NODE_URL.into(),
            role: ClientRole::Viewer,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            liveness_interval: Duration::from_secs(10),
            keepalive: true,
            stats_interval: Duration::from_secs(1),
            stats_smoothing: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn millis(name: &str, value: Option<u64>, default: Duration) -> Result<Duration, String> {
    match value {
        None => Ok(default),
        Some(0) => Err(format!("{name} must be greater than zero")),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}

impl ReconnectConfigInput {
    pub fn resolve(self) -> Result<ReconnectConfig, String> {
        let defaults = ReconnectConfig::default();
        let interval = millis(
            "reconnect.interval_ms",
            self.interval_ms,
            Duration::from_secs(10),
        )?;
        let policy = match self.strategy.as_deref().map(str::trim) {
            None | Some("") | Some("fixed") => RetryPolicy::Fixed(interval),
            Some("exponential") => {
                let max = millis(
                    "reconnect.max_interval_ms",
                    self.max_interval_ms,
                    Duration::from_secs(60),
                )?;
                if max < interval {
                    return Err("reconnect.max_interval_ms is below reconnect.interval_ms".into());
                }
                RetryPolicy::Exponential { base: interval, max }
            }
            Some(other) => return Err(format!("unknown reconnect strategy: {other}")),
        };
        if self.max_attempts == Some(0) {
            return Err("reconnect.max_attempts must be greater than zero".into());
        }
        Ok(ReconnectConfig {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            policy,
            max_attempts: self.max_attempts,
        })
    }
}

impl SessionConfigInput {
    pub fn resolve(self) -> Result<SessionConfig, String> {
        let defaults = SessionConfig::default();

        let node_url = match self.node_url {
            Some(url) => {
                let url = url.trim().to_string();
                if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                    return Err(format!("node_url must be a ws:// or wss:// URL: {url}"));
                }
                url
            }
            None => defaults.node_url,
        };

        let role = match self.role {
            Some(r) => r.parse()?,
            None => defaults.role,
        };

        if let Some(alpha) = self.stats_smoothing {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(format!("stats_smoothing must be in (0, 1]: {alpha}"));
            }
        }

        Ok(SessionConfig {
            node_url,
            role,
            connect_timeout: millis(
                "connect_timeout_ms",
                self.connect_timeout_ms,
                defaults.connect_timeout,
            )?,
            handshake_timeout: millis(
                "handshake_timeout_ms",
                self.handshake_timeout_ms,
                defaults.handshake_timeout,
            )?,
            request_timeout: millis(
                "request_timeout_ms",
                self.request_timeout_ms,
                defaults.request_timeout,
            )?,
            liveness_interval: millis(
                "liveness_interval_ms",
                self.liveness_interval_ms,
                defaults.liveness_interval,
            )?,
            keepalive: self.keepalive.unwrap_or(defaults.keepalive),
            stats_interval: millis(
                "stats_interval_ms",
                self.stats_interval_ms,
                defaults.stats_interval,
            )?,
            stats_smoothing: self.stats_smoothing,
            reconnect: self.reconnect.resolve()?,
        })
    }
}

impl SessionConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, SessionError> {
        if input.trim().is_empty() {
            return Ok(SessionConfig::default());
        }
        let parsed: SessionConfigInput = toml::from_str(input)
            .map_err(|e| SessionError::Config(format!("Invalid config TOML: {}", e)))?;
        parsed.resolve().map_err(SessionError::Config)
    }

    /// Defaults pointed at `node_url` with the given role.
    pub fn for_node(node_url: impl Into<String>, role: ClientRole) -> Self {
        Self {
            node_url: node_url.into(),
            role,
            ..Self::default()
        }
    }
}
