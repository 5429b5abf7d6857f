//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every struct is `#[serde(default)]`, so
//! a settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskcastSettings {
    /// Listener, connection limits and heartbeats.
    pub server: ServerSettings,
    /// Subscriber level and format.
    pub logging: LoggingSettings,
}

impl TaskcastSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        let at_least_one = |key| SettingsError::OutOfRange { key, reason: "must be at least 1" };
        if server.host.trim().is_empty() {
            return Err(SettingsError::OutOfRange { key: "host", reason: "must not be empty" });
        }
        if server.max_connections == 0 {
            return Err(at_least_one("maxConnections"));
        }
        if server.send_queue_capacity == 0 {
            return Err(at_least_one("sendQueueCapacity"));
        }
        if server.heartbeat_interval_secs == 0 {
            return Err(at_least_one("heartbeatIntervalSecs"));
        }
        if server.heartbeat_timeout_secs <= server.heartbeat_interval_secs {
            return Err(SettingsError::HeartbeatWindow {
                interval_secs: server.heartbeat_interval_secs,
                timeout_secs: server.heartbeat_timeout_secs,
            });
        }
        Ok(())
    }
}

/// Network and connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port; `0` picks a free one.
    pub port: u16,
    /// Concurrent WebSocket connections before upgrades are refused.
    pub max_connections: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a client is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Outbound frames queued per connection before sends wait.
    pub send_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 1024,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 16 * 1024 * 1024,
            send_queue_capacity: 256,
        }
    }
}

/// Log verbosity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-frame detail.
    Trace,
    /// Subscribe, broadcast and routing decisions.
    Debug,
    /// Lifecycle events.
    #[default]
    Info,
    /// Dropped frames and refused requests.
    Warn,
    /// Failures only.
    Error,
}

impl LogLevel {
    /// Convert to a tracing filter string.
    pub fn as_filter_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Parse a level name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: LogLevel,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
}
