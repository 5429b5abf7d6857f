//! Settings errors.
//!
//! File errors carry the path that was being loaded, so a bad `--config`
//! points at itself. Validation errors name the offending camelCase key.

use std::path::PathBuf;

use thiserror::Error;

/// Why a settings file could not become a runnable [`crate::TaskcastSettings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("cannot read settings file {}: {source}", .path.display())]
    Read {
        /// File being loaded.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not JSON, or a key holds the wrong type.
    #[error("malformed settings file {}: {source}", .path.display())]
    Malformed {
        /// File being loaded.
        path: PathBuf,
        /// Parse failure, with line and column.
        #[source]
        source: serde_json::Error,
    },

    /// A server key is outside what the broker can run with.
    #[error("server.{key} {reason}")]
    OutOfRange {
        /// camelCase key under `server`.
        key: &'static str,
        /// What the value must be.
        reason: &'static str,
    },

    /// The heartbeat timeout would expire before a second ping goes out.
    #[error(
        "server.heartbeatTimeoutSecs ({timeout_secs}) must exceed heartbeatIntervalSecs ({interval_secs})"
    )]
    HeartbeatWindow {
        /// Seconds between pings.
        interval_secs: u64,
        /// Seconds of silence tolerated.
        timeout_secs: u64,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
