//! Settings types.
//!
//! All structs deserialize from camelCase JSON and fill missing fields from
//! their `Default` impls, so a settings file only needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierSettings {
    /// Server-side dispatch settings.
    pub server: ServerSettings,
    /// Client proxy settings.
    pub client: ClientSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Server-side dispatch settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Identifier passed to processing hooks.
    pub transport_id: String,
    /// Maximum response packets buffered per request before the handler
    /// stream is paused. `0` means unbounded.
    pub max_pending_responses: usize,
    /// Handlers running longer than this are logged at `warn`.
    pub slow_handler_warn_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            transport_id: "default".to_string(),
            max_pending_responses: 1024,
            slow_handler_warn_ms: 5_000,
        }
    }
}

impl ServerSettings {
    /// Slow-handler threshold as a [`Duration`].
    pub fn slow_handler_warn(&self) -> Duration {
        Duration::from_millis(self.slow_handler_warn_ms)
    }
}

/// Client proxy settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Per-item response deadline. `0` disables the deadline.
    pub request_timeout_ms: u64,
    /// Deadline for establishing the transport connection.
    pub connect_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 0,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ClientSettings {
    /// Request deadline, if one is configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// Connect deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}
