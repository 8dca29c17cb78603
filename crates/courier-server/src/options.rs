//! Server options and transport option lookup.

use std::time::Duration;

use courier_settings::ServerSettings;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Runtime options for a [`Server`](crate::Server).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerOptions {
    /// Identifier passed to processing hooks.
    pub transport_id: String,
    /// Per-request bound on buffered response frames. `0` = unbounded.
    pub max_pending_responses: usize,
    /// Handlers running longer than this are logged at `warn`.
    pub slow_handler_warn: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

impl From<&ServerSettings> for ServerOptions {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            transport_id: settings.transport_id.clone(),
            max_pending_responses: settings.max_pending_responses,
            slow_handler_warn: settings.slow_handler_warn(),
        }
    }
}

/// Read `key` from a transport options object, falling back to `default`.
///
/// Missing keys, non-object options and values of the wrong shape all yield
/// `default`.
pub fn options_prop<T: DeserializeOwned>(options: &Value, key: &str, default: T) -> T {
    options
        .get(key)
        .and_then(|value| T::deserialize(value).ok())
        .unwrap_or(default)
}
