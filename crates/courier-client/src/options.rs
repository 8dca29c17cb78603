//! Client proxy options.

use std::time::Duration;

use courier_settings::ClientSettings;

/// Runtime options for a [`ClientProxy`](crate::ClientProxy).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Per-item response deadline applied by [`send`](crate::ClientProxy::send).
    pub request_timeout: Option<Duration>,
    /// Deadline for [`ClientTransport::connect`](crate::ClientTransport::connect).
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ClientOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            request_timeout: settings.request_timeout(),
            connect_timeout: settings.connect_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.request_timeout, None);
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let settings = ClientSettings {
            request_timeout_ms: 0,
            connect_timeout_ms: 50,
        };
        let options = ClientOptions::from(&settings);
        assert!(options.request_timeout.is_none());
        assert_eq!(options.connect_timeout, Duration::from_millis(50));

        let settings = ClientSettings {
            request_timeout_ms: 1_500,
            ..settings
        };
        assert_eq!(
            ClientOptions::from(&settings).request_timeout,
            Some(Duration::from_millis(1_500))
        );
    }
}
