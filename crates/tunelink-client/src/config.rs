use std::time::Duration;

use tunelink_wire::{FrameConfig, DEFAULT_MAX_PAYLOAD};

/// Default time allowed for connecting and completing HELLO.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name announced to the server in HELLO.
    pub client_name: String,
    /// Largest payload sent or accepted.
    pub max_payload_size: usize,
    /// Budget for connect retries plus the handshake reply.
    pub connect_timeout: Duration,
    /// Limit on a blocked request write. The reader never times out, since
    /// a subscribed client may idle indefinitely.
    pub write_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: "tunelink-client".to_string(),
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: None,
        }
    }
}

impl ClientConfig {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
            ..Self::default()
        }
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub(crate) fn frame_config(&self) -> FrameConfig {
        FrameConfig::default()
            .with_max_payload_size(self.max_payload_size)
            .with_write_timeout(self.write_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_config_carries_limits_but_no_read_timeout() {
        let config = ClientConfig::new("player")
            .with_max_payload_size(1024)
            .with_write_timeout(Some(Duration::from_millis(250)));
        let frame = config.frame_config();
        assert_eq!(frame.max_payload_size, 1024);
        assert_eq!(frame.write_timeout, Some(Duration::from_millis(250)));
        assert_eq!(frame.read_timeout, None);
    }
}
