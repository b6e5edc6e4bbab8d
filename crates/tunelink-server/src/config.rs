use std::path::PathBuf;

use tunelink_transport::{default_socket_path, DEFAULT_SOCKET_MODE};
use tunelink_wire::DEFAULT_MAX_PAYLOAD;

/// Default bound of each client's outgoing queue, in messages.
pub const DEFAULT_OUTGOING_QUEUE: usize = 1024;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Filesystem path of the listening socket.
    pub socket_path: PathBuf,
    /// Permission bits applied to the socket file.
    pub socket_mode: u32,
    /// Largest payload accepted from or sent to a client.
    pub max_payload_size: usize,
    /// Messages buffered per client before it is dropped as too slow.
    pub outgoing_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            socket_mode: DEFAULT_SOCKET_MODE,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            outgoing_queue_capacity: DEFAULT_OUTGOING_QUEUE,
        }
    }
}

impl ServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Self::default()
        }
    }

    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_socket_mode(mut self, mode: u32) -> Self {
        self.socket_mode = mode;
        self
    }

    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Zero is raised to one; a bounded channel needs room for a message.
    pub fn with_outgoing_queue_capacity(mut self, capacity: usize) -> Self {
        self.outgoing_queue_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let cfg = ServerConfig::new("/tmp/tl.sock")
            .with_socket_mode(0o660)
            .with_max_payload_size(1024)
            .with_outgoing_queue_capacity(0);
        assert_eq!(cfg.socket_path, PathBuf::from("/tmp/tl.sock"));
        assert_eq!(cfg.socket_mode, 0o660);
        assert_eq!(cfg.max_payload_size, 1024);
        assert_eq!(cfg.outgoing_queue_capacity, 1);
        assert_eq!(ServerConfig::default().socket_mode, 0o600);
    }
}
