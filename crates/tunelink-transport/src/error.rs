use std::path::PathBuf;

/// Errors raised while binding, accepting or connecting local sockets.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listening socket failed.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The path exists and is not a socket, so it was left alone.
    #[error("refusing to replace non-socket path {0}")]
    NotASocket(PathBuf),

    /// Connecting to a server socket failed.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No server answered within the connect deadline.
    #[error("timed out connecting to {0}")]
    ConnectTimeout(PathBuf),

    /// Accepting an incoming connection failed.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error on an established stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The path does not fit in `sockaddr_un.sun_path`.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },
}

impl TransportError {
    /// True when retrying the connect may succeed (server not up yet).
    pub fn is_retryable_connect(&self) -> bool {
        matches!(
            self,
            TransportError::Connect { source, .. }
                if matches!(
                    source.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
                )
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
