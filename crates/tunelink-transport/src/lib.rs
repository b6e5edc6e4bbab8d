//! Local socket transport for tunelink.
//!
//! Listeners remove a stale socket left at their path, harden the socket
//! mode (0600 by default) and remove the path again on drop only if it is
//! still the socket they created. Connections are plain blocking streams;
//! the `async` feature adds a tokio listener with the same path handling.

pub mod error;

#[cfg(unix)]
pub mod stream;
#[cfg(unix)]
pub mod uds;

#[cfg(all(unix, feature = "async"))]
pub mod tokio_uds;

pub use error::{Result, TransportError};

#[cfg(unix)]
pub use stream::SocketStream;
#[cfg(unix)]
pub use uds::{
    connect, connect_with_retry, default_socket_path, SocketGuard, UnixSocketListener,
    DEFAULT_SOCKET_MODE, MAX_PATH_LEN,
};

#[cfg(all(unix, feature = "async"))]
pub use tokio_uds::AsyncUnixListener;
