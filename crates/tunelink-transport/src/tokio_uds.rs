use std::path::Path;

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::uds::{SocketGuard, DEFAULT_SOCKET_MODE};

/// Tokio-backed listener with the same path handling as
/// [`UnixSocketListener`](crate::UnixSocketListener).
///
/// Binding registers with the reactor, so it must happen inside a runtime.
pub struct AsyncUnixListener {
    listener: UnixListener,
    guard: SocketGuard,
}

impl AsyncUnixListener {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, DEFAULT_SOCKET_MODE)
    }

    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = SocketGuard::prepare(path)?;
        let listener = UnixListener::bind(&path).map_err(|source| TransportError::Bind {
            path: path.clone(),
            source,
        })?;
        let guard = SocketGuard::adopt(path, mode)?;
        info!(path = ?guard.path(), "listening on unix domain socket");
        Ok(Self { listener, guard })
    }

    pub async fn accept(&self) -> Result<UnixStream> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(stream)
    }

    pub fn path(&self) -> &Path {
        self.guard.path()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn accepts_and_cleans_up() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("tl-async-{}-{nanos}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let sock_path = dir.join("a.sock");

        let listener = AsyncUnixListener::bind(&sock_path).expect("bind");
        let path = sock_path.clone();
        let client = tokio::spawn(async move {
            let mut stream = UnixStream::connect(&path).await.expect("connect");
            stream.write_all(b"ping").await.expect("write");
        });

        let mut stream = listener.accept().await.expect("accept");
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.expect("read");
        assert_eq!(&buf, b"ping");
        client.await.expect("client task");

        drop(listener);
        assert!(!sock_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
