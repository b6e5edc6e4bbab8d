use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::SocketStream;

/// Default permission mode for created socket paths.
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

/// `sockaddr_un.sun_path` capacity.
#[cfg(target_os = "linux")]
pub const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
pub const MAX_PATH_LEN: usize = 104;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Per-user socket path used when none is configured: `<tmp>/tunelink-ipc-<user>`.
pub fn default_socket_path() -> PathBuf {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_else(|_| "nobody".to_string());
    std::env::temp_dir().join(format!("tunelink-ipc-{user}"))
}

fn bind_error(path: &Path) -> impl FnOnce(std::io::Error) -> TransportError + '_ {
    move |source| TransportError::Bind {
        path: path.to_path_buf(),
        source,
    }
}

/// Ownership of a bound socket path.
///
/// Dropping the guard removes the path, but only while it is still the
/// socket this process created (same device and inode).
#[derive(Debug)]
pub struct SocketGuard {
    path: PathBuf,
    identity: Option<(u64, u64)>,
}

impl SocketGuard {
    /// Validate `path` and clear a stale socket left behind at it.
    ///
    /// Anything at `path` that is not a socket is left untouched and reported.
    pub fn prepare(path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref().to_path_buf();
        let len = path.as_os_str().len();
        if len >= MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len,
                max: MAX_PATH_LEN,
            });
        }

        match std::fs::symlink_metadata(&path) {
            Ok(metadata) if metadata.file_type().is_socket() => {
                debug!(?path, "removing stale socket");
                std::fs::remove_file(&path).map_err(bind_error(&path))?;
            }
            Ok(_) => return Err(TransportError::NotASocket(path)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_error(&path)(e)),
        }
        Ok(path)
    }

    /// Apply `mode` to a freshly bound socket and take ownership of it.
    pub fn adopt(path: PathBuf, mode: u32) -> Result<Self> {
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_error(&path))?;
        let metadata = std::fs::symlink_metadata(&path).map_err(bind_error(&path))?;
        Ok(Self {
            identity: Some((metadata.dev(), metadata.ino())),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        let Some((dev, ino)) = self.identity else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() && metadata.dev() == dev && metadata.ino() == ino {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

/// Blocking Unix domain socket listener.
pub struct UnixSocketListener {
    listener: UnixListener,
    guard: SocketGuard,
}

impl UnixSocketListener {
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        Self::bind_with_mode(path, DEFAULT_SOCKET_MODE)
    }

    pub fn bind_with_mode(path: impl AsRef<Path>, mode: u32) -> Result<Self> {
        let path = SocketGuard::prepare(path)?;
        let listener = UnixListener::bind(&path).map_err(bind_error(&path))?;
        let guard = SocketGuard::adopt(path, mode)?;
        info!(path = ?guard.path(), "listening on unix domain socket");
        Ok(Self { listener, guard })
    }

    pub fn accept(&self) -> Result<SocketStream> {
        let (stream, _addr) = self.listener.accept().map_err(TransportError::Accept)?;
        debug!("accepted connection");
        Ok(SocketStream::from_unix(stream))
    }

    pub fn path(&self) -> &Path {
        self.guard.path()
    }

    /// Split into the std listener and the path guard.
    pub fn into_parts(self) -> (UnixListener, SocketGuard) {
        (self.listener, self.guard)
    }
}

/// Connect to a listening socket.
pub fn connect(path: impl AsRef<Path>) -> Result<SocketStream> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(?path, "connected to unix domain socket");
    Ok(SocketStream::from_unix(stream))
}

/// Connect, retrying while the socket is missing or refusing, until `timeout`
/// has elapsed. Other failures return immediately.
pub fn connect_with_retry(path: impl AsRef<Path>, timeout: Duration) -> Result<SocketStream> {
    let path = path.as_ref();
    let deadline = Instant::now() + timeout;
    loop {
        match connect(path) {
            Ok(stream) => return Ok(stream),
            Err(err) if err.is_retryable_connect() => {
                if Instant::now() >= deadline {
                    return Err(TransportError::ConnectTimeout(path.to_path_buf()));
                }
                std::thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn temp_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("tl-{tag}-{}-{nanos}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn bind_accept_connect_and_cleanup() {
        let dir = temp_dir("uds");
        let sock_path = dir.join("t.sock");

        let listener = UnixSocketListener::bind(&sock_path).expect("bind");
        assert!(sock_path.exists());

        let path = sock_path.clone();
        let client = std::thread::spawn(move || {
            let mut stream = connect(&path).expect("connect");
            stream.write_all(b"hello").expect("write");
        });

        let mut server = listener.accept().expect("accept");
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"hello");
        client.join().expect("client thread");

        drop(listener);
        assert!(!sock_path.exists(), "socket should be removed on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn path_too_long_is_rejected() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        assert!(matches!(
            UnixSocketListener::bind(&long_path),
            Err(TransportError::PathTooLong { .. })
        ));
    }

    #[test]
    fn default_mode_is_owner_only() {
        let dir = temp_dir("mode");
        let sock_path = dir.join("m.sock");
        let listener = UnixSocketListener::bind(&sock_path).expect("bind");
        let mode = std::fs::metadata(&sock_path)
            .expect("metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_socket_is_replaced_but_regular_file_is_not() {
        let dir = temp_dir("stale");
        let sock_path = dir.join("s.sock");
        let (std_listener, guard) = UnixSocketListener::bind(&sock_path)
            .expect("first bind")
            .into_parts();
        std::mem::forget(guard);
        drop(std_listener);
        assert!(sock_path.exists(), "stale socket left behind");

        let listener = UnixSocketListener::bind(&sock_path).expect("rebind over stale socket");
        drop(listener);

        let file_path = dir.join("plain.sock");
        std::fs::write(&file_path, b"regular").expect("write file");
        assert!(matches!(
            UnixSocketListener::bind(&file_path),
            Err(TransportError::NotASocket(_))
        ));
        assert!(file_path.exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn replaced_path_survives_drop() {
        let dir = temp_dir("race");
        let sock_path = dir.join("r.sock");
        let listener = UnixSocketListener::bind(&sock_path).expect("bind");

        std::fs::remove_file(&sock_path).expect("remove");
        std::fs::write(&sock_path, b"replacement").expect("replace");

        drop(listener);
        assert!(sock_path.exists(), "foreign file must not be removed");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_with_retry_times_out() {
        let dir = temp_dir("retry");
        let err = connect_with_retry(dir.join("absent.sock"), Duration::from_millis(60))
            .expect_err("nothing listening");
        assert!(matches!(err, TransportError::ConnectTimeout(_)));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn connect_with_retry_waits_for_late_bind() {
        let dir = temp_dir("late");
        let sock_path = dir.join("l.sock");
        let path = sock_path.clone();
        let server = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            let listener = UnixSocketListener::bind(&path).expect("bind");
            listener.accept().expect("accept");
        });
        connect_with_retry(&sock_path, Duration::from_secs(2)).expect("connect after retry");
        server.join().expect("server thread");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
