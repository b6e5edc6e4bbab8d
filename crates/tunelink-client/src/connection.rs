use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, trace, warn};
use tunelink_transport::{connect_with_retry, SocketStream};
use tunelink_value::{List, Value};
use tunelink_wire::ids::{main, object, signal_cmd, PROTOCOL_VERSION};
use tunelink_wire::{FrameError, FrameReader, FrameWriter, Message};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::result::{lock, CallResult, ResultClass, ResultInner};

#[derive(Default)]
struct Registry {
    results: HashMap<u32, Arc<ResultInner>>,
    /// Set once the reader stops; later requests fail immediately.
    closed: Option<String>,
}

/// State shared by the connection handle, its reader thread and results.
pub(crate) struct Shared {
    writer: Mutex<FrameWriter<SocketStream>>,
    stream: SocketStream,
    next_cookie: AtomicU32,
    registry: Mutex<Registry>,
}

impl Shared {
    pub(crate) fn next_cookie(&self) -> u32 {
        loop {
            let cookie = self.next_cookie.fetch_add(1, Ordering::Relaxed);
            if cookie != 0 {
                return cookie;
            }
        }
    }

    /// Write `message`, first registering `result` under its cookie so the
    /// answer cannot outrun the registration.
    pub(crate) fn send(&self, message: Message, result: Option<Arc<ResultInner>>) -> Result<()> {
        {
            let mut registry = lock(&self.registry);
            if let Some(reason) = &registry.closed {
                return Err(ClientError::Disconnected(reason.clone()));
            }
            if let Some(result) = result {
                registry.results.insert(message.cookie, result);
            }
        }
        trace!(
            object = message.object,
            command = message.command,
            cookie = message.cookie,
            "send"
        );
        let written = lock(&self.writer).write_message(&message);
        if let Err(err) = written {
            self.forget(message.cookie);
            return Err(err.into());
        }
        Ok(())
    }

    pub(crate) fn forget(&self, cookie: u32) {
        lock(&self.registry).results.remove(&cookie);
    }

    fn route(self: &Arc<Self>, message: Message) {
        let result = {
            let mut registry = lock(&self.registry);
            let found = registry.results.get(&message.cookie).cloned();
            if let Some(result) = &found {
                if result.class() != ResultClass::Broadcast {
                    registry.results.remove(&message.cookie);
                }
            }
            found
        };
        match result {
            Some(result) => result.deliver(self, message.payload),
            None => debug!(cookie = message.cookie, "no result waiting for cookie"),
        }
    }

    fn close(&self, reason: &str) {
        let orphaned: Vec<Arc<ResultInner>> = {
            let mut registry = lock(&self.registry);
            registry.closed = Some(reason.to_string());
            registry.results.drain().map(|(_, result)| result).collect()
        };
        for result in orphaned {
            result.fail(reason);
        }
    }
}

fn read_loop(shared: Arc<Shared>, mut reader: FrameReader<SocketStream>) {
    let reason = loop {
        match reader.read_message() {
            Ok(message) => shared.route(message),
            Err(FrameError::ConnectionClosed) => break "connection closed".to_string(),
            Err(err) => break err.to_string(),
        }
    };
    debug!(reason, "reader stopped");
    shared.close(&reason);
}

/// A blocking connection to a tunelink server.
///
/// Answers are read on a background thread and handed to the matching
/// [`CallResult`]; notifiers run on that thread.
pub struct Connection {
    shared: Arc<Shared>,
    client_id: u32,
    config: ClientConfig,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Connect to `path` and complete the HELLO handshake.
    pub fn connect(path: impl AsRef<Path>, config: ClientConfig) -> Result<Self> {
        let path = path.as_ref();
        let stream = connect_with_retry(path, config.connect_timeout)?;
        let frame_config = config.frame_config();
        let reader = FrameReader::for_socket(stream.try_clone()?, frame_config.clone())?;
        let writer = FrameWriter::for_socket(stream.try_clone()?, frame_config)?;

        let shared = Arc::new(Shared {
            writer: Mutex::new(writer),
            stream,
            next_cookie: AtomicU32::new(1),
            registry: Mutex::new(Registry::default()),
        });
        let reader_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("tunelink-reader".to_string())
            .spawn(move || read_loop(reader_shared, reader))
            .map_err(FrameError::Io)?;

        let mut conn = Self {
            shared,
            client_id: 0,
            config,
            reader: Mutex::new(Some(handle)),
        };

        let hello = conn.call(
            object::MAIN,
            main::HELLO,
            Value::list(List::from_values([
                Value::int(PROTOCOL_VERSION),
                Value::from(conn.config.client_name.as_str()),
            ])),
        )?;
        let reply = hello
            .wait_timeout(conn.config.connect_timeout)
            .ok_or(ClientError::Timeout(conn.config.connect_timeout))?;
        if let Ok(message) = reply.as_error() {
            return Err(ClientError::Handshake(message.to_string()));
        }
        conn.client_id = u32::try_from(reply.as_int()?)
            .map_err(|_| ClientError::Handshake(format!("invalid client id {reply}")))?;

        info!(
            client_id = conn.client_id,
            path = %path.display(),
            "connected"
        );
        Ok(conn)
    }

    /// Id the server assigned in HELLO.
    pub fn client_id(&self) -> u32 {
        self.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.registry).closed.is_none()
    }

    /// Send a request and return its single answer.
    pub fn call(&self, object: u32, command: u32, args: Value) -> Result<CallResult> {
        self.request(object, command, args, ResultClass::Default, false, None)
    }

    pub(crate) fn request(
        &self,
        object: u32,
        command: u32,
        args: Value,
        class: ResultClass,
        c2c: bool,
        signal: Option<u32>,
    ) -> Result<CallResult> {
        let cookie = self.shared.next_cookie();
        let inner = ResultInner::new(&self.shared, class, c2c, signal, cookie);
        self.shared.send(
            Message::new(object, command, cookie, args),
            Some(Arc::clone(&inner)),
        )?;
        Ok(CallResult::new(inner))
    }

    pub(crate) fn subscribe(
        &self,
        class: ResultClass,
        signal: u32,
        c2c: bool,
    ) -> Result<CallResult> {
        let command = match class {
            ResultClass::Broadcast => signal_cmd::BROADCAST,
            _ => signal_cmd::SIGNAL,
        };
        self.request(
            object::SIGNAL,
            command,
            signal_args(signal),
            class,
            c2c,
            Some(signal),
        )
    }

    /// Single-shot interest in `signal`. The result re-registers itself
    /// after each delivery while a notifier stays attached.
    pub fn signal(&self, signal: u32) -> Result<CallResult> {
        self.subscribe(ResultClass::Signal, signal, false)
    }

    /// Repeating interest in `signal`.
    pub fn broadcast(&self, signal: u32) -> Result<CallResult> {
        self.subscribe(ResultClass::Broadcast, signal, false)
    }

    /// Drop every server-side registration for `signal`.
    pub fn unregister(&self, signal: u32) -> Result<CallResult> {
        self.call(object::SIGNAL, signal_cmd::UNREGISTER, signal_args(signal))
    }

    /// Close the socket and stop the reader. Pending results receive an
    /// Error value.
    pub fn disconnect(&self) {
        if let Err(err) = self.shared.stream.shutdown() {
            warn!(error = %err, "socket shutdown failed");
        }
        let handle = lock(&self.reader).take();
        if let Some(handle) = handle {
            // A notifier may drop the last handle from the reader thread.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("reader thread panicked");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("client_id", &self.client_id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn signal_args(signal: u32) -> Value {
    Value::list(List::from_ints([i64::from(signal)]))
}
