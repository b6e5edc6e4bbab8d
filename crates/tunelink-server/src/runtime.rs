use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tunelink_transport::AsyncUnixListener;
use tunelink_value::Value;
use tunelink_wire::ids::{self, PROTOCOL_VERSION};
use tunelink_wire::Message;

use crate::command::{Args, Command, CommandContext, Reply};
use crate::config::ServerConfig;
use crate::courier::{self, Courier};
use crate::error::{CommandError, Result, ServerError};
use crate::peer::PeerHandle;
use crate::session;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

struct Inner {
    config: ServerConfig,
    peers: RwLock<HashMap<u32, Arc<PeerHandle>>>,
    commands: RwLock<HashMap<(u32, u32), Arc<dyn Command>>>,
    courier: Courier,
    next_client_id: AtomicU32,
    shutdown: CancellationToken,
}

/// The daemon: connected clients, the command table and the courier.
///
/// Cheap to clone; every clone refers to the same runtime. A runtime serves
/// once: after [`Runtime::shutdown`] it stops accepting for good.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    /// Create a runtime with the built-in MAIN and COURIER commands.
    pub fn new(config: ServerConfig) -> Self {
        let runtime = Self {
            inner: Arc::new(Inner {
                config,
                peers: RwLock::new(HashMap::new()),
                commands: RwLock::new(HashMap::new()),
                courier: Courier::new(),
                next_client_id: AtomicU32::new(1),
                shutdown: CancellationToken::new(),
            }),
        };
        runtime.register_command(ids::object::MAIN, ids::main::HELLO, hello);
        courier::register(&runtime);
        runtime
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Install a handler for `(object, command)`, replacing any previous one.
    pub fn register_command<F>(&self, object: u32, command: u32, handler: F)
    where
        F: Fn(&CommandContext<'_>, &Value) -> std::result::Result<Reply, CommandError>
            + Send
            + Sync
            + 'static,
    {
        self.register_handler(object, command, Arc::new(handler));
    }

    pub fn register_handler(&self, object: u32, command: u32, handler: Arc<dyn Command>) {
        debug!(object, command, "registering command");
        write(&self.inner.commands).insert((object, command), handler);
    }

    pub(crate) fn handler(
        &self,
        object: u32,
        command: u32,
    ) -> std::result::Result<Arc<dyn Command>, CommandError> {
        let commands = read(&self.inner.commands);
        if let Some(handler) = commands.get(&(object, command)) {
            return Ok(Arc::clone(handler));
        }
        if commands.keys().any(|(o, _)| *o == object) {
            Err(CommandError::new(format!(
                "unknown command {command} on object {object}"
            )))
        } else {
            Err(CommandError::new(format!("unknown object {object}")))
        }
    }

    pub fn courier(&self) -> &Courier {
        &self.inner.courier
    }

    pub fn peer(&self, client_id: u32) -> Option<Arc<PeerHandle>> {
        read(&self.inner.peers).get(&client_id).cloned()
    }

    /// Ids of every connected client, ascending.
    pub fn peer_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = read(&self.inner.peers).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn peers(&self) -> Vec<Arc<PeerHandle>> {
        read(&self.inner.peers).values().cloned().collect()
    }

    pub fn client_count(&self) -> usize {
        read(&self.inner.peers).len()
    }

    /// Queue a message for one client.
    pub fn send_to(&self, client_id: u32, message: Message) -> Result<()> {
        self.peer(client_id)
            .ok_or(ServerError::PeerNotFound(client_id))?
            .enqueue(message)
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub(crate) fn allocate_client_id(&self) -> u32 {
        self.inner.next_client_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_peer(&self, peer: Arc<PeerHandle>) {
        write(&self.inner.peers).insert(peer.id(), peer);
    }

    /// Purge a client from every registry and tell the others it left.
    pub(crate) fn disconnect(&self, client_id: u32) {
        if write(&self.inner.peers).remove(&client_id).is_none() {
            return;
        }
        info!(client_id, "client disconnected");
        self.inner.courier.on_disconnected(self, client_id);
        self.emit_broadcast(ids::signal::CLIENT_DISCONNECTED, &Value::from(client_id));
    }

    /// Bind the configured socket. Must be called inside a tokio runtime.
    pub fn bind(&self) -> Result<AsyncUnixListener> {
        let config = self.config();
        Ok(AsyncUnixListener::bind_with_mode(
            &config.socket_path,
            config.socket_mode,
        )?)
    }

    /// Accept and serve clients until [`Runtime::shutdown`], then cancel and
    /// join every session.
    pub async fn serve(&self, listener: AsyncUnixListener) -> Result<()> {
        let mut sessions = JoinSet::new();
        let shutdown = self.inner.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(stream) => {
                        let client_id = self.allocate_client_id();
                        let runtime = self.clone();
                        sessions.spawn(session::run(runtime, stream, client_id));
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(err) = joined {
                        warn!(error = %err, "session task failed");
                    }
                }
            }
        }

        info!(
            sessions = sessions.len(),
            path = ?listener.path(),
            "shutting down"
        );
        while let Some(joined) = sessions.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "session task failed");
            }
        }
        Ok(())
    }

    /// Bind and serve on a spawned task. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<RunningServer> {
        let listener = self.bind()?;
        let path = listener.path().to_path_buf();
        let runtime = self.clone();
        let task = tokio::spawn(async move { runtime.serve(listener).await });
        Ok(RunningServer {
            runtime: self.clone(),
            path,
            task,
        })
    }

    /// Stop accepting and end every session. Safe to call from any thread.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }
}

/// A runtime serving on a background task.
pub struct RunningServer {
    runtime: Runtime,
    path: PathBuf,
    task: JoinHandle<Result<()>>,
}

impl RunningServer {
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Shut the runtime down and wait for the serve task to finish.
    pub async fn shutdown(self) -> Result<()> {
        self.runtime.shutdown();
        self.task
            .await
            .map_err(|err| ServerError::Task(err.to_string()))?
    }
}

fn hello(ctx: &CommandContext<'_>, args: &Value) -> std::result::Result<Reply, CommandError> {
    let args = Args::parse(args, 2)?;
    let version = args.int(0)?;
    if version != PROTOCOL_VERSION {
        return Err(CommandError::new(format!(
            "protocol version mismatch (client {version}, server {PROTOCOL_VERSION})"
        )));
    }
    let name = args.str(1)?;
    ctx.peer.set_name(name);
    info!(client_id = ctx.client_id(), name, "client registered");
    Ok(Reply::Value(Value::from(ctx.client_id())))
}
