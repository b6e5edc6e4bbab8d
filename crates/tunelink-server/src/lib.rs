//! Async tunelink daemon.
//!
//! A [`Runtime`] owns every connected client, the command table and the
//! courier. Each accepted connection runs as one session task: frames are
//! dispatched in order, replies and event deliveries flow through a bounded
//! per-client queue.
//!
//! ```no_run
//! # async fn demo() -> tunelink_server::Result<()> {
//! use tunelink_server::{Reply, Runtime, ServerConfig};
//! use tunelink_value::Value;
//!
//! let runtime = Runtime::new(ServerConfig::new("/tmp/tunelink.sock"));
//! runtime.register_command(100, 32, |_ctx, _args| Ok(Reply::Value(Value::from("pong"))));
//! let server = runtime.start()?;
//! runtime.emit_broadcast(64, &Value::int(1));
//! server.shutdown().await
//! # }
//! ```

pub mod command;
pub mod config;
pub mod courier;
mod dispatch;
pub mod error;
pub mod peer;
pub mod runtime;
mod session;

pub use command::{Args, Command, CommandContext, Reply};
pub use config::{ServerConfig, DEFAULT_OUTGOING_QUEUE};
pub use courier::{Courier, PendingExchange};
pub use error::{CommandError, Result, ServerError};
pub use peer::PeerHandle;
pub use runtime::{RunningServer, Runtime};
