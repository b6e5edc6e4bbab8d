//! Blocking tunelink client.
//!
//! A [`Connection`] sends requests and returns a [`CallResult`] per request.
//! Results are answered from a background reader thread; callers either
//! block in [`CallResult::wait`] or attach notifiers.
//!
//! ```no_run
//! use std::time::Duration;
//! use tunelink_client::{ClientConfig, Connection};
//! use tunelink_value::{ReplyPolicy, Value};
//!
//! # fn main() -> tunelink_client::Result<()> {
//! let conn = Connection::connect("/tmp/tunelink.sock", ClientConfig::new("demo"))?;
//! let answer = conn.send_message(2, ReplyPolicy::SingleReply, Value::from("ping"))?;
//! let reply = answer.wait_ok(Duration::from_secs(5))?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

pub mod c2c;
pub mod config;
pub mod connection;
pub mod error;
pub mod result;

pub use config::{ClientConfig, DEFAULT_CONNECT_TIMEOUT};
pub use connection::Connection;
pub use error::{ClientError, Result};
pub use result::{CallResult, NotifierFn, ResultClass};
