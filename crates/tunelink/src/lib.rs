//! Music-daemon style IPC runtime.
//!
//! tunelink moves tagged, shared [`value::Value`] trees between a daemon and
//! its clients over a local socket, with single-shot signals, repeating
//! broadcasts and a courier that relays messages between clients.
//!
//! # Crate Structure
//!
//! - [`value`]: Value, List, Dict, Collection and courier envelopes
//! - [`wire`]: value codec and message framing
//! - [`transport`]: Unix domain socket plumbing
//! - [`server`]: the async daemon runtime (behind `server` feature)
//! - [`client`]: the blocking client (behind `client` feature)

/// Re-export value types.
pub mod value {
    pub use tunelink_value::*;
}

/// Re-export wire types.
pub mod wire {
    pub use tunelink_wire::*;
}

/// Re-export transport types.
pub mod transport {
    pub use tunelink_transport::*;
}

/// Re-export server types (requires `server` feature).
#[cfg(feature = "server")]
pub mod server {
    pub use tunelink_server::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use tunelink_client::*;
}
