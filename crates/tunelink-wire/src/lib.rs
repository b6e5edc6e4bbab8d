//! Wire format for tunelink: the value codec and message framing.
//!
//! Every message carries a 16-byte big-endian header:
//! - object id
//! - command id
//! - cookie (correlates a reply with its request)
//! - payload length
//!
//! followed by one tagged value (see [`codec`]). Blocking callers use
//! [`FrameReader`]/[`FrameWriter`]; the `async` feature adds a
//! `tokio_util` [`MessageCodec`].

pub mod codec;
pub mod error;
pub mod ids;
pub mod message;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod tokio_codec;

pub use codec::{deserialize, deserialize_bytes, serialize, serialize_into, MAX_DEPTH};
pub use error::{CodecError, FrameError, Result};
pub use message::{
    decode_frame, encode_frame, FrameConfig, Message, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use tokio_codec::MessageCodec;
