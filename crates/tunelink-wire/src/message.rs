use bytes::{Buf, BufMut, BytesMut};
use tunelink_value::Value;

use crate::codec::{deserialize_bytes, serialize_into};
use crate::error::{FrameError, Result};
use crate::ids::command;

/// Frame header: object (4) + command (4) + cookie (4) + length (4).
pub const HEADER_SIZE: usize = 16;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One protocol message: a command addressed to an object, correlated by
/// cookie, carrying a tagged value.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub object: u32,
    pub command: u32,
    pub cookie: u32,
    pub payload: Value,
}

impl Message {
    pub fn new(object: u32, command: u32, cookie: u32, payload: Value) -> Self {
        Self {
            object,
            command,
            cookie,
            payload,
        }
    }

    /// A successful reply to a request on `object` with `cookie`.
    pub fn reply(object: u32, cookie: u32, payload: Value) -> Self {
        Self::new(object, command::REPLY, cookie, payload)
    }

    /// A failure reply carrying an Error value.
    pub fn error(object: u32, cookie: u32, message: impl Into<String>) -> Self {
        Self::new(object, command::ERROR, cookie, Value::error(message))
    }
}

/// Encode a message into the wire format.
///
/// ```text
/// ┌──────────┬──────────┬──────────┬──────────┬─────────────────┐
/// │ Object   │ Command  │ Cookie   │ Length   │ Payload         │
/// │ (4B BE)  │ (4B BE)  │ (4B BE)  │ (4B BE)  │ (tagged value)  │
/// └──────────┴──────────┴──────────┴──────────┴─────────────────┘
/// ```
pub fn encode_frame(message: &Message, dst: &mut BytesMut, max_payload: usize) -> Result<()> {
    let start = dst.len();
    dst.reserve(HEADER_SIZE);
    dst.put_u32(message.object);
    dst.put_u32(message.command);
    dst.put_u32(message.cookie);
    dst.put_u32(0);

    if let Err(err) = serialize_into(&message.payload, dst) {
        dst.truncate(start);
        return Err(err.into());
    }

    let payload_len = dst.len() - start - HEADER_SIZE;
    if payload_len > max_payload || payload_len > u32::MAX as usize {
        dst.truncate(start);
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }
    dst[start + 12..start + HEADER_SIZE].copy_from_slice(&(payload_len as u32).to_be_bytes());
    Ok(())
}

/// Decode a message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. A complete frame
/// whose payload does not decode is consumed and reported as an error. A
/// zero-length payload decodes as None.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Message>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let word = |at: usize| u32::from_be_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]]);
    let object = word(0);
    let command = word(4);
    let cookie = word(8);
    let payload_len = word(12) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    if src.len() < HEADER_SIZE + payload_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(payload_len).freeze();
    let payload = if body.is_empty() {
        Value::none()
    } else {
        deserialize_bytes(body)?
    };

    Ok(Some(Message {
        object,
        command,
        cookie,
        payload,
    }))
}

/// Configuration for framed message I/O.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

impl FrameConfig {
    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Option<std::time::Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use tunelink_value::List;

    use super::*;
    use crate::error::CodecError;

    fn args(values: impl IntoIterator<Item = Value>) -> Value {
        Value::list(List::from_values(values))
    }

    #[test]
    fn header_layout() {
        let mut buf = BytesMut::new();
        let msg = Message::new(2, 33, 7, Value::none());
        encode_frame(&msg, &mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        assert_eq!(
            buf.as_ref(),
            &[0, 0, 0, 2, 0, 0, 0, 33, 0, 0, 0, 7, 0, 0, 0, 4, 0, 0, 0, 0]
        );
    }

    #[test]
    fn encode_decode_message() {
        let mut buf = BytesMut::new();
        let msg = Message::new(1, 32, 99, args([Value::int(64)]));
        encode_frame(&msg, &mut buf, DEFAULT_MAX_PAYLOAD).unwrap();

        let decoded = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_header_and_payload() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 1, 0][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());

        let mut buf = BytesMut::new();
        encode_frame(
            &Message::reply(0, 1, Value::from("hello")),
            &mut buf,
            DEFAULT_MAX_PAYLOAD,
        )
        .unwrap();
        buf.truncate(HEADER_SIZE + 3);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn oversized_payload_rejected_both_ways() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(32 * 1024 * 1024);
        assert!(matches!(
            decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(FrameError::PayloadTooLarge { .. })
        ));

        let mut out = BytesMut::from(&b"keep"[..]);
        let big = Message::reply(0, 1, Value::binary(vec![0u8; 64]));
        assert!(matches!(
            encode_frame(&big, &mut out, 16),
            Err(FrameError::PayloadTooLarge { .. })
        ));
        assert_eq!(out.as_ref(), b"keep");
    }

    #[test]
    fn undecodable_payload_is_consumed() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u32(32);
        buf.put_u32(5);
        buf.put_u32(4);
        buf.put_u32(99);
        encode_frame(&Message::reply(0, 6, Value::int(1)), &mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap();

        assert!(matches!(
            decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(FrameError::Codec(CodecError::UnknownTag(99)))
        ));
        let next = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert_eq!(next.cookie, 6);
    }

    #[test]
    fn empty_payload_is_none() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(3);
        buf.put_u32(0);
        let msg = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().unwrap();
        assert!(msg.payload.is_none());
    }

    #[test]
    fn error_helper_builds_error_frame() {
        let msg = Message::error(2, 9, "peer not found");
        assert_eq!(msg.command, command::ERROR);
        assert_eq!(msg.payload.as_error().unwrap(), "peer not found");
    }
}
