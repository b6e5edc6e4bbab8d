use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tunelink_transport::SocketStream;

use crate::error::{FrameError, Result};
use crate::message::{decode_frame, FrameConfig, Message};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete messages from any `Read` stream.
///
/// Partial reads are buffered internally; callers only ever see whole
/// messages.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next message (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at EOF, including EOF in
    /// the middle of a frame.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                tracing::debug!(buffered = self.buf.len(), "peer closed the stream");
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl FrameReader<SocketStream> {
    /// Wrap a socket and apply the configured read timeout to it.
    pub fn for_socket(inner: SocketStream, config: FrameConfig) -> Result<Self> {
        inner.set_read_timeout(config.read_timeout)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;
    use tunelink_value::Value;

    use super::*;
    use crate::message::{encode_frame, DEFAULT_MAX_PAYLOAD};

    fn wire(messages: &[Message]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for message in messages {
            encode_frame(message, &mut buf, DEFAULT_MAX_PAYLOAD).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn reads_consecutive_messages() {
        let first = Message::reply(0, 1, Value::int(1));
        let second = Message::reply(2, 2, Value::from("two"));
        let mut reader = FrameReader::new(Cursor::new(wire(&[first.clone(), second.clone()])));
        assert_eq!(reader.read_message().unwrap(), first);
        assert_eq!(reader.read_message().unwrap(), second);
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn byte_at_a_time_stream() {
        let msg = Message::new(2, 32, 4, Value::binary(vec![0xAB; 20_000]));
        let reader = ByteByByteReader {
            bytes: wire(&[msg.clone()]),
            pos: 0,
        };
        let mut reader = FrameReader::new(reader);
        assert_eq!(reader.read_message().unwrap(), msg);
    }

    #[test]
    fn socket_reader_applies_read_timeout() {
        let dir = std::env::temp_dir().join(format!(
            "tlwire-timeout-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let path = dir.join("r.sock");
        let listener = tunelink_transport::UnixSocketListener::bind(&path).expect("bind");
        let _client = tunelink_transport::connect(&path).expect("connect");
        let server = listener.accept().expect("accept");

        let config = FrameConfig::default()
            .with_read_timeout(Some(std::time::Duration::from_millis(50)));
        let mut reader = FrameReader::for_socket(server, config).expect("reader");
        match reader.read_message() {
            Err(FrameError::Io(err)) => assert!(matches!(
                err.kind(),
                ErrorKind::WouldBlock | ErrorKind::TimedOut
            )),
            other => panic!("expected a timeout, got {other:?}"),
        }
        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_u32(0);
        partial.put_u32(0);
        partial.put_u32(1);
        partial.put_u32(16);
        partial.put_slice(b"short");
        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let cfg = FrameConfig::default().with_max_payload_size(8);
        let msg = Message::reply(0, 1, Value::from("much longer than eight"));
        let mut reader = FrameReader::with_config(Cursor::new(wire(&[msg])), cfg);
        assert!(matches!(
            reader.read_message(),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }
}
