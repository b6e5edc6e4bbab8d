use tunelink_value::ValueError;

/// Errors raised while turning bytes into a value tree.
///
/// Decoding never yields a partially built value: any of these aborts the
/// whole payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The input ended before the value did.
    #[error("truncated input (needed {needed} bytes, {available} available)")]
    Truncated { needed: usize, available: usize },

    /// A kind tag outside the known range.
    #[error("unknown value tag {0}")]
    UnknownTag(u32),

    /// A collection type id outside the known range.
    #[error("unknown collection type {0}")]
    UnknownCollectionType(u32),

    /// A string body without its terminating NUL.
    #[error("string is not nul-terminated")]
    MissingNul,

    /// A dict key that is not UTF-8.
    #[error("dict key is not valid utf-8")]
    InvalidKey,

    /// Bytes left over after the top-level value.
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),

    /// Nesting deeper than the decoder accepts.
    #[error("value nesting exceeds {0} levels")]
    TooDeep(usize),

    /// A length that cannot be represented on the wire.
    #[error("{what} length {len} exceeds the wire limit")]
    TooLong { what: &'static str, len: usize },

    /// A decoded container violated a value-model rule.
    #[error("invalid value: {0}")]
    Value(#[from] ValueError),
}

/// Errors that can occur while reading or writing framed messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The payload of a complete frame did not decode.
    #[error("undecodable payload: {0}")]
    Codec(#[from] CodecError),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

impl From<tunelink_transport::TransportError> for FrameError {
    fn from(err: tunelink_transport::TransportError) -> Self {
        use tunelink_transport::TransportError;
        match err {
            TransportError::Io(io) | TransportError::Accept(io) => FrameError::Io(io),
            TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
                FrameError::Io(source)
            }
            other => FrameError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
