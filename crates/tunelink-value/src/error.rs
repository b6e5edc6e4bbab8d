use crate::value::ValueType;

/// Errors raised by value accessors and container operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    /// The stored kind disagrees with the requested one.
    #[error("type mismatch (expected {expected}, found {found})")]
    TypeMismatch {
        expected: ValueType,
        found: ValueType,
    },

    /// A string payload is not valid UTF-8.
    #[error("string is not valid utf-8")]
    InvalidUtf8,

    /// An index fell outside the list bounds after normalization.
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange { index: i64, len: usize },

    /// A list restriction could not be applied.
    #[error("invalid list restriction: {0}")]
    InvalidRestriction(String),

    /// A cursor was used against a container it does not belong to, or
    /// against a table that has since been rebuilt.
    #[error("stale cursor")]
    StaleCursor,

    /// A collection operation was not valid for its type.
    #[error("invalid collection operation: {0}")]
    InvalidCollection(String),

    /// A dict does not have the shape of a courier envelope.
    #[error("invalid courier envelope: {0}")]
    InvalidEnvelope(String),

    /// A JSON document could not be represented as a value.
    #[error("unsupported json: {0}")]
    UnsupportedJson(String),
}

pub type Result<T> = std::result::Result<T, ValueError>;
