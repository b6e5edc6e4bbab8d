use std::time::Duration;

/// Errors raised by the blocking client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connecting to the server socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] tunelink_transport::TransportError),

    /// Writing a request failed.
    #[error("frame error: {0}")]
    Frame(#[from] tunelink_wire::FrameError),

    /// The server refused the HELLO handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection is gone; no further requests can be sent.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// No answer arrived in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with an Error value.
    #[error("server error: {0}")]
    Server(String),

    /// A reply did not have the expected shape.
    #[error("unexpected reply: {0}")]
    Value(#[from] tunelink_value::ValueError),
}

pub type Result<T> = std::result::Result<T, ClientError>;
