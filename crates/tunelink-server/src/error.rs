use tunelink_value::ValueError;

/// Errors raised by the server runtime.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding or accepting on the listening socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] tunelink_transport::TransportError),

    /// A session's framed stream failed.
    #[error("frame error: {0}")]
    Frame(#[from] tunelink_wire::FrameError),

    /// The addressed client is not connected (or is disconnecting).
    #[error("peer {0} not found")]
    PeerNotFound(u32),

    /// The client's outgoing queue overflowed; it is being disconnected.
    #[error("outgoing queue of peer {0} is full")]
    QueueFull(u32),

    /// The serve task ended abnormally.
    #[error("server task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

/// Failure of a single command. The message becomes the Error payload of
/// the reply; the connection stays open.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CommandError(pub String);

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<ValueError> for CommandError {
    fn from(err: ValueError) -> Self {
        Self(err.to_string())
    }
}

impl From<ServerError> for CommandError {
    fn from(err: ServerError) -> Self {
        Self(err.to_string())
    }
}
