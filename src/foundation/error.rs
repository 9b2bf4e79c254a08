pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error taxonomy for the bridge.
///
/// `Protocol` and `TransportIo` are fatal to the session; everything else is
/// reported to the peer as an error reply and the session keeps going.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport i/o error: {0}")]
    TransportIo(String),

    #[error("shared memory error: {0}")]
    SharedMemory(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("content error: {0}")]
    Content(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn transport_io(msg: impl Into<String>) -> Self {
        Self::TransportIo(msg.into())
    }

    pub fn shared_memory(msg: impl Into<String>) -> Self {
        Self::SharedMemory(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    pub fn content(msg: impl Into<String>) -> Self {
        Self::Content(msg.into())
    }

    /// Whether this error must end the session instead of producing an error
    /// reply. Stream-level failures leave the record boundary undefined, so
    /// there is no safe way to keep reading commands after one.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::TransportIo(_))
    }
}
