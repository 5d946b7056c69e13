use cobus_core::WireError;

/// Rejected client operations. None of these disturb an attempt already in
/// flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("client already connected")]
    AlreadyConnected,
    #[error("client is already connecting")]
    AlreadyConnecting,
    #[error("client is disconnecting")]
    Disconnecting,
    #[error("client is not connected")]
    NotConnected,
    #[error("no tokio runtime available")]
    NoRuntime,
    #[error("component id {0} is reserved for events")]
    ReservedComponent(u8),
}

/// Failure while reading a broker stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The stream is unusable; the connection ends.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// One malformed message. Its bytes were consumed, so the stream is still
    /// in sync and reading continues.
    #[error("malformed message: {0}")]
    Wire(#[from] WireError),
}
