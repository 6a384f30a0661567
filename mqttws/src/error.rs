//! Error types for mqttws.

use crate::types::ConnectReturnCode;

/// Result type alias for mqttws.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mqttws operations.
///
/// Every error is reported to the caller of the operation that hit it, or to
/// the pending `connect()` of the attempt it ended. None of them is fatal to
/// the client: after any failure a new `connect()` may be issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A value cannot be represented on the wire.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A frame from the peer is truncated or invalid.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// The transport refused to start opening.
    #[error("transport open failed: {0}")]
    TransportOpenFailed(String),

    /// No transport-open plus CONNACK within the overall connect window.
    #[error("connection timeout: no response from server")]
    ConnectionTimeout,

    /// The transport opened but no CONNACK arrived in time.
    #[error("server did not respond to connection request")]
    ConnAckTimeout,

    /// The broker answered CONNECT with a non-zero return code.
    #[error("connection rejected: {0}")]
    ConnectionRejected(ConnectReturnCode),

    /// The transport reported an error mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// The transport closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation requires a connected session.
    #[error("not connected")]
    NotConnected,

    /// A connection attempt is already in progress.
    #[error("connection already in progress")]
    AlreadyConnecting,

    /// The client is already connected.
    #[error("already connected")]
    AlreadyConnected,

    /// The transport did not accept a frame.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The attempt was cancelled by `disconnect()`.
    #[error("connection attempt cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The session task is gone.
    #[error("client session stopped")]
    SessionClosed,
}
