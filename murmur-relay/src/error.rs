//! Relay errors.

use murmur_proto::ProtocolError;
use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("invalid socket path {0:?}")]
    InvalidPath(String),
}
