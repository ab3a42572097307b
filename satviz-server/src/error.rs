//! Server error types.

use crate::server::ConnectionId;
use satviz_protocol::ProtocolError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("consumer already started")]
    AlreadyStarted,

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns whether this error ends only a single connection.
    pub fn is_connection_local(&self) -> bool {
        matches!(
            self,
            ServerError::Io(_) | ServerError::Protocol(_) | ServerError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ServerError::UnknownConnection(ConnectionId(7)).to_string(),
            "unknown connection: #7"
        );
        let err: ServerError = ProtocolError::UnknownMessageType(42).into();
        assert_eq!(
            err.to_string(),
            "protocol error: no codec registered for message type 42"
        );
    }

    #[test]
    fn test_connection_local() {
        assert!(ServerError::ConnectionClosed.is_connection_local());
        assert!(ServerError::Protocol(ProtocolError::InvalidUtf8).is_connection_local());
        assert!(!ServerError::ShuttingDown.is_connection_local());
    }
}
