//! Client error types.

use std::io::ErrorKind;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] satviz_protocol::ProtocolError),

    #[error("connection already established")]
    AlreadyEstablished,

    #[error("not connected")]
    NotConnected,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connect timeout")]
    Timeout,
}

impl ClientError {
    /// Returns whether a connect attempt failing with this error is retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
            ),
            ClientError::Timeout => true,
            _ => false,
        }
    }
}
