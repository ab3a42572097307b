//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or incrementally decoding wire values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    // Decode errors
    #[error("unexpected byte {byte:#04x} in {codec} payload")]
    UnexpectedByte { codec: &'static str, byte: u8 },

    #[error("builder already produced a value, reset it before reuse")]
    BuilderComplete,

    #[error("builder failed earlier, reset it before reuse")]
    BuilderFailed,

    #[error("invalid UTF-8 in string payload")]
    InvalidUtf8,

    #[error("literal {0} is not a valid 32-bit literal")]
    InvalidLiteral(i64),

    #[error("varint literal exceeds 35 bits")]
    LiteralOverflow,

    #[error("malformed string map: {0}")]
    MalformedMap(&'static str),

    #[error("negative variable count: {0}")]
    NegativeVariableCount(i32),

    #[error("unknown clause update tag: {0:#04x}")]
    UnknownUpdateTag(u8),

    #[error("no codec registered for message type {0}")]
    UnknownMessageType(u8),

    #[error("read path failed earlier: {0}")]
    ReadFailed(String),

    // Encode errors
    #[error("payload of kind {actual} cannot be encoded as {expected}")]
    PayloadMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{field} must not contain {character:?}")]
    InvalidCharacter {
        field: &'static str,
        character: char,
    },

    #[error("0 is not a valid literal")]
    ZeroLiteral,

    // OFFER errors
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value {value:?} for field {field}")]
    InvalidField { field: &'static str, value: String },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),
}

impl ProtocolError {
    /// Returns true for errors produced while decoding bytes from a peer.
    pub fn is_decode_error(&self) -> bool {
        !matches!(
            self,
            ProtocolError::PayloadMismatch { .. }
                | ProtocolError::InvalidCharacter { .. }
                | ProtocolError::ZeroLiteral
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnexpectedByte {
            codec: "null",
            byte: 1,
        };
        assert_eq!(err.to_string(), "unexpected byte 0x01 in null payload");

        let err = ProtocolError::InvalidField {
            field: "delayed",
            value: "maybe".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value \"maybe\" for field delayed"
        );
    }

    #[test]
    fn test_decode_error_classification() {
        assert!(ProtocolError::InvalidUtf8.is_decode_error());
        assert!(ProtocolError::UnknownMessageType(7).is_decode_error());
        assert!(!ProtocolError::ZeroLiteral.is_decode_error());
        assert!(!ProtocolError::PayloadMismatch {
            expected: "int",
            actual: "text"
        }
        .is_decode_error());
    }
}
