//! # satviz-client
//!
//! Producer side of satviz.
//!
//! This crate provides:
//! - Outbound connection to a consumer with retry on refusal
//! - The OFFER handshake and START/STOP handling
//! - Sending clause updates and the terminal message

pub mod connection;
pub mod error;

pub use connection::{
    ConnectionConfig, ProducerConnection, ProducerConnectionListener, ProducerState,
};
pub use error::ClientError;
