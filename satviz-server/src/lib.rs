//! # satviz-server
//!
//! Consumer side of satviz.
//!
//! This crate provides:
//! - A TCP connection multiplexer that turns many producer sockets into one
//!   stream of accept, read and failure events
//! - The consumer session protocol: OFFER, START, clause stream, STOP and
//!   termination
//! - Configuration loading

pub mod config;
pub mod connection;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod server;
pub mod session;

pub use config::{Config, NetworkConfig};
pub use connection::Connection;
pub use consumer::{ConsumerConnection, ConsumerConnectionListener};
pub use error::ServerError;
pub use producer::ProducerId;
pub use server::{ConnectionId, ConnectionServer, PollEvent, ServerConfig};
pub use session::SessionState;
