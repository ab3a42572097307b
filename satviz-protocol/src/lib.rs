//! # satviz-protocol
//!
//! Wire protocol for streaming clause updates from a SAT producer to a
//! consumer.
//!
//! This crate provides:
//! - Incremental, byte-at-a-time codecs for every wire type
//! - The [`Blueprint`] registry mapping message type bytes to codecs
//! - Message types of the OFFER/START/STOP/clause/terminate session
//! - A stream [`Decoder`] and [`Encoder`] for type-prefixed frames
//!
//! Nothing here touches sockets.

pub mod blueprint;
pub mod codec;
pub mod error;
pub mod message;
pub mod offer;
pub mod sat;
pub mod serial;

pub use blueprint::{Blueprint, Payload, PayloadBuilder, PayloadValue};
pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use message::{Message, MessageType};
pub use offer::Offer;
pub use sat::{Clause, ClauseUpdate, SatAssignment, UpdateKind, VariableState};
pub use serial::{Builder, Serializer, StringMap};

/// Protocol version announced in the OFFER map.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default port the consumer listens on.
pub const DEFAULT_PORT: u16 = 34312;
