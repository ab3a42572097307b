//! Byte-indexed codec registry.
//!
//! A [`Blueprint`] maps each one-byte message type to the codec of its
//! payload. It is assembled once and then shared read-only (usually behind
//! an `Arc`) by every connection.

use crate::error::ProtocolError;
use crate::sat::{Clause, ClauseUpdate, SatAssignment};
use crate::serial::{Builder, Serializer, StringMap};
use bytes::BytesMut;
use std::fmt;

/// A decoded payload of any registered wire type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    Int(i32),
    Text(String),
    Map(StringMap),
    Clause(Clause),
    ClauseUpdate(ClauseUpdate),
    Assignment(SatAssignment),
}

impl Payload {
    /// Short name of the payload kind, used in errors and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::None => <() as PayloadValue>::KIND,
            Payload::Int(_) => i32::KIND,
            Payload::Text(_) => String::KIND,
            Payload::Map(_) => StringMap::KIND,
            Payload::Clause(_) => Clause::KIND,
            Payload::ClauseUpdate(_) => ClauseUpdate::KIND,
            Payload::Assignment(_) => SatAssignment::KIND,
        }
    }
}

/// Conversion between a codec value and [`Payload`].
pub trait PayloadValue: Sized {
    const KIND: &'static str;

    fn into_payload(self) -> Payload;

    fn from_payload(payload: &Payload) -> Option<&Self>;
}

macro_rules! payload_value {
    ($ty:ty, $kind:literal, $variant:ident) => {
        impl PayloadValue for $ty {
            const KIND: &'static str = $kind;

            fn into_payload(self) -> Payload {
                Payload::$variant(self)
            }

            fn from_payload(payload: &Payload) -> Option<&Self> {
                match payload {
                    Payload::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Payload {
            fn from(value: $ty) -> Self {
                Payload::$variant(value)
            }
        }
    };
}

payload_value!(i32, "int", Int);
payload_value!(String, "text", Text);
payload_value!(StringMap, "map", Map);
payload_value!(Clause, "clause", Clause);
payload_value!(ClauseUpdate, "clause update", ClauseUpdate);
payload_value!(SatAssignment, "assignment", Assignment);

impl PayloadValue for () {
    const KIND: &'static str = "none";

    fn into_payload(self) -> Payload {
        Payload::None
    }

    fn from_payload(payload: &Payload) -> Option<&Self> {
        matches!(payload, Payload::None).then_some(&())
    }
}

/// A builder whose value has been lifted into [`Payload`].
pub trait PayloadBuilder: Send {
    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError>;

    /// The decoded payload, if complete.
    fn into_payload(self: Box<Self>) -> Option<Payload>;

    fn reset(&mut self);
}

impl<B> PayloadBuilder for B
where
    B: Builder,
    B::Value: PayloadValue,
{
    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        Builder::add_byte(self, byte)
    }

    fn into_payload(self: Box<Self>) -> Option<Payload> {
        (*self).into_object().map(PayloadValue::into_payload)
    }

    fn reset(&mut self) {
        Builder::reset(self)
    }
}

trait PayloadCodec: Send + Sync {
    fn kind(&self) -> &'static str;

    fn serialize(&self, payload: &Payload, out: &mut BytesMut) -> Result<(), ProtocolError>;

    fn builder(&self) -> Box<dyn PayloadBuilder>;
}

impl<S> PayloadCodec for S
where
    S: Serializer,
    S::Value: PayloadValue,
{
    fn kind(&self) -> &'static str {
        S::Value::KIND
    }

    fn serialize(&self, payload: &Payload, out: &mut BytesMut) -> Result<(), ProtocolError> {
        let value =
            S::Value::from_payload(payload).ok_or_else(|| ProtocolError::PayloadMismatch {
                expected: S::Value::KIND,
                actual: payload.kind(),
            })?;
        Serializer::serialize(self, value, out)
    }

    fn builder(&self) -> Box<dyn PayloadBuilder> {
        Box::new(Serializer::builder(self))
    }
}

/// Registry of payload codecs, one slot per message type byte.
pub struct Blueprint {
    codecs: Vec<Option<Box<dyn PayloadCodec>>>,
}

impl Blueprint {
    /// Creates a blueprint with no registered types.
    pub fn new() -> Self {
        Self {
            codecs: (0..=u8::MAX).map(|_| None).collect(),
        }
    }

    /// Registers `serializer` for `msg_type`, replacing any previous codec.
    pub fn with_codec<S>(mut self, msg_type: u8, serializer: S) -> Self
    where
        S: Serializer,
        S::Value: PayloadValue,
    {
        self.codecs[msg_type as usize] = Some(Box::new(serializer));
        self
    }

    /// Returns whether a codec is registered for `msg_type`.
    pub fn contains(&self, msg_type: u8) -> bool {
        self.codecs[msg_type as usize].is_some()
    }

    /// Writes the payload bytes of `payload` as a `msg_type` value.
    ///
    /// The type byte itself is not written.
    pub fn serialize(
        &self,
        msg_type: u8,
        payload: &Payload,
        out: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        self.codec(msg_type)
            .ok_or(ProtocolError::UnknownMessageType(msg_type))?
            .serialize(payload, out)
    }

    /// Returns a fresh builder for `msg_type`, or `None` if unregistered.
    pub fn builder(&self, msg_type: u8) -> Option<Box<dyn PayloadBuilder>> {
        self.codec(msg_type).map(|codec| codec.builder())
    }

    fn codec(&self, msg_type: u8) -> Option<&dyn PayloadCodec> {
        self.codecs[msg_type as usize].as_deref()
    }
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (msg_type, codec) in self.codecs.iter().enumerate() {
            if let Some(codec) = codec {
                map.entry(&msg_type, &codec.kind());
            }
        }
        map.finish()
    }
}
