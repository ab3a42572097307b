//! Stream encoder and decoder for framed messages.
//!
//! A frame is one type byte followed by the self-delimiting payload of that
//! type. There is no length prefix, so decoding is driven byte by byte
//! through the payload builders.

use crate::blueprint::{Blueprint, Payload, PayloadBuilder};
use crate::error::ProtocolError;
use crate::message::Message;
use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;
use std::sync::Arc;

/// Encodes messages into frames.
pub struct Encoder;

impl Encoder {
    /// Encodes one frame into a new buffer.
    pub fn encode(
        blueprint: &Blueprint,
        msg_type: u8,
        payload: &Payload,
    ) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::with_capacity(64);
        Self::encode_into(blueprint, msg_type, payload, &mut out)?;
        Ok(out)
    }

    /// Appends one frame to `out`. On error `out` is left unchanged.
    pub fn encode_into(
        blueprint: &Blueprint,
        msg_type: u8,
        payload: &Payload,
        out: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let start = out.len();
        out.put_u8(msg_type);
        if let Err(e) = blueprint.serialize(msg_type, payload, out) {
            out.truncate(start);
            return Err(e);
        }
        Ok(())
    }

    pub fn encode_message(
        blueprint: &Blueprint,
        message: &Message,
    ) -> Result<BytesMut, ProtocolError> {
        Self::encode(blueprint, message.msg_type, &message.payload)
    }
}

/// Incremental frame decoder for one byte stream.
///
/// The first decode error taints the decoder: every later call fails with
/// [`ProtocolError::ReadFailed`] and no resynchronisation is attempted.
pub struct Decoder {
    blueprint: Arc<Blueprint>,
    current: Option<(u8, Box<dyn PayloadBuilder>)>,
    failure: Option<ProtocolError>,
}

impl Decoder {
    pub fn new(blueprint: Arc<Blueprint>) -> Self {
        Self {
            blueprint,
            current: None,
            failure: None,
        }
    }

    /// Decodes `data`, appending each completed message to `out` in order.
    ///
    /// Messages completed before an error are still appended.
    pub fn decode(
        &mut self,
        data: &[u8],
        out: &mut VecDeque<Message>,
    ) -> Result<(), ProtocolError> {
        if let Some(failure) = &self.failure {
            return Err(ProtocolError::ReadFailed(failure.to_string()));
        }
        for &byte in data {
            if let Err(e) = self.push(byte, out) {
                self.current = None;
                self.failure = Some(e.clone());
                return Err(e);
            }
        }
        Ok(())
    }

    /// Decodes `data` into a fresh queue.
    pub fn decode_all(&mut self, data: &[u8]) -> Result<VecDeque<Message>, ProtocolError> {
        let mut out = VecDeque::new();
        self.decode(data, &mut out)?;
        Ok(out)
    }

    fn push(&mut self, byte: u8, out: &mut VecDeque<Message>) -> Result<(), ProtocolError> {
        let done = match self.current.as_mut() {
            Some((_, builder)) => builder.add_byte(byte)?,
            None => {
                let builder = self
                    .blueprint
                    .builder(byte)
                    .ok_or(ProtocolError::UnknownMessageType(byte))?;
                self.current = Some((byte, builder));
                return Ok(());
            }
        };
        if done {
            if let Some((msg_type, builder)) = self.current.take() {
                let payload = builder.into_payload().unwrap_or(Payload::None);
                out.push_back(Message::new(msg_type, payload));
            }
        }
        Ok(())
    }

    /// Returns true while a frame is partially decoded.
    pub fn in_frame(&self) -> bool {
        self.current.is_some()
    }

    /// Returns the error that tainted this decoder, if any.
    pub fn failure(&self) -> Option<&ProtocolError> {
        self.failure.as_ref()
    }
}
