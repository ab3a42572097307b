use super::{Builder, ClauseBuilder, ClauseSerializer, Progress, Serializer};
use crate::error::ProtocolError;
use crate::sat::{ClauseUpdate, UpdateKind};
use bytes::BufMut;

/// One tag byte (`0` add, `1` remove) followed by a clause.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClauseUpdateSerializer;

impl Serializer for ClauseUpdateSerializer {
    type Value = ClauseUpdate;
    type Builder = ClauseUpdateBuilder;

    fn serialize<B: BufMut>(&self, update: &ClauseUpdate, out: &mut B) -> Result<(), ProtocolError> {
        if update.clause.literals().contains(&0) {
            return Err(ProtocolError::ZeroLiteral);
        }
        out.put_u8(update.kind as u8);
        ClauseSerializer::write_literals(update.clause.literals(), out)
    }

    fn builder(&self) -> ClauseUpdateBuilder {
        ClauseUpdateBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct ClauseUpdateBuilder {
    progress: Progress,
    kind: Option<UpdateKind>,
    clause: ClauseBuilder,
    update: Option<ClauseUpdate>,
}

impl ClauseUpdateBuilder {
    fn step(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        let Some(kind) = self.kind else {
            let kind = UpdateKind::try_from(byte).map_err(ProtocolError::UnknownUpdateTag)?;
            self.kind = Some(kind);
            return Ok(false);
        };
        if !self.clause.add_byte(byte)? {
            return Ok(false);
        }
        let clause = std::mem::take(&mut self.clause).into_object().unwrap_or_default();
        self.update = Some(ClauseUpdate { clause, kind });
        Ok(true)
    }
}

impl Builder for ClauseUpdateBuilder {
    type Value = ClauseUpdate;

    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        self.progress.begin()?;
        let step = self.step(byte);
        self.progress.record(step)
    }

    fn object(&self) -> Option<&ClauseUpdate> {
        self.update.as_ref().filter(|_| self.progress.is_finished())
    }

    fn into_object(self) -> Option<ClauseUpdate> {
        self.update.filter(|_| self.progress.is_finished())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
