use super::{Builder, Progress, Serializer};
use crate::error::ProtocolError;
use bytes::BufMut;

/// Payload-less messages: exactly one `0x00` byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSerializer;

impl Serializer for NullSerializer {
    type Value = ();
    type Builder = NullBuilder;

    fn serialize<B: BufMut>(&self, _value: &(), out: &mut B) -> Result<(), ProtocolError> {
        out.put_u8(0);
        Ok(())
    }

    fn builder(&self) -> NullBuilder {
        NullBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct NullBuilder {
    progress: Progress,
}

impl Builder for NullBuilder {
    type Value = ();

    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        self.progress.begin()?;
        let step = match byte {
            0 => Ok(true),
            byte => Err(ProtocolError::UnexpectedByte {
                codec: "null",
                byte,
            }),
        };
        self.progress.record(step)
    }

    fn object(&self) -> Option<&()> {
        self.progress.is_finished().then_some(&())
    }

    fn into_object(self) -> Option<()> {
        self.progress.is_finished().then_some(())
    }

    fn reset(&mut self) {
        self.progress = Progress::Building;
    }
}
