use super::{Builder, Progress, Serializer};
use crate::error::ProtocolError;
use bytes::BufMut;

/// UTF-8 text terminated by a `0x00` byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerializer;

impl Serializer for StringSerializer {
    type Value = String;
    type Builder = StringBuilder;

    fn serialize<B: BufMut>(&self, value: &String, out: &mut B) -> Result<(), ProtocolError> {
        if value.contains('\0') {
            return Err(ProtocolError::InvalidCharacter {
                field: "string",
                character: '\0',
            });
        }
        out.put_slice(value.as_bytes());
        out.put_u8(0);
        Ok(())
    }

    fn builder(&self) -> StringBuilder {
        StringBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct StringBuilder {
    progress: Progress,
    bytes: Vec<u8>,
    value: String,
}

impl Builder for StringBuilder {
    type Value = String;

    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        self.progress.begin()?;
        let step = if byte == 0 {
            let bytes = std::mem::take(&mut self.bytes);
            String::from_utf8(bytes)
                .map(|text| {
                    self.value = text;
                    true
                })
                .map_err(|_| ProtocolError::InvalidUtf8)
        } else {
            self.bytes.push(byte);
            Ok(false)
        };
        self.progress.record(step)
    }

    fn object(&self) -> Option<&String> {
        self.progress.is_finished().then_some(&self.value)
    }

    fn into_object(self) -> Option<String> {
        self.progress.is_finished().then_some(self.value)
    }

    fn reset(&mut self) {
        self.progress = Progress::Building;
        self.bytes.clear();
        self.value.clear();
    }
}
