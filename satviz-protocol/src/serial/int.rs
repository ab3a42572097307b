use super::{Builder, Progress, Serializer};
use crate::error::ProtocolError;
use bytes::BufMut;

/// 32-bit signed integer, 4 bytes little-endian.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntSerializer;

impl Serializer for IntSerializer {
    type Value = i32;
    type Builder = IntBuilder;

    fn serialize<B: BufMut>(&self, value: &i32, out: &mut B) -> Result<(), ProtocolError> {
        out.put_i32_le(*value);
        Ok(())
    }

    fn builder(&self) -> IntBuilder {
        IntBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct IntBuilder {
    progress: Progress,
    bytes: [u8; 4],
    filled: usize,
    value: i32,
}

impl IntBuilder {
    /// Number of bytes still missing.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.filled
    }
}

impl Builder for IntBuilder {
    type Value = i32;

    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        self.progress.begin()?;
        self.bytes[self.filled] = byte;
        self.filled += 1;
        let done = self.filled == self.bytes.len();
        if done {
            self.value = i32::from_le_bytes(self.bytes);
        }
        self.progress.record(Ok(done))
    }

    fn object(&self) -> Option<&i32> {
        self.progress.is_finished().then_some(&self.value)
    }

    fn into_object(self) -> Option<i32> {
        self.progress.is_finished().then_some(self.value)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::decode_both_ways;
    use super::super::to_vec;
    use super::*;

    #[test]
    fn test_int_little_endian() {
        assert_eq!(to_vec(&IntSerializer, &1).unwrap(), vec![1, 0, 0, 0]);
        assert_eq!(
            to_vec(&IntSerializer, &0x1234_5678).unwrap(),
            vec![0x78, 0x56, 0x34, 0x12]
        );
        assert_eq!(to_vec(&IntSerializer, &-1).unwrap(), vec![0xff; 4]);
    }

    #[test]
    fn test_int_decode() {
        for value in [0, 1, -1, i32::MAX, i32::MIN, 31337] {
            assert_eq!(decode_both_ways(&IntSerializer, &value), value);
        }
    }

    #[test]
    fn test_int_remaining() {
        let mut builder = IntSerializer.builder();
        assert_eq!(builder.remaining(), 4);
        builder.add_byte(7).unwrap();
        assert_eq!(builder.remaining(), 3);
        assert_eq!(builder.object(), None);
    }
}
