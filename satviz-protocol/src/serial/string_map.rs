use super::{Builder, Progress, Serializer};
use crate::error::ProtocolError;
use bytes::BufMut;
use std::collections::BTreeMap;

/// String key-value map. Ordered so encoding is canonical.
pub type StringMap = BTreeMap<String, String>;

/// `key=value` pairs separated by `\n`, the last pair terminated by `\0`.
///
/// Nothing is escaped, so keys and values must be non-empty and free of
/// `=`, `\n` and `\0`. The empty map is a single `\0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringMapSerializer;

impl Serializer for StringMapSerializer {
    type Value = StringMap;
    type Builder = StringMapBuilder;

    fn serialize<B: BufMut>(&self, map: &StringMap, out: &mut B) -> Result<(), ProtocolError> {
        for (key, value) in map {
            check_field("map key", key, "empty key")?;
            check_field("map value", value, "empty value")?;
        }

        if map.is_empty() {
            out.put_u8(0);
            return Ok(());
        }
        let mut remaining = map.len();
        for (key, value) in map {
            remaining -= 1;
            out.put_slice(key.as_bytes());
            out.put_u8(b'=');
            out.put_slice(value.as_bytes());
            out.put_u8(if remaining > 0 { b'\n' } else { 0 });
        }
        Ok(())
    }

    fn builder(&self) -> StringMapBuilder {
        StringMapBuilder::default()
    }
}

fn check_field(
    field: &'static str,
    text: &str,
    empty: &'static str,
) -> Result<(), ProtocolError> {
    if text.is_empty() {
        return Err(ProtocolError::MalformedMap(empty));
    }
    match text.chars().find(|c| matches!(c, '=' | '\n' | '\0')) {
        Some(character) => Err(ProtocolError::InvalidCharacter { field, character }),
        None => Ok(()),
    }
}

#[derive(Debug, Default)]
pub struct StringMapBuilder {
    progress: Progress,
    current: Vec<u8>,
    key: Option<String>,
    map: StringMap,
}

impl StringMapBuilder {
    fn step(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        match byte {
            b'=' => {
                if self.key.is_some() {
                    return Err(ProtocolError::MalformedMap("'=' inside value"));
                }
                if self.current.is_empty() {
                    return Err(ProtocolError::MalformedMap("empty key"));
                }
                self.key = Some(self.take_current()?);
                Ok(false)
            }
            b'\n' | 0 => {
                // A bare terminator is the empty map.
                if byte == 0 && self.map.is_empty() && self.key.is_none() && self.current.is_empty()
                {
                    return Ok(true);
                }
                let Some(key) = self.key.take() else {
                    return Err(ProtocolError::MalformedMap("pair without '='"));
                };
                if self.current.is_empty() {
                    return Err(ProtocolError::MalformedMap("empty value"));
                }
                let value = self.take_current()?;
                self.map.insert(key, value);
                Ok(byte == 0)
            }
            byte => {
                self.current.push(byte);
                Ok(false)
            }
        }
    }

    fn take_current(&mut self) -> Result<String, ProtocolError> {
        String::from_utf8(std::mem::take(&mut self.current)).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

impl Builder for StringMapBuilder {
    type Value = StringMap;

    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        self.progress.begin()?;
        let step = self.step(byte);
        self.progress.record(step)
    }

    fn object(&self) -> Option<&StringMap> {
        self.progress.is_finished().then_some(&self.map)
    }

    fn into_object(self) -> Option<StringMap> {
        self.progress.is_finished().then_some(self.map)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::decode_both_ways;
    use super::super::{from_slice, to_vec};
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> StringMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_map_wire_format() {
        let m = map(&[("type", "solver"), ("name", "cadical")]);
        assert_eq!(
            to_vec(&StringMapSerializer, &m).unwrap(),
            b"name=cadical\ntype=solver\0".to_vec()
        );
        assert_eq!(to_vec(&StringMapSerializer, &StringMap::new()).unwrap(), vec![0]);
    }

    #[test]
    fn test_map_decode() {
        let multi = map(&[
            ("type", "solver"),
            ("name", "kissat"),
            ("hash", "18446744073709551615"),
            ("delayed", "false"),
        ]);
        assert_eq!(decode_both_ways(&StringMapSerializer, &multi), multi);

        let unicode = map(&[("こんにちは", "नमस्ते")]);
        assert_eq!(decode_both_ways(&StringMapSerializer, &unicode), unicode);

        assert!(decode_both_ways(&StringMapSerializer, &StringMap::new()).is_empty());
    }

    #[test]
    fn test_map_reset() {
        let mut builder = StringMapSerializer.builder();
        assert_eq!(builder.add_byte(b'a'), Ok(false));
        builder.reset();
        assert_eq!(builder.add_bytes(b"b=2"), Ok(None));
        assert_eq!(builder.add_byte(0), Ok(true));
        assert_eq!(builder.object(), Some(&map(&[("b", "2")])));
    }

    #[test]
    fn test_map_malformed_input() {
        let cases: &[&[u8]] = &[
            b"=x\0",
            b"a=b=c\0",
            b"a\0",
            b"a=\0",
            b"a=b\n\0",
            b"a==b\0",
        ];
        for bytes in cases {
            let err = from_slice(&StringMapSerializer, bytes).unwrap_err();
            assert!(
                matches!(err, ProtocolError::MalformedMap(_)),
                "{:?} gave {:?}",
                bytes,
                err
            );
        }
    }

    #[test]
    fn test_map_rejects_unencodable_entries() {
        for (k, v) in [("a=b", "c"), ("a", "b\nc"), ("a\0", "b"), ("a", "b=c")] {
            let err = to_vec(&StringMapSerializer, &map(&[(k, v)])).unwrap_err();
            assert!(matches!(err, ProtocolError::InvalidCharacter { .. }));
        }
        for (k, v) in [("", "b"), ("a", "")] {
            let err = to_vec(&StringMapSerializer, &map(&[(k, v)])).unwrap_err();
            assert!(matches!(err, ProtocolError::MalformedMap(_)));
        }
    }

    #[test]
    fn test_map_nothing_written_on_error() {
        let mut out = Vec::new();
        let m = map(&[("a", "1"), ("b", "x\ny")]);
        assert!(StringMapSerializer.serialize(&m, &mut out).is_err());
        assert!(out.is_empty());
    }
}
