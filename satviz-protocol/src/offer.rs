//! The OFFER handshake map.

use crate::error::ProtocolError;
use crate::serial::StringMap;
use crate::PROTOCOL_VERSION;

pub const KEY_TYPE: &str = "type";
pub const KEY_NAME: &str = "name";
pub const KEY_HASH: &str = "hash";
pub const KEY_DELAYED: &str = "delayed";
pub const KEY_VERSION: &str = "version";

/// How a producer identifies itself in its OFFER.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Offer {
    /// A live SAT solver working on an instance.
    Solver {
        name: String,
        delayed: bool,
        instance_hash: u64,
    },
    /// A proof replayed from a file.
    Proof,
}

impl Offer {
    pub fn solver(name: impl Into<String>, delayed: bool, instance_hash: u64) -> Self {
        Offer::Solver {
            name: name.into(),
            delayed,
            instance_hash,
        }
    }

    /// The value of the `type` key.
    pub fn type_name(&self) -> &'static str {
        match self {
            Offer::Solver { .. } => "solver",
            Offer::Proof => "proof",
        }
    }

    /// Builds the string map sent as OFFER payload.
    pub fn to_map(&self) -> StringMap {
        let mut map = StringMap::new();
        map.insert(KEY_VERSION.to_string(), PROTOCOL_VERSION.to_string());
        map.insert(KEY_TYPE.to_string(), self.type_name().to_string());
        if let Offer::Solver {
            name,
            delayed,
            instance_hash,
        } = self
        {
            map.insert(KEY_NAME.to_string(), name.clone());
            map.insert(KEY_HASH.to_string(), instance_hash.to_string());
            map.insert(KEY_DELAYED.to_string(), delayed.to_string());
        }
        map
    }

    /// Parses an OFFER payload.
    ///
    /// A missing `version` is accepted. Unknown keys are ignored.
    pub fn from_map(map: &StringMap) -> Result<Self, ProtocolError> {
        if let Some(version) = map.get(KEY_VERSION) {
            if version.parse::<u32>().ok() != Some(PROTOCOL_VERSION) {
                return Err(ProtocolError::UnsupportedVersion(version.clone()));
            }
        }

        let kind = required(map, KEY_TYPE)?;
        match kind {
            "proof" => Ok(Offer::Proof),
            "solver" => {
                let name = required(map, KEY_NAME)?.to_string();
                let hash = required(map, KEY_HASH)?;
                let instance_hash = parse_hash(hash).ok_or_else(|| invalid(KEY_HASH, hash))?;
                let delayed = required(map, KEY_DELAYED)?;
                let delayed = delayed
                    .parse::<bool>()
                    .map_err(|_| invalid(KEY_DELAYED, delayed))?;
                Ok(Offer::Solver {
                    name,
                    delayed,
                    instance_hash,
                })
            }
            other => Err(invalid(KEY_TYPE, other)),
        }
    }
}

impl TryFrom<&StringMap> for Offer {
    type Error = ProtocolError;

    fn try_from(map: &StringMap) -> Result<Self, Self::Error> {
        Offer::from_map(map)
    }
}

fn required<'a>(map: &'a StringMap, key: &'static str) -> Result<&'a str, ProtocolError> {
    map.get(key)
        .map(String::as_str)
        .ok_or(ProtocolError::MissingField(key))
}

fn invalid(field: &'static str, value: &str) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    }
}

/// Hashes are unsigned, but producers that only have signed 64-bit
/// integers send the two's complement value.
fn parse_hash(text: &str) -> Option<u64> {
    text.parse::<u64>()
        .ok()
        .or_else(|| text.parse::<i64>().ok().map(|h| h as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> StringMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_solver_offer_from_map() {
        let offer = Offer::from_map(&map(&[
            ("type", "solver"),
            ("name", "cadical"),
            ("hash", "42"),
            ("delayed", "true"),
        ]))
        .unwrap();
        assert_eq!(offer, Offer::solver("cadical", true, 42));
    }

    #[test]
    fn test_proof_offer() {
        assert_eq!(Offer::from_map(&map(&[("type", "proof")])), Ok(Offer::Proof));
        assert_eq!(
            Offer::Proof.to_map(),
            map(&[("type", "proof"), ("version", "1")])
        );
    }

    #[test]
    fn test_to_map_roundtrip() {
        let offer = Offer::solver("kissat", false, u64::MAX);
        let m = offer.to_map();
        assert_eq!(m.get("hash").map(String::as_str), Some("18446744073709551615"));
        assert_eq!(m.get("delayed").map(String::as_str), Some("false"));
        assert_eq!(Offer::try_from(&m), Ok(offer));
    }

    #[test]
    fn test_signed_hash_accepted() {
        let offer = Offer::from_map(&map(&[
            ("type", "solver"),
            ("name", "x"),
            ("hash", "-1"),
            ("delayed", "false"),
        ]))
        .unwrap();
        assert_eq!(offer, Offer::solver("x", false, u64::MAX));
    }

    #[test]
    fn test_invalid_offers() {
        assert_eq!(
            Offer::from_map(&StringMap::new()),
            Err(ProtocolError::MissingField("type"))
        );
        assert_eq!(
            Offer::from_map(&map(&[("type", "oracle")])),
            Err(ProtocolError::InvalidField {
                field: "type",
                value: "oracle".to_string()
            })
        );
        assert_eq!(
            Offer::from_map(&map(&[("type", "solver"), ("name", "x"), ("delayed", "true")])),
            Err(ProtocolError::MissingField("hash"))
        );
        assert!(matches!(
            Offer::from_map(&map(&[
                ("type", "solver"),
                ("name", "x"),
                ("hash", "abc"),
                ("delayed", "true")
            ])),
            Err(ProtocolError::InvalidField { field: "hash", .. })
        ));
        assert!(matches!(
            Offer::from_map(&map(&[
                ("type", "solver"),
                ("name", "x"),
                ("hash", "1"),
                ("delayed", "yes")
            ])),
            Err(ProtocolError::InvalidField {
                field: "delayed",
                ..
            })
        ));
    }

    #[test]
    fn test_version_check() {
        assert_eq!(
            Offer::from_map(&map(&[("type", "proof"), ("version", "2")])),
            Err(ProtocolError::UnsupportedVersion("2".to_string()))
        );
        assert_eq!(
            Offer::from_map(&map(&[("type", "proof"), ("version", "1")])),
            Ok(Offer::Proof)
        );
    }
}
