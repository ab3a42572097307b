//! Incremental codec framework.
//!
//! Every wire type has a [`Serializer`] that writes a complete value and a
//! [`Builder`] that decodes one value a byte at a time. All wire formats
//! are self-delimiting, so a builder knows on its own when a value ends.

mod assignment;
mod clause;
mod int;
mod null;
mod string;
mod string_map;
mod update;

pub use assignment::{SatAssignmentBuilder, SatAssignmentSerializer};
pub use clause::{ClauseBuilder, ClauseSerializer};
pub use int::{IntBuilder, IntSerializer};
pub use null::{NullBuilder, NullSerializer};
pub use string::{StringBuilder, StringSerializer};
pub use string_map::{StringMap, StringMapBuilder, StringMapSerializer};
pub use update::{ClauseUpdateBuilder, ClauseUpdateSerializer};

use crate::error::ProtocolError;
use bytes::BufMut;

/// Writes complete values of one wire type and hands out builders for it.
pub trait Serializer: Send + Sync + 'static {
    type Value: Send + 'static;
    type Builder: Builder<Value = Self::Value> + 'static;

    /// Writes the canonical encoding of `value` to `out`.
    ///
    /// Nothing is written if the value cannot be encoded.
    fn serialize<B: BufMut>(&self, value: &Self::Value, out: &mut B) -> Result<(), ProtocolError>;

    /// Returns a fresh builder for this type.
    fn builder(&self) -> Self::Builder;
}

/// Resumable decoder for a single value.
pub trait Builder: Send {
    type Value;

    /// Consumes one byte. Returns `true` exactly when the value is complete.
    ///
    /// Once a value is complete, or after an error, every further call
    /// fails until [`Builder::reset`] is called.
    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError>;

    /// The decoded value, available only once complete.
    fn object(&self) -> Option<&Self::Value>;

    /// Consumes the builder and returns the decoded value if complete.
    fn into_object(self) -> Option<Self::Value>
    where
        Self: Sized;

    /// Returns the builder to its initial state.
    fn reset(&mut self);

    /// Feeds bytes until the value completes.
    ///
    /// Returns the number of bytes consumed when the value completed, or
    /// `None` if all of `bytes` was consumed without completing it.
    fn add_bytes(&mut self, bytes: &[u8]) -> Result<Option<usize>, ProtocolError> {
        for (i, &byte) in bytes.iter().enumerate() {
            if self.add_byte(byte)? {
                return Ok(Some(i + 1));
            }
        }
        Ok(None)
    }
}

/// Completion state shared by all builders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Progress {
    #[default]
    Building,
    Finished,
    Failed,
}

impl Progress {
    /// Checks that another byte may be added. A finished builder turns
    /// failed when fed.
    pub(crate) fn begin(&mut self) -> Result<(), ProtocolError> {
        match *self {
            Progress::Building => Ok(()),
            Progress::Finished => {
                *self = Progress::Failed;
                Err(ProtocolError::BuilderComplete)
            }
            Progress::Failed => Err(ProtocolError::BuilderFailed),
        }
    }

    /// Records the outcome of one step.
    pub(crate) fn record(
        &mut self,
        step: Result<bool, ProtocolError>,
    ) -> Result<bool, ProtocolError> {
        match step {
            Ok(true) => *self = Progress::Finished,
            Ok(false) => {}
            Err(_) => *self = Progress::Failed,
        }
        step
    }

    pub(crate) fn is_finished(self) -> bool {
        self == Progress::Finished
    }
}

/// Encodes `value` into a fresh byte vector.
pub fn to_vec<S: Serializer>(serializer: &S, value: &S::Value) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    serializer.serialize(value, &mut out)?;
    Ok(out)
}

/// Decodes exactly one value from `bytes` with a fresh builder.
///
/// Returns the value and the number of bytes it occupied, or `None` if
/// `bytes` ends before the value is complete.
pub fn from_slice<S: Serializer>(
    serializer: &S,
    bytes: &[u8],
) -> Result<Option<(S::Value, usize)>, ProtocolError> {
    let mut builder = serializer.builder();
    match builder.add_bytes(bytes)? {
        Some(used) => Ok(builder.into_object().map(|value| (value, used))),
        None => Ok(None),
    }
}
