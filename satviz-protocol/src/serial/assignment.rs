use super::{Builder, IntBuilder, IntSerializer, Progress, Serializer};
use crate::error::ProtocolError;
use crate::sat::{packed_len, SatAssignment};
use bytes::BufMut;

/// Variable count as an [`IntSerializer`] value, followed by the 2-bit
/// states packed four to a byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct SatAssignmentSerializer;

impl Serializer for SatAssignmentSerializer {
    type Value = SatAssignment;
    type Builder = SatAssignmentBuilder;

    fn serialize<B: BufMut>(
        &self,
        assignment: &SatAssignment,
        out: &mut B,
    ) -> Result<(), ProtocolError> {
        let count = i32::try_from(assignment.var_count()).map_err(|_| {
            ProtocolError::InvalidField {
                field: "variable count",
                value: assignment.var_count().to_string(),
            }
        })?;
        IntSerializer.serialize(&count, out)?;
        out.put_slice(assignment.packed());
        Ok(())
    }

    fn builder(&self) -> SatAssignmentBuilder {
        SatAssignmentBuilder::default()
    }
}

/// Upper bound on the bytes reserved up front; the count is untrusted.
const MAX_PREALLOC: usize = 4096;

#[derive(Debug, Default)]
pub struct SatAssignmentBuilder {
    progress: Progress,
    count: IntBuilder,
    var_count: Option<usize>,
    packed: Vec<u8>,
    assignment: Option<SatAssignment>,
}

impl SatAssignmentBuilder {
    fn step(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        let Some(var_count) = self.var_count else {
            if !self.count.add_byte(byte)? {
                return Ok(false);
            }
            let count = self.count.object().copied().unwrap_or_default();
            let var_count =
                usize::try_from(count).map_err(|_| ProtocolError::NegativeVariableCount(count))?;
            self.var_count = Some(var_count);
            self.packed = Vec::with_capacity(packed_len(var_count).min(MAX_PREALLOC));
            return Ok(self.complete_if_full(var_count));
        };
        self.packed.push(byte);
        Ok(self.complete_if_full(var_count))
    }

    fn complete_if_full(&mut self, var_count: usize) -> bool {
        if self.packed.len() < packed_len(var_count) {
            return false;
        }
        let packed = std::mem::take(&mut self.packed);
        self.assignment = Some(SatAssignment::from_packed(var_count, packed));
        true
    }
}

impl Builder for SatAssignmentBuilder {
    type Value = SatAssignment;

    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        self.progress.begin()?;
        let step = self.step(byte);
        self.progress.record(step)
    }

    fn object(&self) -> Option<&SatAssignment> {
        self.assignment
            .as_ref()
            .filter(|_| self.progress.is_finished())
    }

    fn into_object(self) -> Option<SatAssignment> {
        self.assignment.filter(|_| self.progress.is_finished())
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
