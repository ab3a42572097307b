use super::{Builder, Progress, Serializer};
use crate::error::ProtocolError;
use crate::sat::Clause;
use bytes::BufMut;

/// Highest shift at which a 7-bit group may still start. Five groups cover
/// the 33 bits a zigzag-encoded `i32` needs.
const MAX_SHIFT: u32 = 28;

/// Zigzag varint literals followed by a bare `0x00`.
///
/// A literal `l` is mapped to `2l` when positive and `-2l + 1` otherwise,
/// then written in 7-bit groups, least significant first, with the high
/// bit marking continuation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClauseSerializer;

impl ClauseSerializer {
    pub(crate) fn write_literals<B: BufMut>(
        literals: &[i32],
        out: &mut B,
    ) -> Result<(), ProtocolError> {
        if literals.contains(&0) {
            return Err(ProtocolError::ZeroLiteral);
        }
        for &lit in literals {
            let mut zigzag = zigzag(lit);
            loop {
                let group = (zigzag & 0x7f) as u8;
                zigzag >>= 7;
                if zigzag == 0 {
                    out.put_u8(group);
                    break;
                }
                out.put_u8(group | 0x80);
            }
        }
        out.put_u8(0);
        Ok(())
    }
}

impl Serializer for ClauseSerializer {
    type Value = Clause;
    type Builder = ClauseBuilder;

    fn serialize<B: BufMut>(&self, clause: &Clause, out: &mut B) -> Result<(), ProtocolError> {
        Self::write_literals(clause.literals(), out)
    }

    fn builder(&self) -> ClauseBuilder {
        ClauseBuilder::default()
    }
}

fn zigzag(lit: i32) -> u64 {
    let lit = lit as i64;
    if lit > 0 {
        (2 * lit) as u64
    } else {
        (-2 * lit + 1) as u64
    }
}

fn unzigzag(value: u64) -> Result<i32, ProtocolError> {
    let lit = if value % 2 == 0 {
        (value / 2) as i64
    } else {
        -(((value - 1) / 2) as i64)
    };
    if lit == 0 {
        return Err(ProtocolError::InvalidLiteral(lit));
    }
    i32::try_from(lit).map_err(|_| ProtocolError::InvalidLiteral(lit))
}

#[derive(Debug, Default)]
pub struct ClauseBuilder {
    progress: Progress,
    literals: Vec<i32>,
    pending: u64,
    shift: u32,
    clause: Clause,
}

impl ClauseBuilder {
    fn step(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        if byte == 0 {
            if self.shift != 0 {
                return Err(ProtocolError::UnexpectedByte {
                    codec: "clause",
                    byte,
                });
            }
            self.clause = Clause::new(std::mem::take(&mut self.literals));
            return Ok(true);
        }
        if self.shift > MAX_SHIFT {
            return Err(ProtocolError::LiteralOverflow);
        }
        self.pending |= u64::from(byte & 0x7f) << self.shift;
        if byte & 0x80 != 0 {
            self.shift += 7;
        } else {
            self.literals.push(unzigzag(self.pending)?);
            self.pending = 0;
            self.shift = 0;
        }
        Ok(false)
    }
}

impl Builder for ClauseBuilder {
    type Value = Clause;

    fn add_byte(&mut self, byte: u8) -> Result<bool, ProtocolError> {
        self.progress.begin()?;
        let step = self.step(byte);
        self.progress.record(step)
    }

    fn object(&self) -> Option<&Clause> {
        self.progress.is_finished().then_some(&self.clause)
    }

    fn into_object(self) -> Option<Clause> {
        self.progress.is_finished().then_some(self.clause)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
