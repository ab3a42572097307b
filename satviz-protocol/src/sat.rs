//! SAT value types carried by the protocol.

use std::fmt;

/// An ordered sequence of non-zero literals.
///
/// The wire terminator is not stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Clause {
    literals: Vec<i32>,
}

impl Clause {
    pub fn new(literals: Vec<i32>) -> Self {
        Self { literals }
    }

    pub fn literals(&self) -> &[i32] {
        &self.literals
    }

    pub fn len(&self) -> usize {
        self.literals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.literals.is_empty()
    }

    pub fn into_literals(self) -> Vec<i32> {
        self.literals
    }
}

impl From<Vec<i32>> for Clause {
    fn from(literals: Vec<i32>) -> Self {
        Self::new(literals)
    }
}

impl FromIterator<i32> for Clause {
    fn from_iter<I: IntoIterator<Item = i32>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for lit in &self.literals {
            write!(f, "{} ", lit)?;
        }
        write!(f, "0")
    }
}

/// Whether a clause is added to or removed from the formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UpdateKind {
    Add = 0,
    Remove = 1,
}

impl TryFrom<u8> for UpdateKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(UpdateKind::Add),
            1 => Ok(UpdateKind::Remove),
            other => Err(other),
        }
    }
}

/// A single change to the clause database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClauseUpdate {
    pub clause: Clause,
    pub kind: UpdateKind,
}

impl ClauseUpdate {
    pub fn new(clause: impl Into<Clause>, kind: UpdateKind) -> Self {
        Self {
            clause: clause.into(),
            kind,
        }
    }

    pub fn add(clause: impl Into<Clause>) -> Self {
        Self::new(clause, UpdateKind::Add)
    }

    pub fn remove(clause: impl Into<Clause>) -> Self {
        Self::new(clause, UpdateKind::Remove)
    }
}

/// The 2-bit state of one variable in a [`SatAssignment`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariableState {
    #[default]
    DontCare = 0,
    Set = 1,
    Unset = 2,
    Reserved = 3,
}

impl VariableState {
    /// Decodes the low two bits of `bits`.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => VariableState::DontCare,
            1 => VariableState::Set,
            2 => VariableState::Unset,
            _ => VariableState::Reserved,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }
}

/// A (partial) variable assignment with a fixed variable count.
///
/// Variables are numbered `1..=var_count`. States are packed four to a
/// byte, lowest-numbered variable in the low bits, which is also the
/// wire layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SatAssignment {
    var_count: usize,
    packed: Vec<u8>,
}

impl SatAssignment {
    /// Creates an assignment where every variable is `DontCare`.
    pub fn new(var_count: usize) -> Self {
        Self {
            var_count,
            packed: vec![0; packed_len(var_count)],
        }
    }

    /// Builds an assignment from packed bytes.
    ///
    /// Padding bits past `var_count` are cleared.
    pub fn from_packed(var_count: usize, mut packed: Vec<u8>) -> Self {
        packed.resize(packed_len(var_count), 0);
        let used = var_count % 4;
        if used != 0 {
            if let Some(last) = packed.last_mut() {
                *last &= (1u8 << (used * 2)) - 1;
            }
        }
        Self { var_count, packed }
    }

    pub fn var_count(&self) -> usize {
        self.var_count
    }

    pub fn packed(&self) -> &[u8] {
        &self.packed
    }

    /// Returns the state of `var`, `DontCare` when out of range.
    pub fn get(&self, var: usize) -> VariableState {
        if var == 0 || var > self.var_count {
            return VariableState::DontCare;
        }
        let (byte, shift) = position(var);
        VariableState::from_bits(self.packed[byte] >> shift)
    }

    /// Sets the state of `var`. Out-of-range variables are ignored.
    pub fn set(&mut self, var: usize, state: VariableState) -> bool {
        if var == 0 || var > self.var_count {
            return false;
        }
        let (byte, shift) = position(var);
        self.packed[byte] = (self.packed[byte] & !(0b11 << shift)) | (state.bits() << shift);
        true
    }

    /// `var` if it is set, `-var` if it is unset, `0` otherwise.
    pub fn int_state(&self, var: usize) -> i64 {
        match self.get(var) {
            VariableState::Set => var as i64,
            VariableState::Unset => -(var as i64),
            _ => 0,
        }
    }

    /// Iterates `(variable, state)` pairs in variable order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, VariableState)> + '_ {
        (1..=self.var_count).map(move |var| (var, self.get(var)))
    }
}

impl FromIterator<VariableState> for SatAssignment {
    fn from_iter<I: IntoIterator<Item = VariableState>>(iter: I) -> Self {
        let states: Vec<VariableState> = iter.into_iter().collect();
        let mut assignment = SatAssignment::new(states.len());
        for (i, state) in states.into_iter().enumerate() {
            assignment.set(i + 1, state);
        }
        assignment
    }
}

pub(crate) fn packed_len(var_count: usize) -> usize {
    var_count.div_ceil(4)
}

fn position(var: usize) -> (usize, u32) {
    let index = var - 1;
    (index / 4, ((index % 4) * 2) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_display() {
        let clause = Clause::new(vec![1, -2, 3]);
        assert_eq!(clause.to_string(), "1 -2 3 0");
        assert_eq!(Clause::default().to_string(), "0");
    }

    #[test]
    fn test_update_kind_tags() {
        assert_eq!(UpdateKind::try_from(0), Ok(UpdateKind::Add));
        assert_eq!(UpdateKind::try_from(1), Ok(UpdateKind::Remove));
        assert_eq!(UpdateKind::try_from(2), Err(2));
        assert_eq!(UpdateKind::Remove as u8, 1);
    }

    #[test]
    fn test_variable_state_bits() {
        for bits in 0..4u8 {
            assert_eq!(VariableState::from_bits(bits).bits(), bits);
        }
        assert_eq!(VariableState::from_bits(0b110), VariableState::Unset);
    }

    #[test]
    fn test_assignment_get_set() {
        let mut assignment = SatAssignment::new(5);
        assert_eq!(assignment.packed().len(), 2);
        assert!(assignment.iter().all(|(_, s)| s == VariableState::DontCare));

        assert!(assignment.set(1, VariableState::Set));
        assert!(assignment.set(4, VariableState::Reserved));
        assert!(assignment.set(5, VariableState::Unset));
        assert_eq!(assignment.get(1), VariableState::Set);
        assert_eq!(assignment.get(2), VariableState::DontCare);
        assert_eq!(assignment.get(4), VariableState::Reserved);
        assert_eq!(assignment.get(5), VariableState::Unset);
        assert_eq!(assignment.packed(), &[0b1100_0001, 0b0000_0010]);

        assignment.set(1, VariableState::Unset);
        assert_eq!(assignment.get(1), VariableState::Unset);
    }

    #[test]
    fn test_assignment_out_of_range() {
        let mut assignment = SatAssignment::new(3);
        assert!(!assignment.set(0, VariableState::Set));
        assert!(!assignment.set(4, VariableState::Set));
        assert_eq!(assignment.get(0), VariableState::DontCare);
        assert_eq!(assignment.get(100), VariableState::DontCare);
    }

    #[test]
    fn test_assignment_int_state() {
        let assignment: SatAssignment = [
            VariableState::Set,
            VariableState::Unset,
            VariableState::DontCare,
            VariableState::Reserved,
        ]
        .into_iter()
        .collect();
        assert_eq!(assignment.var_count(), 4);
        assert_eq!(assignment.int_state(1), 1);
        assert_eq!(assignment.int_state(2), -2);
        assert_eq!(assignment.int_state(3), 0);
        assert_eq!(assignment.int_state(4), 0);
    }

    #[test]
    fn test_assignment_from_packed_clears_padding() {
        let assignment = SatAssignment::from_packed(2, vec![0xff]);
        assert_eq!(assignment.packed(), &[0b0000_1111]);
        assert_eq!(assignment.get(2), VariableState::Reserved);
        assert_eq!(assignment, {
            let mut a = SatAssignment::new(2);
            a.set(1, VariableState::Reserved);
            a.set(2, VariableState::Reserved);
            a
        });
    }

    #[test]
    fn test_assignment_empty() {
        let assignment = SatAssignment::new(0);
        assert!(assignment.packed().is_empty());
        assert_eq!(assignment.iter().count(), 0);
    }
}
