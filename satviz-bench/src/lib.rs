//! Shared fixtures for the satviz benchmarks.

use satviz_protocol::{ClauseUpdate, SatAssignment, VariableState};

/// Deterministic clause updates with `width` literals each, spread over
/// small and large variable numbers.
pub fn clause_updates(count: usize, width: usize) -> Vec<ClauseUpdate> {
    (0..count)
        .map(|i| {
            let literals: Vec<i32> = (0..width)
                .map(|j| {
                    let var = ((i * 7919 + j * 104_729) % 2_000_000 + 1) as i32;
                    if (i + j) % 2 == 0 {
                        var
                    } else {
                        -var
                    }
                })
                .collect();
            if i % 5 == 4 {
                ClauseUpdate::remove(literals)
            } else {
                ClauseUpdate::add(literals)
            }
        })
        .collect()
}

/// An assignment over `vars` variables cycling through every state.
pub fn assignment(vars: usize) -> SatAssignment {
    (0..vars)
        .map(|i| VariableState::from_bits((i % 4) as u8))
        .collect()
}
