//! Parsing of clauses and assignments given on the command line.

use satviz_protocol::{Clause, SatAssignment, VariableState};

/// Parses a DIMACS-style literal list such as `"1 -2 3"` or `"1 -2 3 0"`.
///
/// A `0` ends the clause; anything after it is rejected.
pub fn parse_clause(text: &str) -> Result<Clause, String> {
    let mut literals = Vec::new();
    let mut terminated = false;
    for token in text.split_whitespace() {
        if terminated {
            return Err(format!("unexpected '{}' after terminating 0", token));
        }
        let literal: i32 = token
            .parse()
            .map_err(|_| format!("invalid literal '{}'", token))?;
        if literal == 0 {
            terminated = true;
        } else {
            literals.push(literal);
        }
    }
    Ok(Clause::new(literals))
}

/// Parses a model given as signed literals, e.g. `"1 -2 3"`.
///
/// Positive literals are set, negative ones unset. The variable count is the
/// largest variable mentioned unless `var_count` is larger.
pub fn parse_assignment(text: &str, var_count: Option<usize>) -> Result<SatAssignment, String> {
    let clause = parse_clause(text)?;
    let largest = clause
        .literals()
        .iter()
        .map(|l| l.unsigned_abs() as usize)
        .max()
        .unwrap_or(0);
    let mut assignment = SatAssignment::new(var_count.unwrap_or(0).max(largest));
    for &literal in clause.literals() {
        let state = if literal > 0 {
            VariableState::Set
        } else {
            VariableState::Unset
        };
        assignment.set(literal.unsigned_abs() as usize, state);
    }
    Ok(assignment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clause() {
        assert_eq!(parse_clause("1 -2 3").unwrap().literals(), &[1, -2, 3]);
        assert_eq!(parse_clause(" 4\t-5 0 ").unwrap().literals(), &[4, -5]);
        assert!(parse_clause("").unwrap().is_empty());
        assert!(parse_clause("0").unwrap().is_empty());
    }

    #[test]
    fn test_parse_clause_errors() {
        assert_eq!(
            parse_clause("1 x").unwrap_err(),
            "invalid literal 'x'".to_string()
        );
        assert!(parse_clause("1 0 2").is_err());
        assert!(parse_clause("99999999999").is_err());
    }

    #[test]
    fn test_parse_assignment() {
        let assignment = parse_assignment("1 -3", None).unwrap();
        assert_eq!(assignment.var_count(), 3);
        assert_eq!(assignment.get(1), VariableState::Set);
        assert_eq!(assignment.get(2), VariableState::DontCare);
        assert_eq!(assignment.get(3), VariableState::Unset);

        let padded = parse_assignment("-1", Some(8)).unwrap();
        assert_eq!(padded.var_count(), 8);
        assert_eq!(padded.int_state(1), -1);
    }
}
