//! The ordered outcome scale reported by the navigation runtime to the
//! scheduler.

use serde::{Deserialize, Serialize};

/// Totally ordered outcome of running an edge. `Attempt < Check < Execute <
/// Completion`. Dependencies are satisfied at a *level*, not a boolean: a
/// dependency requiring only `Check` is satisfied the moment its edge's
/// precondition passes, even if the edge ultimately times out later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExecResult {
    /// The edge was attempted (selected for execution) but made no verified
    /// progress.
    Attempt,
    /// The edge's precondition passed.
    Check,
    /// The edge's action ran to completion (replay finished / subroutine
    /// returned).
    Execute,
    /// The edge's postcondition passed; the transition is fully committed.
    Completion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order() {
        assert!(ExecResult::Attempt < ExecResult::Check);
        assert!(ExecResult::Check < ExecResult::Execute);
        assert!(ExecResult::Execute < ExecResult::Completion);
    }
}
