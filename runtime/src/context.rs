//! Snapshot of a [`crate::navigator::Navigator`]'s position in the call
//! stack. Used to save/restore state
//! around a navigation attempt that might be cancelled partway through.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    pub curr: String,
    /// `None` at index 0 is the sentinel bottom-of-stack (no caller);
    /// every subsequent entry is the return site of an active subroutine
    /// call, innermost last.
    pub return_stack: Vec<Option<String>>,
}

impl RuntimeContext {
    pub fn at_start(start_node: &str) -> Self {
        Self {
            curr: start_node.to_string(),
            return_stack: vec![None],
        }
    }
}
