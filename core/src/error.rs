//! Error handling for this crate
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exec_result::ExecResult;

/// A Result containing a [`SystemError`] with its accompanying source
pub type TypedResult<T> = Result<T, TypedError>;

/// The error taxonomy of the navigation runtime.
///
/// Kinds, not language types: every variant here is something the runtime
/// or scheduler must react to specifically, not just log and forget.
#[derive(Error, Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum SystemError {
    /// No edge leads (directly or through interrupts/subroutines) toward the
    /// target. Fatal for the current `goto`; does not update edge stats.
    #[error("no path to target node")]
    NoPath,
    /// A queued edge's precondition failed to pass before timeout.
    #[error("precondition timed out")]
    PreconditionTimeout,
    /// The action executed (possibly repeated) but the destination state
    /// never verified.
    #[error("postcondition timed out")]
    PostconditionTimeout,
    /// A subroutine failed to reach its RETURN site.
    #[error("subroutine failed to reach a return node")]
    SubroutineExecutionError,
    /// The subroutine returned, but the calling edge's postcondition never
    /// passed.
    #[error("subroutine returned but postcondition timed out")]
    SubroutinePostconditionTimeout,
    /// Cooperative cancellation of an in-flight `goto`/`queue_edge`.
    #[error("navigation was interrupted")]
    Interrupt,
    /// A node/edge id referenced by the caller or by the routine itself does
    /// not exist.
    #[error("routine references a missing node or edge")]
    Structural,
}

impl SystemError {
    /// Maps a terminal runtime outcome to the [`ExecResult`] level the
    /// scheduler uses to satisfy dependencies on partial progress.
    ///
    /// `NoPath` maps to `Attempt` (the edge was attempted but nothing moved),
    /// timeouts map to the stage they failed at, and anything else that
    /// reaches this point without a `SystemError` is success (`Completion`),
    /// which callers represent directly rather than through this function.
    pub fn exec_result(self) -> ExecResult {
        match self {
            SystemError::NoPath => ExecResult::Attempt,
            SystemError::PreconditionTimeout => ExecResult::Check,
            SystemError::PostconditionTimeout
            | SystemError::SubroutineExecutionError
            | SystemError::SubroutinePostconditionTimeout => ExecResult::Execute,
            SystemError::Interrupt | SystemError::Structural => ExecResult::Attempt,
        }
    }

    /// Whether this error should update the failing edge's stats/backoff.
    /// Interrupts and structural errors never do; `NoPath`
    /// doesn't either, since it reflects the graph having no legal move
    /// right now rather than the edge itself failing.
    pub fn updates_backoff(self) -> bool {
        matches!(
            self,
            SystemError::PreconditionTimeout
                | SystemError::PostconditionTimeout
                | SystemError::SubroutineExecutionError
                | SystemError::SubroutinePostconditionTimeout
        )
    }
}

/// Combination of a [`SystemError`] with an anyhow error giving context.
#[derive(Error, Debug)]
#[error("{err}: {source}")]
pub struct TypedError {
    err: SystemError,
    source: anyhow::Error,
}

impl TypedError {
    /// Creates a new TypedError
    pub fn new(err: SystemError, source: anyhow::Error) -> Self {
        Self { err, source }
    }
    /// Returns the SystemError of this TypedError
    pub fn err(&self) -> SystemError {
        self.err
    }
    /// Returns the anyhow error of this TypedError
    pub fn source(&self) -> &anyhow::Error {
        &self.source
    }
}

/// Converts a Result into one of our own Result types
pub trait ResultExt<T> {
    /// Converts a Result to a TypedResult
    fn typ(self, err: SystemError) -> TypedResult<T>;
}

impl<T, E: Into<anyhow::Error>> ResultExt<T> for Result<T, E> {
    fn typ(self, err: SystemError) -> TypedResult<T> {
        self.map_err(|e| TypedError {
            err,
            source: e.into(),
        })
    }
}
