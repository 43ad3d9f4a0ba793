#[macro_use]
extern crate log;

pub mod backoff;
pub mod context;
pub mod controller;
pub mod graph_aug;
pub mod navigator;

/// Shorthand macro to return a new
/// [`TypedError`](acine_core::error::TypedError).
///
/// Allows expressing
///
/// ```no_run
/// # use anyhow::anyhow;
/// # use acine_core::error::{TypedError, TypedResult, SystemError};
/// # fn main() -> TypedResult<()>{
/// let extra_info = "problem";
/// let problem = anyhow!("a {extra_info} description");
/// return Err(TypedError::new(SystemError::Structural, problem));
/// # }
/// ```
///
/// as a more compact
///
/// ```no_run
/// # use acine_core::error::TypedResult;
/// # use acine_runtime::problem;
/// # fn main() -> TypedResult<()>{
/// # let extra_info = "problem";
/// problem!(Structural, "a {extra_info} description");
/// # }
/// ```
#[macro_export]
macro_rules! problem {
    ($typed_err: expr, $($tail:tt)*) => {{
        #[allow(unused_imports)]
        use ::acine_core::error::SystemError::*;
        let problem = ::anyhow::anyhow!($($tail)*);
        return ::acine_core::error::TypedResult::Err(
            ::acine_core::error::TypedError::new($typed_err, problem)
        );
    }};
}
