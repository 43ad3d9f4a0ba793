//! Resolves abstract conditions (none / image / auto / target-of) against a
//! frame and polls them to a pass/timeout verdict.

use std::future::Future;

use rand::RngCore;

use crate::image_match::{check_image, Bitmap};
use crate::model::{Condition, ConditionKind};
use crate::time::now_ms;

/// Which side of an edge a condition is being evaluated for. `Auto`
/// resolves differently depending on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionRole {
    Precondition,
    Postcondition,
}

/// Resolves `Auto`/`Target` indirections to a concrete condition. Must be
/// called fresh before every evaluation — the resolved condition is never
/// stored back onto the edge.
pub fn resolve<'a>(
    cond: &'a Condition,
    role: ConditionRole,
    from_default: &'a Condition,
    to_default: &'a Condition,
) -> &'a Condition {
    match cond.kind {
        ConditionKind::Auto => match role {
            ConditionRole::Precondition => from_default,
            ConditionRole::Postcondition => to_default,
        },
        ConditionKind::Target => to_default,
        _ => cond,
    }
}

/// Outcome of polling a condition to its configured timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Pass,
    Timeout,
}

/// Evaluates a resolved condition once against a single observed frame.
/// Never sleeps or polls. `None` always passes; `Image` requires a reference
/// frame; `Text`/`Auto`/`Target` are programmer errors at this point —
/// callers must resolve indirections via [`resolve`] before reaching here.
pub fn check_once(
    cond: &Condition,
    observed: Option<&Bitmap>,
    reference: Option<&Bitmap>,
    rng: &mut impl RngCore,
) -> anyhow::Result<bool> {
    match &cond.kind {
        ConditionKind::None => Ok(true),
        ConditionKind::Image(ic) => {
            let observed = observed.ok_or_else(|| anyhow::anyhow!("image condition requires an observed frame"))?;
            let reference = reference.ok_or_else(|| anyhow::anyhow!("image condition requires a reference frame"))?;
            Ok(check_image(ic, observed, reference, rng))
        }
        ConditionKind::Text(_) => Err(anyhow::anyhow!("text conditions are not implemented")),
        ConditionKind::Auto | ConditionKind::Target => Err(anyhow::anyhow!(
            "condition must be resolved via condition::resolve before check_once"
        )),
    }
}

/// Polls a resolved condition until it passes or its timeout elapses. `get_frame` captures a fresh observed frame on demand; `reference`
/// is the fixed reference frame for `Image` conditions, if any. Honors
/// `delay_ms` (initial wait before the first check) and `interval_ms`
/// (spacing between checks). If `no_delay` is set the initial `delay_ms`
/// wait is skipped (used when re-checking immediately after an action).
pub async fn check<F, Fut>(
    cond: &Condition,
    mut get_frame: F,
    reference: Option<&Bitmap>,
    no_delay: bool,
    rng: &mut impl RngCore,
) -> anyhow::Result<(CheckResult, Bitmap)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Bitmap>>,
{
    if !no_delay && cond.delay_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(cond.delay_ms)).await;
    }

    let deadline = now_ms() + cond.timeout_ms() as i64;
    loop {
        let frame = get_frame().await?;
        if check_once(cond, Some(&frame), reference, rng)? {
            return Ok((CheckResult::Pass, frame));
        }
        if now_ms() >= deadline {
            return Ok((CheckResult::Timeout, frame));
        }
        tokio::time::sleep(std::time::Duration::from_millis(cond.interval_ms)).await;
    }
}
