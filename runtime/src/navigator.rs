//! The navigation runtime proper: a stack machine that drives a single
//! target window from node to node of a [`RoutineGraph`], one routine and
//! one window per instance.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use acine_core::condition::{self, CheckResult, ConditionRole};
use acine_core::error::{ResultExt, SystemError, TypedResult};
use acine_core::frame_cache::FrameCache;
use acine_core::graph::RoutineGraph;
use acine_core::image_match::Bitmap;
use acine_core::model::{
    Condition, ConditionKind, Edge, EdgeAction, EdgeTrigger, ExecutionInfo, NodeKind, START_NODE_ID,
};

use crate::backoff::next_backoff_ms;
use crate::context::RuntimeContext;
use crate::controller::Controller;
use crate::graph_aug::AugmentedGraph;

const EDGE_RANK_POLL_INTERVAL_MS: u64 = 200;

/// Cooperative cancellation flag shared with a [`Navigator`]. Checked at
/// every poll point inside `goto`/`queue_edge`.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one [`RoutineGraph`] through a single [`Controller`].
pub struct Navigator<C: Controller> {
    graph: Arc<RoutineGraph>,
    frame_dir: std::path::PathBuf,
    frames: FrameCache,
    controller: C,
    rng: StdRng,
    curr: String,
    return_stack: Vec<Option<String>>,
    cancel: CancelHandle,
    /// Per-edge retry/backoff state. Gates edge ranking and is updated on every selection
    /// outcome.
    exec_info: HashMap<String, ExecutionInfo>,
}

impl<C: Controller> Navigator<C> {
    pub fn new(graph: Arc<RoutineGraph>, frame_dir: std::path::PathBuf, controller: C, seed: u64) -> Self {
        Self {
            graph,
            frame_dir,
            frames: FrameCache::default(),
            controller,
            rng: StdRng::seed_from_u64(seed),
            curr: START_NODE_ID.to_string(),
            return_stack: vec![None],
            cancel: CancelHandle::default(),
            exec_info: HashMap::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn curr(&self) -> &str {
        &self.curr
    }

    pub fn get_context(&self) -> RuntimeContext {
        RuntimeContext {
            curr: self.curr.clone(),
            return_stack: self.return_stack.clone(),
        }
    }

    /// Overwrites the current context wholesale, provided every referenced
    /// id still exists in the current routine; otherwise a no-op.
    pub fn restore_context(&mut self, ctx: RuntimeContext) {
        if self.graph.node(&ctx.curr).is_none() {
            return;
        }
        for site in ctx.return_stack.iter().skip(1) {
            match site {
                Some(id) if self.graph.node(id).is_some() => {}
                Some(_) => return,
                None => return,
            }
        }
        self.curr = ctx.curr;
        self.return_stack = ctx.return_stack;
    }

    /// Snapshot of persisted per-edge execution stats, for the scheduler
    /// binary to persist between runs via [`acine_core::exec_info`].
    pub fn exec_info(&self) -> &HashMap<String, ExecutionInfo> {
        &self.exec_info
    }

    pub fn load_exec_info(&mut self, table: HashMap<String, ExecutionInfo>) {
        self.exec_info = table;
    }

    fn check_cancelled(&self) -> TypedResult<()> {
        if self.cancel.is_cancelled() {
            Err(anyhow::anyhow!("navigation cancelled")).typ(SystemError::Interrupt)
        } else {
            Ok(())
        }
    }

    fn node_condition(&self, node_id: &str) -> TypedResult<Condition> {
        self.graph
            .node(node_id)
            .map(|n| n.default_condition.clone())
            .ok_or_else(|| anyhow::anyhow!("unknown node '{node_id}'"))
            .typ(SystemError::Structural)
    }

    fn edge(&self, edge_id: &str) -> TypedResult<Edge> {
        self.graph
            .edge(edge_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown edge '{edge_id}'"))
            .typ(SystemError::Structural)
    }

    fn ready(&self, edge_id: &str) -> bool {
        self.exec_info
            .get(edge_id)
            .map(|info| info.ready_at(acine_core::time::now_ms()))
            .unwrap_or(true)
    }

    /// Records an attempt at `edge_id` regardless of outcome.
    fn mark_attempt(&mut self, edge_id: &str) {
        self.exec_info.entry(edge_id.to_string()).or_default().total_attempts += 1;
    }

    /// Advances backoff on a failed precondition/postcondition check.
    fn mark_failure(&mut self, edge_id: &str) {
        let now = acine_core::time::now_ms();
        let delay = {
            let info = self.exec_info.entry(edge_id.to_string()).or_default();
            info.failure_count += 1;
            info.consecutive_failures += 1;
            next_backoff_ms(info.consecutive_failures, &mut self.rng)
        };
        self.exec_info.get_mut(edge_id).unwrap().next_retry_ms = now + delay as i64;
    }

    fn mark_success(&mut self, edge_id: &str) {
        let info = self.exec_info.entry(edge_id.to_string()).or_default();
        info.consecutive_failures = 0;
        info.next_retry_ms = 0;
    }

    async fn reference_for(&mut self, cond: &Condition) -> TypedResult<Option<Bitmap>> {
        if let ConditionKind::Image(ic) = &cond.kind {
            let bitmap = self
                .frames
                .get_or_load(&self.frame_dir, &ic.frame_id)
                .typ(SystemError::Structural)?
                .clone();
            Ok(Some(bitmap))
        } else {
            Ok(None)
        }
    }

    async fn get_frame(&mut self) -> anyhow::Result<Bitmap> {
        self.controller.get_frame().await
    }

    fn resolved_precondition(&self, edge: &Edge) -> TypedResult<Condition> {
        let from_default = self.node_condition(&edge.from)?;
        let to_default = self.node_condition(&edge.to)?;
        Ok(
            condition::resolve(&edge.precondition, ConditionRole::Precondition, &from_default, &to_default)
                .clone(),
        )
    }

    fn resolved_postcondition(&self, edge: &Edge) -> TypedResult<Condition> {
        let from_default = self.node_condition(&edge.from)?;
        let to_default = self.node_condition(&edge.to)?;
        Ok(
            condition::resolve(&edge.postcondition, ConditionRole::Postcondition, &from_default, &to_default)
                .clone(),
        )
    }

    async fn precondition_passes(&mut self, edge: &Edge, frame: &Bitmap) -> TypedResult<bool> {
        let precondition = self.resolved_precondition(edge)?;
        let reference = self.reference_for(&precondition).await?;
        condition::check_once(&precondition, Some(frame), reference.as_ref(), &mut self.rng)
            .typ(SystemError::Structural)
    }

    /// Navigates to `target`, one edge at a time, synthesizing the
    /// augmented routing graph fresh at every step since the call stack
    /// (and therefore RETURN-node unwind targets) can change underneath it.
    pub async fn goto(&mut self, target: &str) -> TypedResult<()> {
        while self.curr != target {
            self.check_cancelled()?;

            if let Some(node) = self.graph.node(&self.curr) {
                if node.kind == NodeKind::Return {
                    let ret = self
                        .return_stack
                        .pop()
                        .flatten()
                        .ok_or_else(|| anyhow::anyhow!("return stack underflow at node '{}'", self.curr))
                        .typ(SystemError::Structural)?;
                    self.curr = ret;
                    continue;
                }
            }

            let aug = AugmentedGraph::build(&self.graph, &self.curr, &self.return_stack);
            let ranking = aug.ranking(&self.curr, target);
            if ranking.is_empty() {
                return Err(anyhow::anyhow!("no path from '{}' to '{}'", self.curr, target))
                    .typ(SystemError::NoPath);
            }

            let edge_id = self.select_edge(&ranking).await?;
            self.run_action(&edge_id).await?;
        }
        Ok(())
    }

    /// Goes to the edge's source node, then runs its action.
    pub async fn queue_edge(&mut self, edge_id: &str) -> TypedResult<()> {
        let edge = self.edge(edge_id)?;
        self.goto(&edge.from).await?;
        self.run_action(edge_id).await
    }

    /// The distance used for cost-tuple ranking: the smallest index in
    /// `ranking` among the edge's destination and, if it enters a
    /// subroutine, that subroutine's entry node; `-1` if neither appears.
    fn edge_distance(edge: &Edge, ranking: &[String]) -> i64 {
        let to_idx = ranking.iter().position(|n| n == &edge.to);
        let sub_idx = edge
            .subroutine_entry()
            .and_then(|entry| ranking.iter().position(|n| n == entry));
        match (to_idx, sub_idx) {
            (Some(a), Some(b)) => a.min(b) as i64,
            (Some(a), None) => a as i64,
            (None, Some(b)) => b as i64,
            (None, None) => -1,
        }
    }

    /// Polls the current node's outgoing edges until one is selected,
    /// ranked by `(is_not_interrupt, estimated_distance)`.
    /// INTERRUPT edges preempt unconditionally whenever their precondition
    /// passes; among STANDARD edges, a lower-priority one is only
    /// considered once every higher-priority one ahead of it has timed out.
    async fn select_edge(&mut self, ranking: &[String]) -> TypedResult<String> {
        let node = self
            .graph
            .node(&self.curr)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown node '{}'", self.curr))
            .typ(SystemError::Structural)?;

        let mut candidates: Vec<Edge> = node
            .edges
            .iter()
            .filter(|e| {
                e.trigger == EdgeTrigger::Interrupt
                    || (Self::edge_distance(e, ranking) >= 0 && self.ready(&e.id))
            })
            .cloned()
            .collect();

        if candidates.is_empty() {
            return Err(anyhow::anyhow!(
                "no outgoing edge of '{}' leads toward the target",
                self.curr
            ))
            .typ(SystemError::NoPath);
        }

        candidates.sort_by_key(|e| {
            let is_not_interrupt = i64::from(e.trigger != EdgeTrigger::Interrupt);
            (is_not_interrupt, Self::edge_distance(e, ranking))
        });

        let now0 = acine_core::time::now_ms();
        let mut deadlines: HashMap<String, i64> = HashMap::new();
        for e in candidates.iter().filter(|e| e.trigger != EdgeTrigger::Interrupt) {
            let precondition = self.resolved_precondition(e)?;
            deadlines.insert(e.id.clone(), now0 + precondition.timeout_ms() as i64);
        }
        let mut expired: HashSet<String> = HashSet::new();

        loop {
            self.check_cancelled()?;
            let frame = self.get_frame().await.typ(SystemError::PreconditionTimeout)?;
            let now = acine_core::time::now_ms();

            for edge in candidates.iter().filter(|e| e.trigger == EdgeTrigger::Interrupt) {
                if self.precondition_passes(edge, &frame).await? {
                    return Ok(edge.id.clone());
                }
            }

            let mut blocked = false;
            for edge in candidates.iter().filter(|e| e.trigger != EdgeTrigger::Interrupt) {
                if expired.contains(&edge.id) {
                    continue;
                }
                if now >= deadlines[&edge.id] {
                    expired.insert(edge.id.clone());
                    self.mark_failure(&edge.id);
                    continue;
                }
                if self.precondition_passes(edge, &frame).await? {
                    return Ok(edge.id.clone());
                }
                blocked = true;
                break;
            }

            if !blocked {
                let any_active = candidates
                    .iter()
                    .any(|e| e.trigger != EdgeTrigger::Interrupt && !expired.contains(&e.id));
                if !any_active {
                    return Err(anyhow::anyhow!(
                        "no edge of '{}' passed its precondition before timing out",
                        self.curr
                    ))
                    .typ(SystemError::NoPath);
                }
            }

            tokio::time::sleep(Duration::from_millis(EDGE_RANK_POLL_INTERVAL_MS)).await;
        }
    }

    /// Runs one edge's precondition -> action -> postcondition sequence,
    /// repeating the action up to `repeat_upper` times with backoff between
    /// attempts if the postcondition doesn't pass.
    async fn run_action(&mut self, edge_id: &str) -> TypedResult<()> {
        let edge = self.edge(edge_id)?;
        self.mark_attempt(edge_id);

        let precondition = self.resolved_precondition(&edge)?;
        let postcondition = self.resolved_postcondition(&edge)?;

        let pre_reference = self.reference_for(&precondition).await?;
        let (pre_result, _frame) = self
            .poll_condition(&precondition, pre_reference.as_ref(), false)
            .await
            .typ(SystemError::PreconditionTimeout)?;
        if pre_result == CheckResult::Timeout {
            self.mark_failure(edge_id);
            return Err(anyhow::anyhow!("precondition for edge '{edge_id}' timed out"))
                .typ(SystemError::PreconditionTimeout);
        }

        let repeats = self.pick_repeat_count(&edge);
        let post_reference = self.reference_for(&postcondition).await?;

        for attempt in 0..repeats {
            self.check_cancelled()?;
            self.perform_action(&edge).await?;

            let (post_result, _frame) = self
                .poll_condition(&postcondition, post_reference.as_ref(), true)
                .await
                .typ(SystemError::PostconditionTimeout)?;

            if post_result == CheckResult::Pass {
                if !matches!(edge.action, EdgeAction::Subroutine { .. }) {
                    self.curr = edge.to.clone();
                }
                self.mark_success(edge_id);
                return Ok(());
            }

            if attempt + 1 < repeats {
                let delay = next_backoff_ms(attempt, &mut self.rng);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        self.mark_failure(edge_id);
        let err = if matches!(edge.action, EdgeAction::Subroutine { .. }) {
            SystemError::SubroutinePostconditionTimeout
        } else {
            SystemError::PostconditionTimeout
        };
        Err(anyhow::anyhow!("postcondition for edge '{edge_id}' never passed after {repeats} attempt(s)")).typ(err)
    }

    /// Inlines `acine_core::condition::check`'s polling loop rather than
    /// calling it directly: that function takes a generic `FnMut() -> Fut`
    /// frame source, which doesn't reborrow cleanly against `&mut
    /// self.controller` across repeated calls.
    async fn poll_condition(
        &mut self,
        cond: &Condition,
        reference: Option<&Bitmap>,
        no_delay: bool,
    ) -> anyhow::Result<(CheckResult, Bitmap)> {
        if !no_delay && cond.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(cond.delay_ms)).await;
        }

        let deadline = acine_core::time::now_ms() + cond.timeout_ms() as i64;
        loop {
            let frame = self.controller.get_frame().await?;
            if condition::check_once(cond, Some(&frame), reference, &mut self.rng)? {
                return Ok((CheckResult::Pass, frame));
            }
            if acine_core::time::now_ms() >= deadline {
                return Ok((CheckResult::Timeout, frame));
            }
            tokio::time::sleep(Duration::from_millis(cond.interval_ms)).await;
        }
    }

    fn pick_repeat_count(&mut self, edge: &Edge) -> u32 {
        let lower = edge.repeat_lower.max(1);
        // repeat_upper < repeat_lower is treated as "unbounded-ish".
        let upper = if edge.repeat_upper < edge.repeat_lower {
            1000
        } else {
            edge.repeat_upper
        };
        let upper = upper.max(lower);
        if lower == upper {
            lower
        } else {
            self.rng.gen_range(lower..=upper)
        }
    }

    async fn perform_action(&mut self, edge: &Edge) -> TypedResult<()> {
        match &edge.action {
            EdgeAction::None => Ok(()),
            EdgeAction::Replay(replay) => self.run_replay(edge, replay).await,
            EdgeAction::Subroutine { entry } => {
                self.return_stack.push(Some(edge.to.clone()));
                self.curr = entry.clone();
                self.run_subroutine().await
            }
        }
    }

    /// Drives the stack machine from a freshly entered subroutine until it
    /// reaches a RETURN node and pops back to the calling edge's `to`. Any error surfaces as
    /// [`SystemError::SubroutineExecutionError`] unless it is already a more
    /// specific variant (cancellation, structural).
    async fn run_subroutine(&mut self) -> TypedResult<()> {
        let return_site = self
            .return_stack
            .last()
            .cloned()
            .flatten()
            .expect("caller just pushed a return site");

        while self.curr != return_site {
            self.check_cancelled()?;

            if let Some(node) = self.graph.node(&self.curr) {
                if node.kind == NodeKind::Return {
                    self.return_stack.pop();
                    self.curr = return_site;
                    break;
                }
            }

            let aug = AugmentedGraph::build(&self.graph, &self.curr, &self.return_stack);
            let ranking = aug.ranking(&self.curr, &return_site);
            if ranking.is_empty() {
                return Err(anyhow::anyhow!(
                    "subroutine at '{}' never reached a return node",
                    self.curr
                ))
                .typ(SystemError::SubroutineExecutionError);
            }

            let edge_id = self.select_edge(&ranking).await.map_err(|e| {
                if e.err() == SystemError::NoPath {
                    anyhow::anyhow!("subroutine at '{}' has no path to a return node", self.curr)
                        .into()
                } else {
                    e
                }
            })?;
            Box::pin(self.run_action(&edge_id)).await?;
        }
        Ok(())
    }

    /// Replays recorded input events through the controller, honoring each
    /// event's offset from the start of the replay. If
    /// `replay.relative` is set, the offset is derived from matching the
    /// edge's precondition reference image against the current frame.
    async fn run_replay(&mut self, edge: &Edge, replay: &acine_core::model::InputReplay) -> TypedResult<()> {
        let (ox, oy) = if replay.relative {
            self.relative_offset(edge, replay).await?
        } else {
            (0, 0)
        };

        let t0 = acine_core::time::now_ms();
        for event in &replay.events {
            let target_ms = t0 + event.timestamp_ms as i64;
            let now = acine_core::time::now_ms();
            if target_ms > now {
                tokio::time::sleep(Duration::from_millis((target_ms - now) as u64)).await;
            }
            use acine_core::model::InputEventKind::*;
            match &event.kind {
                Move { x, y } => self
                    .controller
                    .mouse_move(x + ox, y + oy)
                    .await
                    .typ(SystemError::Structural)?,
                MouseDown => self.controller.mouse_down().await.typ(SystemError::Structural)?,
                MouseUp => self.controller.mouse_up().await.typ(SystemError::Structural)?,
                KeyDown(_) | KeyUp(_) => {
                    return Err(anyhow::anyhow!("keyboard events are not implemented"))
                        .typ(SystemError::Structural)
                }
            }
        }
        Ok(())
    }

    /// Computes `(dx, dy)` for a relative replay: match the edge's
    /// precondition reference image against the current frame and compare
    /// the top match's position against `replay.offset`. If no match is
    /// found, the offset is zero.
    async fn relative_offset(
        &mut self,
        edge: &Edge,
        replay: &acine_core::model::InputReplay,
    ) -> TypedResult<(i64, i64)> {
        let Some((base_row, base_col)) = replay.offset else {
            return Ok((0, 0));
        };
        let precondition = self.resolved_precondition(edge)?;
        let ConditionKind::Image(ic) = &precondition.kind else {
            return Ok((0, 0));
        };
        let reference = self
            .frames
            .get_or_load(&self.frame_dir, &ic.frame_id)
            .typ(SystemError::Structural)?
            .clone();
        let frame = self.get_frame().await.typ(SystemError::Structural)?;
        let matches = acine_core::image_match::similarity(ic, &frame, &reference, &mut self.rng);
        match matches.first() {
            Some(top) => Ok((top.col - base_col, top.row - base_row)),
            None => Ok((0, 0)),
        }
    }
}
