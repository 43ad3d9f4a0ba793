//! The priority-queue scheduler: a heap of scheduled entries gated by
//! count-based dependency satisfaction.
//!
//! An edge is *scheduled* with a deadline and, optionally, dependencies on
//! other edges reaching some [`ExecResult`] level a given number of times.
//! A dependency that isn't already on its way to being satisfied is not
//! just waited on: the scheduler enqueues the runs it needs itself, so
//! scheduling one edge whose dependency graph reaches back through a whole
//! tree of other edges is enough to drive the entire tree to completion.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use async_trait::async_trait;

use acine_core::exec_result::ExecResult;
use acine_core::model::{Dependency, Edge};

/// What the scheduler drives an edge through. Implemented over
/// [`acine_runtime::navigator::Navigator`] by
/// [`crate::runtime_adapter::NavigatorInterface`]; kept as a trait (rather
/// than a concrete dependency on `acine-runtime`'s navigator type) so the
/// scheduler core stays decoupled from how an edge actually gets driven.
#[async_trait]
pub trait SchedulerRoutineInterface: Send {
    /// Drives the routine to the edge's source node and runs its action,
    /// reporting the outcome level reached.
    async fn goto(&mut self, edge_id: &str) -> ExecResult;

    /// Notified once per actual dispatch, before `goto` runs (used for
    /// logging/metrics collaborators; carries no scheduling semantics).
    fn on_scheduled(&mut self, edge_id: &str);
}

#[derive(Debug, Clone)]
struct PendingDependency {
    dependency: Dependency,
    ok_count: u32,
}

impl PendingDependency {
    fn new(dependency: Dependency) -> Self {
        Self {
            dependency,
            ok_count: 0,
        }
    }

    fn is_met(&self) -> bool {
        self.ok_count >= self.dependency.count.max(1)
    }

    fn remaining(&self) -> u32 {
        self.dependency.count.max(1).saturating_sub(self.ok_count)
    }

    /// Applies a just-completed run's result if it's a match for this
    /// dependency's edge and level; returns whether this changed anything.
    fn apply(&mut self, edge_id: &str, result: ExecResult) -> bool {
        if self.is_met() || self.dependency.requires != edge_id || result < self.dependency.requirement {
            return false;
        }
        self.ok_count += 1;
        true
    }
}

struct QueueEntry {
    id: u64,
    edge_id: String,
    deadline_ms: i64,
    deps: Vec<PendingDependency>,
    /// The outcome level this entry itself needs to reach to count as
    /// having made progress;
    /// distinct from any dependency's own required level.
    requirement: ExecResult,
    /// Number of times this entry has been requeued waiting on unmet
    /// dependencies or insufficient progress.
    stalls: u32,
}

impl QueueEntry {
    fn deps_met(&self) -> bool {
        self.deps.iter().all(PendingDependency::is_met)
    }
}

#[derive(PartialEq, Eq)]
struct HeapKey {
    deadline_ms: i64,
    id: u64,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline_ms, self.id).cmp(&(other.deadline_ms, other.id))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-edge bookkeeping outside of any one [`QueueEntry`]: how many
/// outstanding runs of this edge are currently wanted by *something*
/// (either an explicit `schedule` call or another entry's unmet
/// dependency). Multiple entries for the same edge coalesce onto a single
/// counter, so a dependency that's already on its way to being satisfied
/// isn't redundantly scheduled again.
#[derive(Debug, Default, Clone, Copy)]
struct EdgeState {
    pending: u32,
}

/// The scheduler proper. Holds every edge of one routine, a ready-queue
/// ordered by deadline, and the subscriber bookkeeping that lets a
/// completed edge unblock anyone depending on it without a full rescan.
pub struct Scheduler {
    edges: HashMap<String, Edge>,
    edge_state: HashMap<String, EdgeState>,
    entries: HashMap<u64, QueueEntry>,
    queue: BinaryHeap<Reverse<HeapKey>>,
    /// Entry ids subscribed to each edge id's outcome.
    waiters: HashMap<String, Vec<u64>>,
    next_id: u64,
}

impl Scheduler {
    pub fn new(edges: impl IntoIterator<Item = Edge>) -> Self {
        let edges = edges.into_iter().map(|e| (e.id.clone(), e)).collect();
        Self {
            edges,
            edge_state: HashMap::new(),
            entries: HashMap::new(),
            queue: BinaryHeap::new(),
            waiters: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queues `edge_id` to run at or after `deadline_ms`, gated by that
    /// edge's own declared dependencies. Equivalent to
    /// `schedule_with(edge_id, deadline_ms, true, ExecResult::Check)` — the
    /// defaults an externally-initiated run wants (cron dispatch, a manual
    /// `once`).
    pub fn schedule(&mut self, edge_id: &str, deadline_ms: i64) -> anyhow::Result<()> {
        self.schedule_with(edge_id, deadline_ms, true, ExecResult::Check)?;
        Ok(())
    }

    /// `schedule` with explicit control over whether this run bumps the
    /// edge's `pending` counter and which [`ExecResult`] level the entry
    /// itself must reach to count as progress.
    fn schedule_with(
        &mut self,
        edge_id: &str,
        deadline_ms: i64,
        bump_pending: bool,
        requirement: ExecResult,
    ) -> anyhow::Result<u64> {
        let edge = self
            .edges
            .get(edge_id)
            .ok_or_else(|| anyhow::anyhow!("scheduler has no edge '{edge_id}'"))?
            .clone();

        let id = self.next_id;
        self.next_id += 1;

        let deps: Vec<PendingDependency> = edge.dependencies.iter().cloned().map(PendingDependency::new).collect();
        for dep in &deps {
            self.waiters.entry(dep.dependency.requires.clone()).or_default().push(id);
        }

        if bump_pending {
            self.edge_state.entry(edge_id.to_string()).or_default().pending += 1;
        }

        self.entries.insert(
            id,
            QueueEntry {
                id,
                edge_id: edge_id.to_string(),
                deadline_ms,
                deps,
                requirement,
                stalls: 0,
            },
        );
        self.queue.push(Reverse(HeapKey { deadline_ms, id }));
        Ok(id)
    }

    /// The deadline of the earliest entry still waiting, if any — what a
    /// caller should sleep until before calling [`Scheduler::next`] again.
    pub fn next_deadline(&self) -> Option<i64> {
        self.queue.peek().map(|Reverse(k)| k.deadline_ms)
    }

    /// Processes the single earliest-deadline entry due at or before
    /// `now_ms`, if any. Returns `true` if an entry was
    /// due and processed (executed, dropped as already-satisfied, or
    /// requeued because its dependencies aren't met yet or it made
    /// insufficient progress); `false` if nothing is due.
    pub async fn next(&mut self, now_ms: i64, interface: &mut dyn SchedulerRoutineInterface) -> bool {
        loop {
            let Some(&Reverse(ref top)) = self.queue.peek() else {
                return false;
            };
            if top.deadline_ms > now_ms {
                return false;
            }
            let id = top.id;
            self.queue.pop();

            let Some(mut entry) = self.entries.remove(&id) else {
                // stale heap key left behind by a requeue; the live entry
                // has already moved to a new deadline or id.
                continue;
            };

            // if every outstanding need for this edge has already been
            // satisfied by some other coalesced run, this entry is a
            // leftover and is dropped without executing anything.
            if self.edge_state.entry(entry.edge_id.clone()).or_default().pending == 0 {
                return true;
            }

            if !entry.deps_met() {
                self.enqueue_missing_dependency_runs(&entry);
                entry.stalls += 1;
                entry.deadline_ms += 1;
                trace!("edge '{}' stalled on unmet dependencies ({} time(s))", entry.edge_id, entry.stalls);
                let new_deadline = entry.deadline_ms;
                self.entries.insert(id, entry);
                self.queue.push(Reverse(HeapKey {
                    deadline_ms: new_deadline,
                    id,
                }));
                return true;
            }

            if let Some(state) = self.edge_state.get_mut(&entry.edge_id) {
                state.pending = state.pending.saturating_sub(1);
            }
            interface.on_scheduled(&entry.edge_id);
            let result = interface.goto(&entry.edge_id).await;
            let subscriber_progressed = self.broadcast(&entry.edge_id, result, now_ms);

            if result < entry.requirement && !subscriber_progressed {
                // no progress: this run didn't reach the level this entry
                // itself needed, and didn't advance any subscriber either.
                // requeue at the same deadline but a fresh (larger) id, so
                // it sorts after any same-deadline peer.
                self.edge_state.entry(entry.edge_id.clone()).or_default().pending += 1;
                entry.stalls += 1;
                let new_id = self.next_id;
                self.next_id += 1;
                let deadline_ms = entry.deadline_ms;
                entry.id = new_id;
                for dep in &entry.deps {
                    if let Some(ids) = self.waiters.get_mut(&dep.dependency.requires) {
                        ids.push(new_id);
                    }
                }
                self.entries.insert(new_id, entry);
                self.queue.push(Reverse(HeapKey { deadline_ms, id: new_id }));
            }
            return true;
        }
    }

    /// For each of `entry`'s still-unmet dependencies, tops up the
    /// required edge's `pending` count to at least the number of
    /// satisfactions this entry still needs, scheduling the shortfall as
    /// fresh runs one tick after `entry`'s own deadline.
    fn enqueue_missing_dependency_runs(&mut self, entry: &QueueEntry) {
        for dep in &entry.deps {
            if dep.is_met() {
                continue;
            }
            let needed = dep.remaining();
            let have = self
                .edge_state
                .get(&dep.dependency.requires)
                .map(|s| s.pending)
                .unwrap_or(0);
            if have >= needed {
                continue;
            }
            let shortfall = needed - have;
            for _ in 0..shortfall {
                if let Err(e) = self.schedule_with(
                    &dep.dependency.requires,
                    entry.deadline_ms + 1,
                    true,
                    dep.dependency.requirement,
                ) {
                    // the required edge id failed validation at graph-build
                    // time if this ever fires; log and move on rather than
                    // panicking the whole scheduler over one bad edge.
                    warn!("could not auto-schedule dependency: {e}");
                    break;
                }
            }
        }
    }

    /// Notifies every entry subscribed to `edge_id`'s outcome, promoting
    /// any whose dependencies are now fully met to run immediately. An
    /// entry whose dependency needs more than one satisfaction stays subscribed for `edge_id`'s future
    /// completions rather than being dropped after the first one. Returns
    /// whether any subscriber's dependency state actually advanced, which
    /// counts as "progress" for the edge that just ran.
    fn broadcast(&mut self, edge_id: &str, result: ExecResult, now_ms: i64) -> bool {
        let Some(waiter_ids) = self.waiters.get(edge_id).cloned() else {
            return false;
        };

        let mut newly_ready = Vec::new();
        let mut still_waiting = Vec::new();
        let mut advanced = false;
        for id in waiter_ids {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            for dep in entry.deps.iter_mut() {
                if dep.apply(edge_id, result) {
                    advanced = true;
                }
            }
            if entry.deps_met() {
                newly_ready.push(id);
            } else {
                still_waiting.push(id);
            }
        }

        if still_waiting.is_empty() {
            self.waiters.remove(edge_id);
        } else {
            self.waiters.insert(edge_id.to_string(), still_waiting);
        }

        for id in newly_ready {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.deadline_ms = entry.deadline_ms.min(now_ms);
                self.queue.push(Reverse(HeapKey {
                    deadline_ms: entry.deadline_ms,
                    id,
                }));
            }
        }

        advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acine_core::model::*;
    use std::sync::{Arc, Mutex};

    fn cond() -> Condition {
        Condition::none()
    }

    fn edge(id: &str, deps: Vec<Dependency>) -> Edge {
        Edge {
            id: id.into(),
            from: "start".into(),
            to: "a".into(),
            trigger: EdgeTrigger::Standard,
            precondition: cond(),
            postcondition: cond(),
            action: EdgeAction::None,
            repeat_lower: 1,
            repeat_upper: 1,
            schedules: vec![],
            dependencies: deps,
        }
    }

    /// Records every edge id it was asked to run and returns a fixed
    /// result for it from a lookup table (defaulting to `Completion`).
    struct ScriptedInterface {
        calls: Arc<Mutex<Vec<String>>>,
        results: HashMap<String, ExecResult>,
    }

    #[async_trait]
    impl SchedulerRoutineInterface for ScriptedInterface {
        async fn goto(&mut self, edge_id: &str) -> ExecResult {
            self.calls.lock().unwrap().push(edge_id.to_string());
            self.results.get(edge_id).copied().unwrap_or(ExecResult::Completion)
        }

        fn on_scheduled(&mut self, _edge_id: &str) {}
    }

    #[tokio::test]
    async fn runs_an_independent_edge_once_due() {
        let mut scheduler = Scheduler::new(vec![edge("e1", vec![])]);
        scheduler.schedule("e1", 100).unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut iface = ScriptedInterface {
            calls: calls.clone(),
            results: HashMap::new(),
        };

        assert!(!scheduler.next(50, &mut iface).await);
        assert!(scheduler.next(100, &mut iface).await);
        assert_eq!(*calls.lock().unwrap(), vec!["e1".to_string()]);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn dependent_edge_waits_for_its_dependency_to_complete() {
        let dep = Dependency {
            id: "d1".into(),
            requires: "upstream".into(),
            requirement: ExecResult::Completion,
            count: 1,
            kind: DependencyKind::Explicit,
        };
        let mut scheduler = Scheduler::new(vec![edge("upstream", vec![]), edge("downstream", vec![dep])]);
        scheduler.schedule("downstream", 0).unwrap();
        scheduler.schedule("upstream", 0).unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut iface = ScriptedInterface {
            calls: calls.clone(),
            results: HashMap::new(),
        };

        // "downstream" is due but unmet; it stalls. "upstream" then runs
        // and completion immediately promotes "downstream".
        while !scheduler.is_empty() {
            scheduler.next(0, &mut iface).await;
        }
        assert_eq!(*calls.lock().unwrap(), vec!["upstream".to_string(), "downstream".to_string()]);
    }

    #[tokio::test]
    async fn dependency_count_requires_multiple_satisfactions() {
        let dep = Dependency {
            id: "d1".into(),
            requires: "upstream".into(),
            requirement: ExecResult::Completion,
            count: 2,
            kind: DependencyKind::Explicit,
        };
        let mut scheduler = Scheduler::new(vec![edge("upstream", vec![]), edge("downstream", vec![dep])]);
        scheduler.schedule("downstream", 0).unwrap();
        scheduler.schedule("upstream", 0).unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut iface = ScriptedInterface {
            calls: calls.clone(),
            results: HashMap::new(),
        };

        // one completion of "upstream" is not enough; the scheduler itself
        // auto-schedules a second run once it notices "downstream" is still
        // unmet after the first. The auto-scheduled run lands at
        // deadline+1, so the clock must advance past it like the
        // production run loop does, rather than polling a frozen `now`.
        while !scheduler.is_empty() {
            let now = scheduler.next_deadline().unwrap_or(0);
            scheduler.next(now, &mut iface).await;
        }
        assert_eq!(
            calls.lock().unwrap().iter().filter(|c| *c == "upstream").count(),
            2
        );
        assert_eq!(calls.lock().unwrap().last(), Some(&"downstream".to_string()));
    }

    #[tokio::test]
    async fn dependency_below_required_level_does_not_satisfy() {
        let dep = Dependency {
            id: "d1".into(),
            requires: "upstream".into(),
            requirement: ExecResult::Completion,
            count: 1,
            kind: DependencyKind::Explicit,
        };
        let mut scheduler = Scheduler::new(vec![edge("upstream", vec![]), edge("downstream", vec![dep])]);
        scheduler.schedule("downstream", 0).unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut results = HashMap::new();
        results.insert("upstream".to_string(), ExecResult::Attempt);
        let mut iface = ScriptedInterface {
            calls: calls.clone(),
            results,
        };

        // "upstream" is auto-scheduled by the unmet dependency, but it only
        // ever reaches Attempt, which never satisfies a Completion-level
        // dependency; "downstream" must never run. The auto-scheduled run
        // lands at deadline+1, so advance the clock each tick or it would
        // never become due.
        for _ in 0..8 {
            let now = scheduler.next_deadline().unwrap_or(0);
            scheduler.next(now, &mut iface).await;
        }
        assert!(!calls.lock().unwrap().contains(&"downstream".to_string()));
        assert!(calls.lock().unwrap().contains(&"upstream".to_string()));
    }

    #[tokio::test]
    async fn scheduling_one_edge_drives_its_whole_dependency_star() {
        // edges 0..n-1 with edge "n" depending on every one of them;
        // scheduling "n" once must eventually call goto(i) for every i, then
        // goto(n), without ever scheduling the leaves directly.
        const N: usize = 5;
        let mut edges: Vec<Edge> = (0..N).map(|i| edge(&i.to_string(), vec![])).collect();
        let deps: Vec<Dependency> = (0..N)
            .map(|i| Dependency {
                id: format!("d{i}"),
                requires: i.to_string(),
                requirement: ExecResult::Completion,
                count: 1,
                kind: DependencyKind::Explicit,
            })
            .collect();
        edges.push(edge("n", deps));

        let mut scheduler = Scheduler::new(edges);
        scheduler.schedule("n", 0).unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut iface = ScriptedInterface {
            calls: calls.clone(),
            results: HashMap::new(),
        };

        // mirrors the production run loop (main.rs): advance to the next
        // due deadline rather than polling a frozen clock, since entries
        // stalled on unmet dependencies get requeued at a later deadline.
        let mut iterations = 0;
        while !scheduler.is_empty() && iterations < 2 * N + 5 {
            let now = scheduler.next_deadline().unwrap_or(0);
            scheduler.next(now, &mut iface).await;
            iterations += 1;
        }

        assert!(scheduler.is_empty(), "scheduler did not converge within budget");
        let calls = calls.lock().unwrap();
        for i in 0..N {
            assert_eq!(calls.iter().filter(|c| **c == i.to_string()).count(), 1);
        }
        assert_eq!(calls.last(), Some(&"n".to_string()));
    }
}
