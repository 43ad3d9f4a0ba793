//! Periodic dispatch of scheduling-group-bound edges: every edge bound to
//! a group via `Edge.schedules` is queued whenever that group's cron clock
//! comes due.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use acine_core::cron;
use acine_core::model::Routine;

use crate::scheduler::Scheduler;

struct GroupState {
    next_dispatch: DateTime<Utc>,
    edges: Vec<String>,
}

/// Tracks each [`acine_core::model::SchedulingGroup`]'s next due time and
/// the edges bound to it, and pushes them onto a [`Scheduler`] once due.
pub struct Dispatcher {
    groups: HashMap<String, GroupState>,
}

impl Dispatcher {
    /// Builds the dispatcher's state from a routine's scheduling groups and
    /// the edges that bind to them, seeding each group's first due time
    /// relative to `now`.
    pub fn new(routine: &Routine, now: DateTime<Utc>) -> anyhow::Result<Self> {
        let mut linked: HashMap<String, Vec<String>> = HashMap::new();
        for node in routine.nodes.values() {
            for edge in &node.edges {
                for binding in &edge.schedules {
                    linked.entry(binding.group.clone()).or_default().push(edge.id.clone());
                }
            }
        }

        let mut groups = HashMap::new();
        for (group_id, group) in &routine.scheduling_groups {
            let next_dispatch = cron::next_time(now, group)?;
            groups.insert(
                group_id.clone(),
                GroupState {
                    next_dispatch,
                    edges: linked.remove(group_id).unwrap_or_default(),
                },
            );
        }
        Ok(Self { groups })
    }

    /// The earliest `next_dispatch` across all groups, i.e. the instant a
    /// caller with nothing else pending should wake up at.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.groups.values().map(|g| g.next_dispatch).min()
    }

    /// Schedules every due group's linked edges onto `scheduler` and
    /// advances each dispatched group's cron state to its next occurrence.
    pub fn dispatch_due(
        &mut self,
        now: DateTime<Utc>,
        now_ms: i64,
        routine: &Routine,
        scheduler: &mut Scheduler,
    ) -> anyhow::Result<()> {
        for (group_id, state) in self.groups.iter_mut() {
            if state.next_dispatch > now {
                continue;
            }

            for edge_id in &state.edges {
                scheduler.schedule(edge_id, now_ms)?;
            }
            debug!("scheduling group '{group_id}' dispatched {} edge(s)", state.edges.len());

            let group = routine
                .scheduling_groups
                .get(group_id)
                .ok_or_else(|| anyhow::anyhow!("scheduling group '{group_id}' missing from routine"))?;
            state.next_dispatch = cron::next_time(now, group)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acine_core::model::*;
    use chrono::TimeZone;
    use std::collections::HashMap as Map;

    fn cond() -> Condition {
        Condition::none()
    }

    fn edge_bound_to(id: &str, group: &str) -> Edge {
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
            schedules: vec![ScheduleBinding { group: group.into() }],
            dependencies: vec![],
        }
    }

    fn routine_with_one_group() -> Routine {
        let mut nodes = Map::new();
        nodes.insert(
            "start".into(),
            Node {
                id: "start".into(),
                kind: NodeKind::Standard,
                default_condition: cond(),
                edges: vec![edge_bound_to("e1", "g1")],
            },
        );
        let mut groups = Map::new();
        groups.insert(
            "g1".into(),
            SchedulingGroup {
                period: Some(3600),
                period_preset: None,
                dispatch_times: vec![0],
            },
        );
        Routine {
            id: "r".into(),
            name: "r".into(),
            window_name: "w".into(),
            start_command: String::new(),
            nodes,
            frames: Map::new(),
            scheduling_groups: groups,
        }
    }

    #[test]
    fn dispatches_linked_edges_when_due_and_reschedules() {
        let routine = routine_with_one_group();
        let created_at = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let mut dispatcher = Dispatcher::new(&routine, created_at).unwrap();
        // dispatch_times=[0] on an hourly period means "the top of the next
        // hour" (cron::next_time never returns an instant already passed).
        let due_at = created_at + chrono::Duration::hours(1);
        assert_eq!(dispatcher.next_wakeup(), Some(due_at));

        let mut scheduler = Scheduler::new(vec![edge_bound_to("e1", "g1")]);
        dispatcher.dispatch_due(due_at, 0, &routine, &mut scheduler).unwrap();
        assert!(!scheduler.is_empty());

        // the group is rescheduled another hour out.
        assert_eq!(dispatcher.next_wakeup(), Some(due_at + chrono::Duration::hours(1)));
    }

    #[test]
    fn skips_groups_not_yet_due() {
        let routine = routine_with_one_group();
        let created_at = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        let mut dispatcher = Dispatcher::new(&routine, created_at).unwrap();

        let mut scheduler = Scheduler::new(vec![edge_bound_to("e1", "g1")]);
        let too_early = created_at + chrono::Duration::minutes(30);
        dispatcher.dispatch_due(too_early, 0, &routine, &mut scheduler).unwrap();
        assert!(scheduler.is_empty());
    }
}
