//! Adapts an [`acine_runtime::navigator::Navigator`] to
//! [`crate::scheduler::SchedulerRoutineInterface`], so the scheduler can
//! drive a routine's navigation runtime without depending on its concrete
//! type.

use async_trait::async_trait;

use acine_core::exec_result::ExecResult;
use acine_runtime::controller::Controller;
use acine_runtime::navigator::Navigator;

use crate::scheduler::SchedulerRoutineInterface;

/// Owns the navigator and reports every `goto`'s outcome as the
/// [`ExecResult`] level the scheduler uses for dependency gating: success
/// is `Completion`, any [`acine_core::error::SystemError`] maps down
/// through [`acine_core::error::SystemError::exec_result`].
pub struct NavigatorInterface<C: Controller> {
    navigator: Navigator<C>,
}

impl<C: Controller> NavigatorInterface<C> {
    pub fn new(navigator: Navigator<C>) -> Self {
        Self { navigator }
    }

    pub fn navigator(&self) -> &Navigator<C> {
        &self.navigator
    }

    pub fn into_navigator(self) -> Navigator<C> {
        self.navigator
    }
}

#[async_trait]
impl<C: Controller> SchedulerRoutineInterface for NavigatorInterface<C> {
    async fn goto(&mut self, edge_id: &str) -> ExecResult {
        match self.navigator.queue_edge(edge_id).await {
            Ok(()) => ExecResult::Completion,
            Err(e) => {
                debug!("scheduled edge '{edge_id}' did not complete: {e}");
                e.err().exec_result()
            }
        }
    }

    fn on_scheduled(&mut self, edge_id: &str) {
        trace!("dispatching edge '{edge_id}'");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acine_core::graph::RoutineGraph;
    use acine_core::model::*;
    use acine_runtime::controller::FakeController;
    use acine_core::image_match::Bitmap;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn cond() -> Condition {
        Condition::none()
    }

    fn routine() -> Routine {
        let mut nodes = HashMap::new();
        nodes.insert(
            "start".into(),
            Node {
                id: "start".into(),
                kind: NodeKind::Standard,
                default_condition: cond(),
                edges: vec![Edge {
                    id: "e1".into(),
                    from: String::new(),
                    to: "a".into(),
                    trigger: EdgeTrigger::Standard,
                    precondition: cond(),
                    postcondition: cond(),
                    action: EdgeAction::None,
                    repeat_lower: 1,
                    repeat_upper: 1,
                    schedules: vec![],
                    dependencies: vec![],
                }],
            },
        );
        nodes.insert(
            "a".into(),
            Node {
                id: "a".into(),
                kind: NodeKind::Standard,
                default_condition: cond(),
                edges: vec![],
            },
        );
        Routine {
            id: "r".into(),
            name: "r".into(),
            window_name: "w".into(),
            start_command: String::new(),
            nodes,
            frames: HashMap::new(),
            scheduling_groups: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn successful_goto_reports_completion() {
        let graph = Arc::new(RoutineGraph::build(routine()).unwrap());
        let controller = FakeController::new(vec![Bitmap::new(2, 2, vec![1u8; 12])]);
        let navigator = Navigator::new(graph, std::path::PathBuf::from("/nonexistent"), controller, 1);
        let mut iface = NavigatorInterface::new(navigator);
        assert_eq!(iface.goto("e1").await, ExecResult::Completion);
        assert_eq!(iface.navigator().curr(), "a");
    }

    #[tokio::test]
    async fn goto_to_unreachable_node_reports_attempt() {
        let graph = Arc::new(RoutineGraph::build(routine()).unwrap());
        let controller = FakeController::new(vec![Bitmap::new(2, 2, vec![1u8; 12])]);
        let navigator = Navigator::new(graph, std::path::PathBuf::from("/nonexistent"), controller, 1);
        let mut iface = NavigatorInterface::new(navigator);
        // an edge that doesn't exist on the graph can never be queued.
        assert_eq!(iface.goto("missing").await, ExecResult::Attempt);
    }
}
