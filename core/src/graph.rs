//! Routine graph construction and validation.
//!
//! Loading a routine never mutates it afterwards: this module does the
//! one-time work of filling in `Edge::from`, flattening
//! nodes/edges into lookup tables, and checking every cross-reference the
//! routine makes (edge `to`, subroutine entries, dependency targets,
//! schedule bindings) resolves to something that actually exists. Anything
//! that doesn't is reported as [`SystemError::Structural`].

use std::collections::{HashMap, HashSet};

use anyhow::anyhow;

use crate::error::{ResultExt, SystemError, TypedResult};
use crate::model::{EdgeAction, EdgeTrigger, NodeKind, Routine, START_NODE_ID};

/// A [`Routine`] plus the derived lookup tables and the STANDARD-edges-only
/// pathing graph. Immutable for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct RoutineGraph {
    routine: Routine,
    /// Flattened edge-id -> (owning node id) lookup, for `edges[id]`-style
    /// access used throughout the navigation runtime and scheduler.
    edge_owner: HashMap<String, String>,
    /// STANDARD-trigger adjacency: node id -> destination node ids reachable
    /// by a single STANDARD edge. INTERRUPTs are excluded from pathing;
    /// subroutine edges are added on demand by the navigation runtime, not
    /// stored here.
    standard_adjacency: HashMap<String, Vec<String>>,
}

impl RoutineGraph {
    /// Builds and validates a [`RoutineGraph`] from a freshly loaded
    /// [`Routine`]. Fills in `Edge::from`, which is blank on the wire.
    pub fn build(mut routine: Routine) -> TypedResult<Self> {
        for (node_id, node) in routine.nodes.iter_mut() {
            for edge in node.edges.iter_mut() {
                edge.from = node_id.clone();
            }
        }

        let mut edge_owner = HashMap::new();
        let mut standard_adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for node in routine.nodes.values() {
            standard_adjacency.entry(node.id.clone()).or_default();
            for edge in &node.edges {
                edge_owner.insert(edge.id.clone(), node.id.clone());
                if edge.trigger == EdgeTrigger::Standard {
                    standard_adjacency
                        .entry(node.id.clone())
                        .or_default()
                        .push(edge.to.clone());
                }
            }
        }

        let graph = Self {
            routine,
            edge_owner,
            standard_adjacency,
        };
        graph.validate()?;
        Ok(graph)
    }

    fn validate(&self) -> TypedResult<()> {
        if !self.routine.nodes.contains_key(START_NODE_ID) {
            return Err(anyhow!("routine is missing the '{START_NODE_ID}' entry node"))
                .typ(SystemError::Structural);
        }

        for node in self.routine.nodes.values() {
            if node.kind == NodeKind::Return && !node.edges.is_empty() {
                return Err(anyhow!(
                    "RETURN node '{}' must not have stored outgoing edges",
                    node.id
                ))
                .typ(SystemError::Structural);
            }

            for edge in &node.edges {
                if !self.routine.nodes.contains_key(&edge.to) {
                    return Err(anyhow!(
                        "edge '{}' targets unknown node '{}'",
                        edge.id,
                        edge.to
                    ))
                    .typ(SystemError::Structural);
                }

                if let EdgeAction::Subroutine { entry } = &edge.action {
                    match self.routine.nodes.get(entry) {
                        Some(n) if n.kind == NodeKind::Init => {}
                        Some(_) => {
                            return Err(anyhow!(
                                "edge '{}' enters subroutine at non-INIT node '{}'",
                                edge.id,
                                entry
                            ))
                            .typ(SystemError::Structural)
                        }
                        None => {
                            return Err(anyhow!(
                                "edge '{}' enters unknown subroutine node '{}'",
                                edge.id,
                                entry
                            ))
                            .typ(SystemError::Structural)
                        }
                    }
                }

                for dep in &edge.dependencies {
                    if !self.edge_owner.contains_key(&dep.requires) {
                        return Err(anyhow!(
                            "dependency '{}' on edge '{}' requires unknown edge '{}'",
                            dep.id,
                            edge.id,
                            dep.requires
                        ))
                        .typ(SystemError::Structural);
                    }
                }

                for binding in &edge.schedules {
                    if !self.routine.scheduling_groups.contains_key(&binding.group) {
                        return Err(anyhow!(
                            "edge '{}' binds to unknown scheduling group '{}'",
                            edge.id,
                            binding.group
                        ))
                        .typ(SystemError::Structural);
                    }
                }
            }
        }

        for (group_id, group) in &self.routine.scheduling_groups {
            let mut seen = HashSet::new();
            for t in &group.dispatch_times {
                if !seen.insert(*t) {
                    return Err(anyhow!(
                        "scheduling group '{group_id}' has duplicate dispatch time {t}"
                    ))
                    .typ(SystemError::Structural);
                }
            }
            if group.period.is_some() && group.period_preset.is_some() {
                return Err(anyhow!(
                    "scheduling group '{group_id}' sets both period and period_preset"
                ))
                .typ(SystemError::Structural);
            }
        }

        Ok(())
    }

    pub fn routine(&self) -> &Routine {
        &self.routine
    }

    pub fn node(&self, id: &str) -> Option<&crate::model::Node> {
        self.routine.nodes.get(id)
    }

    pub fn edge(&self, id: &str) -> Option<&crate::model::Edge> {
        let owner = self.edge_owner.get(id)?;
        self.routine.nodes[owner]
            .edges
            .iter()
            .find(|e| e.id == id)
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &crate::model::Edge> {
        self.routine.nodes.values().flat_map(|n| n.edges.iter())
    }

    /// Destination node ids reachable from `node_id` via a single STANDARD
    /// edge.
    pub fn standard_successors(&self, node_id: &str) -> &[String] {
        self.standard_adjacency
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::collections::HashMap;

    fn none_cond() -> Condition {
        Condition::none()
    }

    fn linear_routine() -> Routine {
        let mut nodes = HashMap::new();
        nodes.insert(
            "start".into(),
            Node {
                id: "start".into(),
                kind: NodeKind::Standard,
                default_condition: none_cond(),
                edges: vec![Edge {
                    id: "e1".into(),
                    from: String::new(),
                    to: "a".into(),
                    trigger: EdgeTrigger::Standard,
                    precondition: none_cond(),
                    postcondition: none_cond(),
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
                default_condition: none_cond(),
                edges: vec![],
            },
        );
        Routine {
            id: "r1".into(),
            name: "test".into(),
            window_name: "Test".into(),
            start_command: String::new(),
            nodes,
            frames: HashMap::new(),
            scheduling_groups: HashMap::new(),
        }
    }

    #[test]
    fn builds_and_fills_from() {
        let g = RoutineGraph::build(linear_routine()).unwrap();
        assert_eq!(g.edge("e1").unwrap().from, "start");
        assert_eq!(g.standard_successors("start"), &["a".to_string()]);
    }

    #[test]
    fn rejects_missing_start_node() {
        let mut r = linear_routine();
        r.nodes.remove("start").unwrap();
        // the dangling edge now lives nowhere, so rebuild a minimal routine
        // without a start node at all.
        r.nodes.insert(
            "a".into(),
            Node {
                id: "a".into(),
                kind: NodeKind::Standard,
                default_condition: none_cond(),
                edges: vec![],
            },
        );
        let err = RoutineGraph::build(r).unwrap_err();
        assert_eq!(err.err(), SystemError::Structural);
    }

    #[test]
    fn rejects_edge_to_unknown_node() {
        let mut r = linear_routine();
        r.nodes.get_mut("start").unwrap().edges[0].to = "missing".into();
        let err = RoutineGraph::build(r).unwrap_err();
        assert_eq!(err.err(), SystemError::Structural);
    }

    #[test]
    fn rejects_return_node_with_edges() {
        let mut r = linear_routine();
        let a = r.nodes.get_mut("a").unwrap();
        a.kind = NodeKind::Return;
        a.edges.push(Edge {
            id: "bad".into(),
            from: String::new(),
            to: "start".into(),
            trigger: EdgeTrigger::Standard,
            precondition: none_cond(),
            postcondition: none_cond(),
            action: EdgeAction::None,
            repeat_lower: 1,
            repeat_upper: 1,
            schedules: vec![],
            dependencies: vec![],
        });
        let err = RoutineGraph::build(r).unwrap_err();
        assert_eq!(err.err(), SystemError::Structural);
    }
}
