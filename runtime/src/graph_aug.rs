//! Augmented-graph synthesis for call-stack-aware shortest-path routing:
//! the routine graph rebuilt per navigation step with subroutine-entry and
//! return-to-caller edges layered in.

use std::collections::{HashMap, HashSet, VecDeque};

use acine_core::graph::RoutineGraph;
use acine_core::model::NodeKind;

/// A throwaway routing graph built fresh for one navigation step: the
/// routine's STANDARD-edge adjacency, plus an edge into every subroutine's
/// entry node for each edge that calls one, plus an edge out of every
/// RETURN node reachable from `curr` back to its call-stack return site
/// (recomputed per active stack level, since a RETURN node's *next* hop
/// depends on which call frame it's unwinding).
pub struct AugmentedGraph {
    adjacency: HashMap<String, Vec<String>>,
}

impl AugmentedGraph {
    pub fn build(graph: &RoutineGraph, curr: &str, return_stack: &[Option<String>]) -> Self {
        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for node in graph.routine().nodes.values() {
            let succs = graph.standard_successors(&node.id).to_vec();
            adjacency.insert(node.id.clone(), succs);
        }
        for edge in graph.all_edges() {
            if let Some(entry) = edge.subroutine_entry() {
                adjacency
                    .entry(edge.from.clone())
                    .or_default()
                    .push(entry.to_string());
            }
        }

        add_return_edges(&mut adjacency, graph, curr, return_stack);
        Self { adjacency }
    }

    /// Ranks candidate first hops from `from` towards `to` : repeatedly take the shortest path's first hop, then
    /// remove that one edge from a scratch copy of the adjacency and
    /// recompute, until no path remains. The resulting ordered list is used
    /// by edge ranking to score how "close" each outgoing edge's
    /// destination is to the target.
    pub fn ranking(&self, from: &str, to: &str) -> Vec<String> {
        let mut adjacency = self.adjacency.clone();
        let mut result = Vec::new();
        loop {
            let scratch = AugmentedGraph {
                adjacency: adjacency.clone(),
            };
            let Some(path) = scratch.shortest_path(from, to) else {
                break;
            };
            if path.len() < 2 {
                break;
            }
            let hop = path[1].clone();
            result.push(hop.clone());
            if let Some(list) = adjacency.get_mut(from) {
                if let Some(pos) = list.iter().position(|x| x == &hop) {
                    list.remove(pos);
                }
            }
        }
        result
    }

    /// Shortest path from `from` to `to`, inclusive of both endpoints. A
    /// single-element path means `from == to` already.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut prev: HashMap<String, String> = HashMap::new();
        visited.insert(from.to_string());
        let mut queue = VecDeque::new();
        queue.push_back(from.to_string());

        while let Some(u) = queue.pop_front() {
            let neighbors = match self.adjacency.get(&u) {
                Some(n) => n,
                None => continue,
            };
            for v in neighbors {
                if visited.contains(v) {
                    continue;
                }
                visited.insert(v.clone());
                prev.insert(v.clone(), u.clone());
                if v == to {
                    let mut path = vec![to.to_string()];
                    let mut cur = to.to_string();
                    while cur != from {
                        let p = prev[&cur].clone();
                        path.push(p.clone());
                        cur = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(v.clone());
            }
        }
        None
    }
}

/// Node ids reachable from `start` via the STANDARD-edge + subroutine-entry
/// adjacency (excluding `start` itself).
fn descendants(graph: &RoutineGraph, start: &str) -> HashSet<String> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start.to_string());
    while let Some(u) = queue.pop_front() {
        for v in graph.standard_successors(&u) {
            if seen.insert(v.clone()) {
                queue.push_back(v.clone());
            }
        }
        for edge in graph.all_edges() {
            if edge.from == u {
                if let Some(entry) = edge.subroutine_entry() {
                    if seen.insert(entry.to_string()) {
                        queue.push_back(entry.to_string());
                    }
                }
            }
        }
    }
    seen
}

/// For each active call-stack level, from innermost to outermost: any
/// RETURN node reachable from that level's vantage point gets a synthetic
/// edge to the level's return site, so a RETURN node's unwind target can be
/// discovered by pathfinding the same way a normal edge would be.
fn add_return_edges(
    adjacency: &mut HashMap<String, Vec<String>>,
    graph: &RoutineGraph,
    curr: &str,
    return_stack: &[Option<String>],
) {
    let mut vantage = curr.to_string();
    for ret in return_stack.iter().skip(1).rev() {
        let Some(ret_id) = ret else { break };
        let mut reachable = descendants(graph, &vantage);
        reachable.insert(vantage.clone());
        for node_id in &reachable {
            if let Some(node) = graph.node(node_id) {
                if node.kind == NodeKind::Return {
                    adjacency.entry(node_id.clone()).or_default().push(ret_id.clone());
                }
            }
        }
        vantage = ret_id.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use acine_core::model::*;
    use std::collections::HashMap as Map;

    fn cond() -> Condition {
        Condition::none()
    }

    fn edge(id: &str, to: &str) -> Edge {
        Edge {
            id: id.into(),
            from: String::new(),
            to: to.into(),
            trigger: EdgeTrigger::Standard,
            precondition: cond(),
            postcondition: cond(),
            action: EdgeAction::None,
            repeat_lower: 1,
            repeat_upper: 1,
            schedules: vec![],
            dependencies: vec![],
        }
    }

    fn node(id: &str, kind: NodeKind, edges: Vec<Edge>) -> Node {
        Node {
            id: id.into(),
            kind,
            default_condition: cond(),
            edges,
        }
    }

    fn routine(nodes: Vec<Node>) -> Routine {
        let mut map = Map::new();
        for n in nodes {
            map.insert(n.id.clone(), n);
        }
        Routine {
            id: "r".into(),
            name: "r".into(),
            window_name: "w".into(),
            start_command: String::new(),
            nodes: map,
            frames: Map::new(),
            scheduling_groups: Map::new(),
        }
    }

    #[test]
    fn finds_direct_path() {
        let r = routine(vec![
            node("start", NodeKind::Standard, vec![edge("e1", "a")]),
            node("a", NodeKind::Standard, vec![]),
        ]);
        let g = RoutineGraph::build(r).unwrap();
        let aug = AugmentedGraph::build(&g, "start", &[None]);
        assert_eq!(
            aug.shortest_path("start", "a"),
            Some(vec!["start".into(), "a".into()])
        );
    }

    #[test]
    fn routes_through_subroutine_entry() {
        let mut sub_edge = edge("e1", "after");
        sub_edge.action = EdgeAction::Subroutine {
            entry: "sub_init".into(),
        };
        let r = routine(vec![
            node("start", NodeKind::Standard, vec![sub_edge]),
            node("sub_init", NodeKind::Init, vec![]),
            node("after", NodeKind::Standard, vec![]),
        ]);
        let g = RoutineGraph::build(r).unwrap();
        let aug = AugmentedGraph::build(&g, "start", &[None]);
        assert_eq!(
            aug.shortest_path("start", "sub_init"),
            Some(vec!["start".into(), "sub_init".into()])
        );
    }

    #[test]
    fn ranking_orders_multiple_first_hops_by_preference() {
        let r = routine(vec![
            node(
                "start",
                NodeKind::Standard,
                vec![edge("via_b", "b"), edge("direct", "a")],
            ),
            node("b", NodeKind::Standard, vec![edge("b_to_a", "a")]),
            node("a", NodeKind::Standard, vec![]),
        ]);
        let g = RoutineGraph::build(r).unwrap();
        let aug = AugmentedGraph::build(&g, "start", &[None]);
        let ranking = aug.ranking("start", "a");
        // the direct hop to `a` is the shortest path's first hop; once
        // removed, the only remaining path goes through `b`.
        assert_eq!(ranking, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn return_node_routes_to_call_stack_site() {
        let r = routine(vec![
            node("start", NodeKind::Standard, vec![]),
            node("sub_init", NodeKind::Init, vec![edge("e1", "sub_ret")]),
            node("sub_ret", NodeKind::Return, vec![]),
            node("after", NodeKind::Standard, vec![]),
        ]);
        let g = RoutineGraph::build(r).unwrap();
        let aug = AugmentedGraph::build(&g, "sub_init", &[None, Some("after".into())]);
        assert_eq!(
            aug.shortest_path("sub_init", "after"),
            Some(vec!["sub_init".into(), "sub_ret".into(), "after".into()])
        );
    }
}
