//! Shortest paths over a [`Graph`]: multi-target Dijkstra, and A* for a
//! single goal guided by great-circle distance.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::error::GraphError;
use crate::geo::{haversine_km, GeoPoint};
use crate::graph::{Graph, NodeId};

/// Outcome of routing to one target.
#[derive(Debug, Clone, PartialEq)]
pub enum PathResult {
    Reachable {
        /// Node sequence from start to target, both included.
        nodes: Vec<NodeId>,
        distance_km: f64,
    },
    Unreachable,
}

impl PathResult {
    pub fn is_reachable(&self) -> bool {
        matches!(self, PathResult::Reachable { .. })
    }

    pub fn distance_km(&self) -> Option<f64> {
        match self {
            PathResult::Reachable { distance_km, .. } => Some(*distance_km),
            PathResult::Unreachable => None,
        }
    }

    /// Coordinates along the path, or an empty vector when unreachable.
    pub fn coordinates(&self, graph: &Graph) -> Vec<GeoPoint> {
        match self {
            PathResult::Reachable { nodes, .. } => {
                nodes.iter().filter_map(|id| graph.location(*id)).collect()
            }
            PathResult::Unreachable => Vec::new(),
        }
    }
}

/// Frontier entry; reverses the natural order so `BinaryHeap` pops the
/// smallest priority first, and the smallest node id among equal priorities.
/// The priority is the tentative distance plus the search's heuristic.
#[derive(Debug)]
struct SmallestHolder {
    priority: f64,
    node: NodeId,
}

impl PartialEq for SmallestHolder {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SmallestHolder {}

impl PartialOrd for SmallestHolder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SmallestHolder {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.node.cmp(&self.node))
    }
}

struct Search {
    distance: Vec<f64>,
    predecessor: Vec<Option<NodeId>>,
    finalized: Vec<bool>,
}

impl Search {
    fn new(size: usize) -> Self {
        Self {
            distance: vec![f64::INFINITY; size],
            predecessor: vec![None; size],
            finalized: vec![false; size],
        }
    }

    /// Run until the frontier is empty or `stop` returns true for a newly
    /// finalized node.
    ///
    /// `heuristic` must never overestimate the remaining distance and must be
    /// consistent along edges; a node is final the first time it is popped.
    fn run(
        &mut self,
        graph: &Graph,
        start: NodeId,
        heuristic: impl Fn(NodeId) -> f64,
        mut stop: impl FnMut(NodeId) -> bool,
    ) {
        let mut frontier = BinaryHeap::new();
        self.distance[start.index()] = 0.0;
        frontier.push(SmallestHolder {
            priority: heuristic(start),
            node: start,
        });

        while let Some(SmallestHolder { node, .. }) = frontier.pop() {
            let idx = node.index();
            // Superseded entries surface after the node's best one.
            if self.finalized[idx] {
                continue;
            }
            self.finalized[idx] = true;
            if stop(node) {
                return;
            }

            let distance = self.distance[idx];

            for &(neighbor, weight) in graph.neighbors(node) {
                let n = neighbor.index();
                if self.finalized[n] {
                    continue;
                }
                let candidate = distance + weight;
                if candidate < self.distance[n] {
                    self.distance[n] = candidate;
                    self.predecessor[n] = Some(node);
                    frontier.push(SmallestHolder {
                        priority: candidate + heuristic(neighbor),
                        node: neighbor,
                    });
                }
            }
        }
    }

    fn path_to(&self, target: NodeId) -> PathResult {
        if !self.finalized[target.index()] {
            return PathResult::Unreachable;
        }
        let mut nodes = vec![target];
        let mut current = target;
        while let Some(previous) = self.predecessor[current.index()] {
            nodes.push(previous);
            current = previous;
        }
        nodes.reverse();
        PathResult::Reachable {
            nodes,
            distance_km: self.distance[target.index()],
        }
    }
}

/// Shortest paths from `start` to every node in `targets`.
///
/// Stops as soon as every target has been finalized. Targets not present in
/// the graph, or in another component, are reported unreachable. An unknown
/// `start` makes every target unreachable.
pub fn shortest_paths(
    graph: &Graph,
    start: NodeId,
    targets: &[NodeId],
) -> BTreeMap<NodeId, PathResult> {
    let mut results = BTreeMap::new();
    if start.index() >= graph.node_count() {
        for target in targets {
            results.insert(*target, PathResult::Unreachable);
        }
        return results;
    }

    let mut remaining: BTreeSet<NodeId> = targets
        .iter()
        .copied()
        .filter(|t| t.index() < graph.node_count())
        .collect();

    let mut search = Search::new(graph.node_count());
    if !remaining.is_empty() {
        search.run(graph, start, |_| 0.0, |node| {
            remaining.remove(&node);
            remaining.is_empty()
        });
    }

    for target in targets {
        let result = if target.index() < graph.node_count() {
            search.path_to(*target)
        } else {
            PathResult::Unreachable
        };
        results.insert(*target, result);
    }

    tracing::debug!(
        targets = targets.len(),
        reachable = results.values().filter(|r| r.is_reachable()).count(),
        "computed shortest paths"
    );
    results
}

/// Finalized distance from `start` to every node, `None` where unreachable.
pub fn reachable_distances(graph: &Graph, start: NodeId) -> Vec<Option<f64>> {
    if start.index() >= graph.node_count() {
        return vec![None; graph.node_count()];
    }
    let mut search = Search::new(graph.node_count());
    search.run(graph, start, |_| 0.0, |_| false);
    search
        .finalized
        .iter()
        .zip(&search.distance)
        .map(|(done, d)| done.then_some(*d))
        .collect()
}

/// Shortest path from `start` to `goal` by A*, using the great-circle
/// distance to `goal` as the heuristic.
///
/// Edge weights are great-circle distances between their endpoints, so the
/// heuristic never overestimates and the result matches [`shortest_paths`].
/// Fails with [`GraphError::UnknownNode`] when either end is not in the graph.
pub fn astar(graph: &Graph, start: NodeId, goal: NodeId) -> Result<PathResult, GraphError> {
    let goal_location = graph.location(goal).ok_or(GraphError::UnknownNode(goal))?;
    if graph.location(start).is_none() {
        return Err(GraphError::UnknownNode(start));
    }

    let mut search = Search::new(graph.node_count());
    let mut visited = 0usize;
    search.run(
        graph,
        start,
        |node| {
            graph
                .location(node)
                .map_or(0.0, |location| haversine_km(location, goal_location))
        },
        |node| {
            visited += 1;
            node == goal
        },
    );

    let result = search.path_to(goal);
    tracing::debug!(
        start = %start,
        goal = %goal,
        visited,
        nodes = graph.node_count(),
        distance_km = result.distance_km(),
        "A* search finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Node;

    /// Degrees of latitude per kilometer on a meridian.
    const DEG_PER_KM: f64 = 180.0 / (std::f64::consts::PI * crate::geo::EARTH_RADIUS_KM);

    fn node(lat: f64, lon: f64) -> Node {
        Node {
            location: GeoPoint::new(lat, lon),
            trail_ids: vec![1],
        }
    }

    fn line_graph() -> Graph {
        // A-B-C-D on one meridian, 1, 2 and 1 km apart.
        let lats = [0.0, 1.0, 3.0, 4.0].map(|km| 41.0 + km * DEG_PER_KM);
        Graph::from_edges(lats.iter().map(|&lat| node(lat, 2.0)).collect(), [(0, 1), (1, 2), (2, 3)])
            .unwrap()
    }

    #[test]
    fn test_line_path() {
        let graph = line_graph();
        let results = shortest_paths(&graph, NodeId(0), &[NodeId(3)]);
        match &results[&NodeId(3)] {
            PathResult::Reachable { nodes, distance_km } => {
                assert_eq!(nodes, &[NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
                assert!((distance_km - 4.0).abs() < 1e-6, "got {}", distance_km);
            }
            PathResult::Unreachable => panic!("D should be reachable"),
        }
    }

    #[test]
    fn test_start_is_target() {
        let graph = line_graph();
        let results = shortest_paths(&graph, NodeId(2), &[NodeId(2)]);
        assert_eq!(
            results[&NodeId(2)],
            PathResult::Reachable {
                nodes: vec![NodeId(2)],
                distance_km: 0.0
            }
        );
    }

    #[test]
    fn test_disconnected_target_unreachable() {
        let graph = Graph::from_edges(
            vec![node(41.0, 2.0), node(41.01, 2.0), node(42.0, 2.0), node(42.01, 2.0)],
            [(0, 1), (2, 3)],
        )
        .unwrap();
        let results = shortest_paths(&graph, NodeId(0), &[NodeId(1), NodeId(3), NodeId(99)]);
        assert!(results[&NodeId(1)].is_reachable());
        assert_eq!(results[&NodeId(3)], PathResult::Unreachable);
        assert_eq!(results[&NodeId(99)], PathResult::Unreachable);
    }

    #[test]
    fn test_equal_paths_break_ties_by_node_id() {
        // Square: 0 at bottom, 3 at top, 1 and 2 mirror images left/right.
        let graph = Graph::from_edges(
            vec![node(41.0, 2.0), node(41.5, 1.5), node(41.5, 2.5), node(42.0, 2.0)],
            [(0, 1), (0, 2), (1, 3), (2, 3)],
        )
        .unwrap();
        for _ in 0..5 {
            let results = shortest_paths(&graph, NodeId(0), &[NodeId(3)]);
            match &results[&NodeId(3)] {
                PathResult::Reachable { nodes, .. } => {
                    assert_eq!(nodes, &[NodeId(0), NodeId(1), NodeId(3)])
                }
                PathResult::Unreachable => panic!("top should be reachable"),
            }
        }
    }

    #[test]
    fn test_reachable_distances_cover_component() {
        let graph = Graph::from_edges(
            vec![node(41.0, 2.0), node(41.01, 2.0), node(42.0, 2.0)],
            [(0, 1)],
        )
        .unwrap();
        let distances = reachable_distances(&graph, NodeId(0));
        assert_eq!(distances[0], Some(0.0));
        assert!(distances[1].is_some());
        assert_eq!(distances[2], None);
    }

    #[test]
    fn test_astar_line_path() {
        let graph = line_graph();
        let result = astar(&graph, NodeId(0), NodeId(3)).unwrap();
        assert_eq!(result, shortest_paths(&graph, NodeId(0), &[NodeId(3)])[&NodeId(3)]);
        assert!((result.distance_km().unwrap() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_astar_unknown_nodes() {
        let graph = line_graph();
        assert_eq!(
            astar(&graph, NodeId(0), NodeId(9)),
            Err(GraphError::UnknownNode(NodeId(9)))
        );
        assert_eq!(
            astar(&graph, NodeId(7), NodeId(1)),
            Err(GraphError::UnknownNode(NodeId(7)))
        );
    }

    #[test]
    fn test_astar_disconnected_goal() {
        let graph = Graph::from_edges(
            vec![node(41.0, 2.0), node(41.01, 2.0), node(42.0, 2.0), node(42.01, 2.0)],
            [(0, 1), (2, 3)],
        )
        .unwrap();
        assert_eq!(astar(&graph, NodeId(0), NodeId(3)), Ok(PathResult::Unreachable));
        assert_eq!(
            astar(&graph, NodeId(2), NodeId(2)),
            Ok(PathResult::Reachable {
                nodes: vec![NodeId(2)],
                distance_km: 0.0
            })
        );
    }

    #[test]
    fn test_astar_prefers_shorter_detour() {
        // Straight 0-3 is missing; 0-1-3 hugs the line, 0-2-3 swings wide.
        let graph = Graph::from_edges(
            vec![node(41.0, 2.0), node(41.05, 2.01), node(41.05, 2.2), node(41.1, 2.0)],
            [(0, 1), (1, 3), (0, 2), (2, 3)],
        )
        .unwrap();
        match astar(&graph, NodeId(0), NodeId(3)).unwrap() {
            PathResult::Reachable { nodes, .. } => {
                assert_eq!(nodes, vec![NodeId(0), NodeId(1), NodeId(3)])
            }
            PathResult::Unreachable => panic!("goal should be reachable"),
        }
    }

    #[test]
    fn test_coordinates_follow_path() {
        let graph = line_graph();
        let results = shortest_paths(&graph, NodeId(0), &[NodeId(3)]);
        let coords = results[&NodeId(3)].coordinates(&graph);
        assert_eq!(coords.len(), 4);
        assert_eq!(coords[0], graph.location(NodeId(0)).unwrap());
    }
}
