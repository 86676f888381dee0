//! Weighted walkability graph built from reduced trail points.
//!
//! Nodes live in an arena addressed by [`NodeId`]; edges are stored once in an
//! index-based list and mirrored into per-node adjacency lists sorted by
//! neighbor id. An R-tree over node coordinates answers snapping queries.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::geo::{haversine_km, GeoPoint};
use crate::reducer::ReducedPoint;
use crate::traits::{PointOfInterest, TrailId};

/// Stable index of a node inside one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub location: GeoPoint,
    pub trail_ids: Vec<TrailId>,
}

/// Undirected edge. `a < b` always holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub a: NodeId,
    pub b: NodeId,
    pub weight_km: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Remove degree-2 nodes whose neighbours lie within this many degrees of
    /// a straight line through them. `None` keeps every node.
    pub simplify_collinear_deg: Option<f64>,
}

type IndexedNode = GeomWithData<[f64; 2], u32>;

pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<(NodeId, f64)>>,
    index: RTree<IndexedNode>,
    lon_scale: f64,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .finish()
    }
}

impl Graph {
    /// Build a graph from nodes and index pairs into `nodes`.
    ///
    /// Nodes at identical coordinates are merged first so no zero-length edge
    /// between distinct nodes can exist. Self-pairs and duplicate pairs are
    /// dropped; out-of-range pairs are ignored.
    pub fn from_edges(
        nodes: Vec<Node>,
        pairs: impl IntoIterator<Item = (usize, usize)>,
    ) -> Result<Self, GraphError> {
        let (nodes, remap) = merge_coincident(nodes);
        if nodes.is_empty() {
            return Err(GraphError::EmptyGraph);
        }

        let mut unique: BTreeSet<(usize, usize)> = BTreeSet::new();
        for (a, b) in pairs {
            let (Some(&a), Some(&b)) = (remap.get(a), remap.get(b)) else {
                continue;
            };
            if a != b {
                unique.insert((a.min(b), a.max(b)));
            }
        }

        let edges = unique
            .into_iter()
            .map(|(a, b)| Edge {
                a: NodeId(a as u32),
                b: NodeId(b as u32),
                weight_km: haversine_km(nodes[a].location, nodes[b].location),
            })
            .collect();

        Ok(Self::assemble(nodes, edges))
    }

    fn assemble(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut adjacency: Vec<Vec<(NodeId, f64)>> = vec![Vec::new(); nodes.len()];
        for edge in &edges {
            adjacency[edge.a.index()].push((edge.b, edge.weight_km));
            adjacency[edge.b.index()].push((edge.a, edge.weight_km));
        }
        for list in &mut adjacency {
            list.sort_by_key(|(neighbor, _)| *neighbor);
        }

        let mean_lat =
            nodes.iter().map(|n| n.location.lat).sum::<f64>() / nodes.len().max(1) as f64;
        let lon_scale = mean_lat.to_radians().cos().max(0.01);
        let index = RTree::bulk_load(
            nodes
                .iter()
                .enumerate()
                .map(|(i, n)| GeomWithData::new([n.location.lat, n.location.lon * lon_scale], i as u32))
                .collect(),
        );

        Self {
            nodes,
            edges,
            adjacency,
            index,
            lon_scale,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn location(&self, id: NodeId) -> Option<GeoPoint> {
        self.node(id).map(|n| n.location)
    }

    /// Neighbors of `id` with edge weights, sorted by neighbor id.
    pub fn neighbors(&self, id: NodeId) -> &[(NodeId, f64)] {
        self.adjacency
            .get(id.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Nearest node to `point` and its great-circle distance in kilometers.
    pub fn snap(&self, point: GeoPoint) -> Option<(NodeId, f64)> {
        let query = [point.lat, point.lon * self.lon_scale];
        let nearest = self.index.nearest_neighbor(&query)?;
        let id = NodeId(nearest.data);
        let distance = haversine_km(point, self.nodes[id.index()].location);
        Some((id, distance))
    }

    /// Number of connected components.
    pub fn component_count(&self) -> usize {
        let mut seen = vec![false; self.nodes.len()];
        let mut components = 0;
        let mut stack = Vec::new();
        for start in 0..self.nodes.len() {
            if seen[start] {
                continue;
            }
            components += 1;
            seen[start] = true;
            stack.push(start);
            while let Some(current) = stack.pop() {
                for (neighbor, _) in &self.adjacency[current] {
                    if !seen[neighbor.index()] {
                        seen[neighbor.index()] = true;
                        stack.push(neighbor.index());
                    }
                }
            }
        }
        components
    }
}

/// A point of interest attached to its nearest graph node.
#[derive(Debug, Clone, PartialEq)]
pub struct Snap {
    pub poi: PointOfInterest,
    pub node: NodeId,
    /// Straight-line distance from the POI to the node. Not part of any edge.
    pub distance_km: f64,
}

/// A graph together with the snapped routing targets.
#[derive(Debug)]
pub struct BuiltGraph {
    pub graph: Graph,
    pub targets: Vec<Snap>,
}

/// Build the walkability graph and snap `pois` onto it.
///
/// `adjacency` indexes into `points`. Fails with [`GraphError::EmptyGraph`]
/// when there are no points. POIs with invalid coordinates are skipped.
pub fn build(
    points: &[ReducedPoint],
    adjacency: &[(usize, usize)],
    pois: &[PointOfInterest],
    options: &GraphOptions,
) -> Result<BuiltGraph, GraphError> {
    let nodes = points
        .iter()
        .map(|p| Node {
            location: p.location,
            trail_ids: p.trail_ids.clone(),
        })
        .collect();

    let mut graph = Graph::from_edges(nodes, adjacency.iter().copied())?;

    if let Some(epsilon) = options.simplify_collinear_deg {
        let before = graph.node_count();
        graph = simplify_collinear(graph, epsilon);
        tracing::debug!(
            removed = before - graph.node_count(),
            epsilon,
            "simplified collinear nodes"
        );
    }

    let mut targets = Vec::with_capacity(pois.len());
    for poi in pois {
        if !poi.location.is_valid() {
            tracing::warn!(poi = %poi.id, "skipping point of interest with invalid location");
            continue;
        }
        if let Some((node, distance_km)) = graph.snap(poi.location) {
            targets.push(Snap {
                poi: poi.clone(),
                node,
                distance_km,
            });
        }
    }

    let components = graph.component_count();
    if components > 1 {
        tracing::warn!(components, "trail graph is not fully connected");
    }
    tracing::info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        targets = targets.len(),
        "built trail graph"
    );

    Ok(BuiltGraph { graph, targets })
}

fn merge_coincident(nodes: Vec<Node>) -> (Vec<Node>, Vec<usize>) {
    let mut by_key: HashMap<(u64, u64), usize> = HashMap::new();
    let mut merged: Vec<Node> = Vec::with_capacity(nodes.len());
    let mut remap = Vec::with_capacity(nodes.len());

    for node in nodes {
        match by_key.get(&node.location.exact_key()) {
            Some(&existing) => {
                let target = &mut merged[existing];
                target.trail_ids.extend(node.trail_ids);
                target.trail_ids.sort_unstable();
                target.trail_ids.dedup();
                remap.push(existing);
            }
            None => {
                by_key.insert(node.location.exact_key(), merged.len());
                remap.push(merged.len());
                merged.push(node);
            }
        }
    }

    (merged, remap)
}

/// Interior angle at `b` in degrees, from the three side lengths.
fn angle_at(a: GeoPoint, b: GeoPoint, c: GeoPoint) -> Option<f64> {
    let ab = haversine_km(a, b);
    let bc = haversine_km(b, c);
    let ac = haversine_km(a, c);
    if ab == 0.0 || bc == 0.0 {
        return None;
    }
    let cos = ((ab * ab + bc * bc - ac * ac) / (2.0 * ab * bc)).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

fn simplify_collinear(graph: Graph, epsilon_deg: f64) -> Graph {
    let Graph { nodes, edges, .. } = graph;
    let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); nodes.len()];
    for edge in &edges {
        links[edge.a.index()].insert(edge.b.index(), edge.weight_km);
        links[edge.b.index()].insert(edge.a.index(), edge.weight_km);
    }

    let mut removed = vec![false; nodes.len()];
    for b in 0..nodes.len() {
        if links[b].len() != 2 {
            continue;
        }
        let mut ends = links[b].keys().copied();
        let (Some(a), Some(c)) = (ends.next(), ends.next()) else {
            continue;
        };
        // Joining a and c directly would lose a distinct route if they are
        // already connected.
        if links[a].contains_key(&c) {
            continue;
        }
        let Some(angle) = angle_at(nodes[a].location, nodes[b].location, nodes[c].location)
        else {
            continue;
        };
        if 180.0 - angle > epsilon_deg {
            continue;
        }

        links[a].remove(&b);
        links[c].remove(&b);
        links[b].clear();
        let weight = haversine_km(nodes[a].location, nodes[c].location);
        links[a].insert(c, weight);
        links[c].insert(a, weight);
        removed[b] = true;
    }

    let mut remap = vec![usize::MAX; nodes.len()];
    let mut kept = Vec::new();
    for (i, node) in nodes.into_iter().enumerate() {
        if !removed[i] {
            remap[i] = kept.len();
            kept.push(node);
        }
    }

    let mut new_edges = Vec::new();
    for (a, neighbors) in links.iter().enumerate() {
        for (&b, &weight_km) in neighbors {
            if a < b && !removed[a] && !removed[b] {
                let (na, nb) = (remap[a], remap[b]);
                new_edges.push(Edge {
                    a: NodeId(na.min(nb) as u32),
                    b: NodeId(na.max(nb) as u32),
                    weight_km,
                });
            }
        }
    }
    new_edges.sort_by_key(|e| (e.a, e.b));

    Graph::assemble(kept, new_edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(lat: f64, lon: f64) -> Node {
        Node {
            location: GeoPoint::new(lat, lon),
            trail_ids: vec![1],
        }
    }

    fn poi(id: &str, lat: f64, lon: f64) -> PointOfInterest {
        PointOfInterest {
            id: id.to_string(),
            name: id.to_string(),
            kind: "religious".to_string(),
            location: GeoPoint::new(lat, lon),
        }
    }

    #[test]
    fn test_empty_graph_fails() {
        let result = build(&[], &[], &[], &GraphOptions::default());
        assert!(matches!(result, Err(GraphError::EmptyGraph)));
    }

    #[test]
    fn test_edges_are_haversine_weighted() {
        let graph = Graph::from_edges(vec![node(41.0, 2.0), node(41.01, 2.0)], [(0, 1)]).unwrap();
        assert_eq!(graph.edge_count(), 1);
        let expected = haversine_km(GeoPoint::new(41.0, 2.0), GeoPoint::new(41.01, 2.0));
        assert_eq!(graph.edges()[0].weight_km, expected);
        assert_eq!(graph.neighbors(NodeId(0)), &[(NodeId(1), expected)]);
    }

    #[test]
    fn test_self_loops_and_duplicates_dropped() {
        let graph = Graph::from_edges(
            vec![node(41.0, 2.0), node(41.01, 2.0)],
            [(0, 0), (0, 1), (1, 0), (0, 1)],
        )
        .unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_coincident_nodes_merged() {
        let graph = Graph::from_edges(
            vec![node(41.0, 2.0), node(41.01, 2.0), node(41.0, 2.0)],
            [(0, 1), (1, 2)],
        )
        .unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.edges().iter().all(|e| e.weight_km > 0.0));
    }

    #[test]
    fn test_snap_picks_nearest_node() {
        let graph = Graph::from_edges(
            vec![node(41.0, 2.0), node(41.01, 2.0), node(41.02, 2.0)],
            [(0, 1), (1, 2)],
        )
        .unwrap();
        let (id, distance) = graph.snap(GeoPoint::new(41.0101, 2.0001)).unwrap();
        assert_eq!(id, NodeId(1));
        assert!(distance < 0.05);
    }

    #[test]
    fn test_build_snaps_pois() {
        let points = vec![
            ReducedPoint::new(GeoPoint::new(41.0, 2.0), vec![1]),
            ReducedPoint::new(GeoPoint::new(41.01, 2.0), vec![1]),
        ];
        let pois = vec![poi("castle", 41.0099, 2.0), poi("broken", f64::NAN, 2.0)];
        let built = build(&points, &[(0, 1)], &pois, &GraphOptions::default()).unwrap();

        assert_eq!(built.targets.len(), 1);
        assert_eq!(built.targets[0].node, NodeId(1));
        assert!(built.targets[0].distance_km > 0.0);
    }

    #[test]
    fn test_component_count() {
        let graph = Graph::from_edges(
            vec![node(41.0, 2.0), node(41.01, 2.0), node(42.0, 2.0), node(42.01, 2.0)],
            [(0, 1), (2, 3)],
        )
        .unwrap();
        assert_eq!(graph.component_count(), 2);
    }

    #[test]
    fn test_collinear_simplification() {
        let points = vec![
            ReducedPoint::new(GeoPoint::new(41.0, 2.0), vec![1]),
            ReducedPoint::new(GeoPoint::new(41.01, 2.0), vec![1]),
            ReducedPoint::new(GeoPoint::new(41.02, 2.0), vec![1]),
        ];
        let options = GraphOptions {
            simplify_collinear_deg: Some(1.0),
        };
        let built = build(&points, &[(0, 1), (1, 2)], &[], &options).unwrap();
        assert_eq!(built.graph.node_count(), 2);
        assert_eq!(built.graph.edge_count(), 1);
    }

    #[test]
    fn test_simplification_keeps_corners() {
        let points = vec![
            ReducedPoint::new(GeoPoint::new(41.0, 2.0), vec![1]),
            ReducedPoint::new(GeoPoint::new(41.01, 2.0), vec![1]),
            ReducedPoint::new(GeoPoint::new(41.01, 2.01), vec![1]),
        ];
        let options = GraphOptions {
            simplify_collinear_deg: Some(1.0),
        };
        let built = build(&points, &[(0, 1), (1, 2)], &[], &options).unwrap();
        assert_eq!(built.graph.node_count(), 3);
    }
}
