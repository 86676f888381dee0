//! Route results: the stable payload stored on a completed job.

use serde::{Deserialize, Serialize};

use crate::dijkstra::{shortest_paths, PathResult};
use crate::geo::GeoPoint;
use crate::graph::{BuiltGraph, NodeId};
use crate::polyline::Polyline;
use crate::traits::PointOfInterest;

/// Per-target outcome.
///
/// `distance_km` is the length along the trail graph only. The snap
/// distances from the start point and from the POI to their nodes are
/// reported beside it and never added in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RouteOutcome {
    Reachable {
        path: Polyline,
        distance_km: f64,
        snap_distance_km: f64,
    },
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub poi: PointOfInterest,
    pub outcome: RouteOutcome,
}

impl RouteRecord {
    pub fn is_reachable(&self) -> bool {
        matches!(self.outcome, RouteOutcome::Reachable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    pub start: GeoPoint,
    /// Distance from `start` to the graph node routing began at.
    pub start_snap_km: f64,
    pub total: usize,
    pub reachable: usize,
    pub unreachable: usize,
    /// Ordered by POI id.
    pub routes: Vec<RouteRecord>,
}

impl RouteResult {
    fn from_records(start: GeoPoint, start_snap_km: f64, mut routes: Vec<RouteRecord>) -> Self {
        routes.sort_by(|a, b| a.poi.id.cmp(&b.poi.id).then_with(|| a.poi.name.cmp(&b.poi.name)));
        let reachable = routes.iter().filter(|r| r.is_reachable()).count();
        Self {
            start,
            start_snap_km,
            total: routes.len(),
            reachable,
            unreachable: routes.len() - reachable,
            routes,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Route from `start` to every snapped target of `built`.
pub fn find_routes(built: &BuiltGraph, start: GeoPoint) -> RouteResult {
    let graph = &built.graph;
    let Some((start_node, start_snap_km)) = graph.snap(start) else {
        // A built graph always has a node; keep the result well-formed anyway.
        let routes = built
            .targets
            .iter()
            .map(|snap| RouteRecord {
                poi: snap.poi.clone(),
                outcome: RouteOutcome::Unreachable,
            })
            .collect();
        return RouteResult::from_records(start, 0.0, routes);
    };

    let target_nodes: Vec<NodeId> = built.targets.iter().map(|snap| snap.node).collect();
    let paths = shortest_paths(graph, start_node, &target_nodes);

    let routes = built
        .targets
        .iter()
        .map(|snap| {
            let outcome = match paths.get(&snap.node) {
                Some(path @ PathResult::Reachable { distance_km, .. }) => RouteOutcome::Reachable {
                    path: Polyline::new(path.coordinates(graph)),
                    distance_km: *distance_km,
                    snap_distance_km: snap.distance_km,
                },
                _ => RouteOutcome::Unreachable,
            };
            RouteRecord {
                poi: snap.poi.clone(),
                outcome,
            }
        })
        .collect();

    let result = RouteResult::from_records(start, start_snap_km, routes);
    tracing::info!(
        total = result.total,
        reachable = result.reachable,
        unreachable = result.unreachable,
        "routed to points of interest"
    );
    result
}
