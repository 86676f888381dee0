//! Point reduction for large trail point clouds.
//!
//! Raw trail downloads can reach tens of thousands of points. Above a
//! configurable cap the points are grouped with a seeded mini-batch k-means
//! and each group is replaced by the centroid of its members. At or below the
//! cap the input is returned untouched so small areas keep exact coordinates.
//!
//! Segment topology survives the reduction: [`reduce_segments`] maps every
//! pair of consecutive raw points onto their groups, so edges only ever join
//! groups whose members were adjacent on the same trail.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;
use crate::traits::{TrailId, TrailSegment};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerOptions {
    /// Upper bound on the number of reduced points. Inputs at or below the cap
    /// are returned unchanged.
    pub cap: usize,
    /// Target number of raw points per group when reducing.
    pub points_per_cluster: usize,
    /// Points sampled per mini-batch iteration.
    pub batch_size: usize,
    pub max_iterations: usize,
    /// Stop once no center moves further than this many degrees in an iteration.
    pub tolerance_deg: f64,
    pub seed: u64,
}

impl Default for ReducerOptions {
    fn default() -> Self {
        Self {
            cap: 1000,
            points_per_cluster: 10,
            batch_size: 1000,
            max_iterations: 100,
            tolerance_deg: 1e-7,
            seed: 0,
        }
    }
}

impl ReducerOptions {
    /// Number of groups used for an input of `n` points above the cap.
    pub fn cluster_count(&self, n: usize) -> usize {
        let per_cluster = self.points_per_cluster.max(1);
        n.div_ceil(per_cluster).min(self.cap.max(1)).max(1)
    }
}

/// A representative point and the trails it stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedPoint {
    pub location: GeoPoint,
    /// Sorted, deduplicated trail ids.
    pub trail_ids: Vec<TrailId>,
}

impl ReducedPoint {
    pub fn new(location: GeoPoint, trail_ids: Vec<TrailId>) -> Self {
        Self {
            location,
            trail_ids,
        }
    }
}

/// Output of [`reduce`]: the representatives plus, for every input point, the
/// index of the representative it was folded into.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub points: Vec<ReducedPoint>,
    pub assignment: Vec<usize>,
}

impl Reduction {
    fn identity(points: &[ReducedPoint]) -> Self {
        Self {
            points: points.to_vec(),
            assignment: (0..points.len()).collect(),
        }
    }
}

/// Reduced points together with the adjacency carried over from the raw
/// trails. Adjacency pairs index into `points`, are ordered `(low, high)`,
/// sorted and contain no self-pairs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReducedNetwork {
    pub points: Vec<ReducedPoint>,
    pub adjacency: Vec<(usize, usize)>,
    /// Number of distinct raw coordinates before reduction.
    pub raw_points: usize,
}

/// Collapse `points` into at most `options.cap` representatives.
///
/// Identity when `points.len() <= options.cap`. Deterministic for a fixed
/// `options.seed`.
pub fn reduce(points: &[ReducedPoint], options: &ReducerOptions) -> Reduction {
    if points.len() <= options.cap {
        return Reduction::identity(points);
    }

    let k = options.cluster_count(points.len());
    let projection = Projection::for_points(points);
    let projected: Vec<[f64; 2]> = points
        .iter()
        .map(|p| projection.project(p.location))
        .collect();

    let centers = mini_batch_kmeans(&projected, k, options);
    let labels = assign_nearest(&projected, &centers);

    group_members(points, &labels, centers.len())
}

/// Flatten trail segments into unique points, reduce them, and rebuild the
/// adjacency between consecutive points on each trail.
pub fn reduce_segments(segments: &[TrailSegment], options: &ReducerOptions) -> ReducedNetwork {
    // Providers return segments in no particular order; fix one so the
    // reduction seed sees the same input every time.
    let mut ordered: Vec<&TrailSegment> = segments.iter().collect();
    ordered.sort_by(|a, b| {
        a.trail_id.cmp(&b.trail_id).then_with(|| {
            let ka = a.points.first().map(GeoPoint::exact_key);
            let kb = b.points.first().map(GeoPoint::exact_key);
            ka.cmp(&kb)
        })
    });

    let mut index: HashMap<(u64, u64), usize> = HashMap::new();
    let mut unique: Vec<GeoPoint> = Vec::new();
    let mut trails: Vec<BTreeSet<TrailId>> = Vec::new();
    // Runs of consecutive valid points; an invalid point breaks the trail.
    let mut segment_indices: Vec<Vec<usize>> = Vec::with_capacity(ordered.len());

    for segment in &ordered {
        let mut indices = Vec::with_capacity(segment.points.len());
        for point in &segment.points {
            if !point.is_valid() {
                tracing::debug!(trail_id = segment.trail_id, "splitting trail at invalid point");
                segment_indices.push(std::mem::take(&mut indices));
                continue;
            }
            let idx = *index.entry(point.exact_key()).or_insert_with(|| {
                unique.push(*point);
                trails.push(BTreeSet::new());
                unique.len() - 1
            });
            trails[idx].insert(segment.trail_id);
            indices.push(idx);
        }
        segment_indices.push(indices);
    }

    let raw: Vec<ReducedPoint> = unique
        .into_iter()
        .zip(trails)
        .map(|(location, ids)| ReducedPoint::new(location, ids.into_iter().collect()))
        .collect();

    let reduction = reduce(&raw, options);

    let mut adjacency: BTreeSet<(usize, usize)> = BTreeSet::new();
    for indices in &segment_indices {
        for pair in indices.windows(2) {
            let a = reduction.assignment[pair[0]];
            let b = reduction.assignment[pair[1]];
            if a != b {
                adjacency.insert((a.min(b), a.max(b)));
            }
        }
    }

    tracing::info!(
        raw_points = raw.len(),
        reduced_points = reduction.points.len(),
        edges = adjacency.len(),
        "reduced trail points"
    );

    ReducedNetwork {
        points: reduction.points,
        adjacency: adjacency.into_iter().collect(),
        raw_points: raw.len(),
    }
}

/// Local equirectangular projection so planar distances approximate ground
/// distances inside a small area.
#[derive(Debug, Clone, Copy)]
struct Projection {
    lon_scale: f64,
}

impl Projection {
    fn for_points(points: &[ReducedPoint]) -> Self {
        let mean_lat =
            points.iter().map(|p| p.location.lat).sum::<f64>() / points.len().max(1) as f64;
        Self {
            lon_scale: mean_lat.to_radians().cos().max(0.01),
        }
    }

    fn project(&self, point: GeoPoint) -> [f64; 2] {
        [point.lat, point.lon * self.lon_scale]
    }
}

type Center = GeomWithData<[f64; 2], usize>;

fn center_index(centers: &[[f64; 2]]) -> RTree<Center> {
    RTree::bulk_load(
        centers
            .iter()
            .enumerate()
            .map(|(i, c)| GeomWithData::new(*c, i))
            .collect(),
    )
}

fn nearest_center(tree: &RTree<Center>, point: &[f64; 2]) -> usize {
    tree.nearest_neighbor(point).map(|c| c.data).unwrap_or(0)
}

fn mini_batch_kmeans(points: &[[f64; 2]], k: usize, options: &ReducerOptions) -> Vec<[f64; 2]> {
    let mut rng = StdRng::seed_from_u64(options.seed);

    let mut seeds = rand::seq::index::sample(&mut rng, points.len(), k).into_vec();
    seeds.sort_unstable();
    let mut centers: Vec<[f64; 2]> = seeds.iter().map(|&i| points[i]).collect();
    let mut counts = vec![0usize; k];
    let batch_size = options.batch_size.clamp(1, points.len());

    for iteration in 0..options.max_iterations {
        let batch: Vec<usize> = (0..batch_size)
            .map(|_| rng.gen_range(0..points.len()))
            .collect();

        let tree = center_index(&centers);
        let labels: Vec<usize> = batch
            .par_iter()
            .map(|&i| nearest_center(&tree, &points[i]))
            .collect();

        let mut max_shift: f64 = 0.0;
        for (&i, &label) in batch.iter().zip(&labels) {
            counts[label] += 1;
            let eta = 1.0 / counts[label] as f64;
            let center = &mut centers[label];
            let before = *center;
            center[0] += eta * (points[i][0] - center[0]);
            center[1] += eta * (points[i][1] - center[1]);
            let shift = (center[0] - before[0]).abs().max((center[1] - before[1]).abs());
            max_shift = max_shift.max(shift);
        }

        if max_shift < options.tolerance_deg {
            tracing::debug!(iteration, "mini-batch k-means converged");
            break;
        }
    }

    centers
}

fn assign_nearest(points: &[[f64; 2]], centers: &[[f64; 2]]) -> Vec<usize> {
    let tree = center_index(centers);
    points
        .par_iter()
        .map(|p| nearest_center(&tree, p))
        .collect()
}

/// Replace each non-empty cluster with the centroid of its actual members.
fn group_members(points: &[ReducedPoint], labels: &[usize], clusters: usize) -> Reduction {
    let mut sums = vec![(0.0f64, 0.0f64, 0usize); clusters];
    let mut trails: Vec<BTreeSet<TrailId>> = vec![BTreeSet::new(); clusters];

    for (point, &label) in points.iter().zip(labels) {
        let entry = &mut sums[label];
        entry.0 += point.location.lat;
        entry.1 += point.location.lon;
        entry.2 += 1;
        trails[label].extend(point.trail_ids.iter().copied());
    }

    // Renumber the non-empty clusters densely, in cluster order.
    let mut remap = vec![usize::MAX; clusters];
    let mut reduced = Vec::new();
    for (cluster, &(lat, lon, count)) in sums.iter().enumerate() {
        if count == 0 {
            continue;
        }
        remap[cluster] = reduced.len();
        let n = count as f64;
        reduced.push(ReducedPoint::new(
            GeoPoint::new(lat / n, lon / n),
            std::mem::take(&mut trails[cluster]).into_iter().collect(),
        ));
    }

    Reduction {
        points: reduced,
        assignment: labels.iter().map(|&label| remap[label]).collect(),
    }
}
