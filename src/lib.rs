//! trailblazer core
//!
//! Walking routes from a start point to nearby points of interest over a
//! trail network built from raw track data. A job downloads trails for the
//! search area (through a time-expiring cache), reduces the point cloud,
//! builds a weighted graph, snaps points of interest onto it and runs a
//! multi-target Dijkstra. [`orchestrator::Orchestrator`] runs jobs on a
//! worker pool and exposes their progress for polling.
//!
//! The library logs through `tracing` and never installs a subscriber.

pub mod cache;
pub mod dijkstra;
pub mod disk_cache;
pub mod error;
pub mod geo;
pub mod graph;
pub mod jobs;
pub mod orchestrator;
pub mod overpass;
pub mod poi;
pub mod polyline;
pub mod reducer;
pub mod route;
pub mod settings;
pub mod traits;

pub use error::{CacheError, GraphError, JobError, PipelineError, ProviderError};
pub use geo::{BoundingBox, GeoPoint};
pub use jobs::{FailureKind, Job, JobId, JobStatus, RouteRequest};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use route::{RouteOutcome, RouteResult};
pub use traits::{PoiStore, PointOfInterest, TrailProvider, TrailSegment};
