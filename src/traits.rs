//! Contracts for the external collaborators the pipeline depends on.
//!
//! These are intentionally minimal. Concrete deployments implement them over
//! their own data sources; the crate ships an Overpass trail provider and an
//! in-memory point-of-interest store.

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::geo::{BoundingBox, GeoPoint};

/// Source-provided identifier of one trail way.
pub type TrailId = u64;

/// An ordered run of points belonging to one contiguous trail way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailSegment {
    pub trail_id: TrailId,
    pub points: Vec<GeoPoint>,
}

impl TrailSegment {
    pub fn new(trail_id: TrailId, points: Vec<GeoPoint>) -> Self {
        Self { trail_id, points }
    }
}

/// A destination the user may want to walk to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub id: String,
    pub name: String,
    /// Category used to select points, e.g. "military" or "religious".
    pub kind: String,
    pub location: GeoPoint,
}

/// Provides raw trail tracks inside a bounding box.
///
/// No ordering guarantee is made on the returned segments.
pub trait TrailProvider: Send + Sync {
    fn fetch_trails(&self, bbox: &BoundingBox) -> Result<Vec<TrailSegment>, ProviderError>;
}

/// Read-only lookup of points of interest.
pub trait PoiStore: Send + Sync {
    fn query_near(
        &self,
        bbox: &BoundingBox,
        kind: &str,
    ) -> Result<Vec<PointOfInterest>, ProviderError>;
}
