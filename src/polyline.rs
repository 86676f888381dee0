//! Polyline representation for route geometries.
//!
//! Routes are kept as decoded coordinate sequences. Export collaborators
//! encode them into whatever track format they need at their own boundary.

use serde::{Deserialize, Serialize};

use crate::geo::{haversine_km, GeoPoint};

/// An ordered sequence of points from a route's start to its target.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polyline {
    points: Vec<GeoPoint>,
}

impl Polyline {
    pub fn new(points: Vec<GeoPoint>) -> Self {
        Self { points }
    }

    /// Returns a reference to the coordinate points.
    pub fn points(&self) -> &[GeoPoint] {
        &self.points
    }

    /// Consumes the polyline and returns the owned coordinate points.
    pub fn into_points(self) -> Vec<GeoPoint> {
        self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Sum of the great-circle lengths of consecutive pairs, in kilometers.
    pub fn length_km(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| haversine_km(pair[0], pair[1]))
            .sum()
    }

    pub fn first(&self) -> Option<&GeoPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&GeoPoint> {
        self.points.last()
    }
}

impl From<Vec<GeoPoint>> for Polyline {
    fn from(points: Vec<GeoPoint>) -> Self {
        Self::new(points)
    }
}
