//! Geographic primitives: points, bounding boxes and great-circle distance.
//!
//! Distances are in kilometers throughout the crate.

use serde::{Deserialize, Serialize};

/// Earth radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Approximate length of one degree of latitude in kilometers.
pub const KM_PER_DEGREE: f64 = 111.32;

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Check that both coordinates are finite and within WGS84 ranges.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Bit-exact identity of the coordinate, usable as a hash key.
    ///
    /// `-0.0` is folded into `0.0` so the two compare equal.
    pub fn exact_key(&self) -> (u64, u64) {
        ((self.lat + 0.0).to_bits(), (self.lon + 0.0).to_bits())
    }

    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        haversine_km(*self, *other)
    }
}

/// Great-circle distance between two points in kilometers.
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let lat1_rad = from.lat.to_radians();
    let lat2_rad = to.lat.to_radians();
    let delta_lat = (to.lat - from.lat).to_radians();
    let delta_lon = (to.lon - from.lon).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Axis-aligned box in latitude/longitude degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Build a box from two opposite corners in any order.
    pub fn new(a: GeoPoint, b: GeoPoint) -> Self {
        Self {
            min_lat: a.lat.min(b.lat),
            min_lon: a.lon.min(b.lon),
            max_lat: a.lat.max(b.lat),
            max_lon: a.lon.max(b.lon),
        }
    }

    /// Square box enclosing the circle of `radius_km` around `center`.
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        let radius_km = radius_km.max(0.0);
        let delta_lat = radius_km / KM_PER_DEGREE;
        // Clamp so the box stays finite close to the poles.
        let cos_lat = center.lat.to_radians().cos().max(0.01);
        let delta_lon = radius_km / (KM_PER_DEGREE * cos_lat);

        Self {
            min_lat: (center.lat - delta_lat).max(-90.0),
            min_lon: (center.lon - delta_lon).max(-180.0),
            max_lat: (center.lat + delta_lat).min(90.0),
            max_lon: (center.lon + delta_lon).min(180.0),
        }
    }

    /// Smallest box containing every point, or `None` for an empty slice.
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = Self::new(*first, *first);
        for p in &points[1..] {
            bbox.min_lat = bbox.min_lat.min(p.lat);
            bbox.min_lon = bbox.min_lon.min(p.lon);
            bbox.max_lat = bbox.max_lat.max(p.lat);
            bbox.max_lon = bbox.max_lon.max(p.lon);
        }
        Some(bbox)
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }

    pub fn width_deg(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height_deg(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }
}
