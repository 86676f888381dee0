//! Real Barcelona / Collserola locations for realistic test fixtures.
//!
//! Coordinates sourced from OpenStreetMap.

use trailblazer::GeoPoint;

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lon: f64) -> Self {
        Self { name, lat, lon }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

// ============================================================================
// Start points
// ============================================================================

pub const PLACA_CATALUNYA: Location = Location::new("Plaça de Catalunya", 41.3851, 2.1734);
pub const TIBIDABO: Location = Location::new("Tibidabo", 41.4218, 2.1186);

// ============================================================================
// Military heritage
// ============================================================================

pub const MILITARY: &[Location] = &[
    Location::new("Castell de Montjuïc", 41.3636, 2.1663),
    Location::new("Bunkers del Carmel", 41.4194, 2.1619),
    Location::new("Ciutadella Arsenal", 41.3875, 2.1869),
];

// ============================================================================
// Religious heritage
// ============================================================================

pub const RELIGIOUS: &[Location] = &[
    Location::new("Sagrada Família", 41.4036, 2.1744),
    Location::new("Catedral de Barcelona", 41.3839, 2.1762),
    Location::new("Santa Maria del Mar", 41.3838, 2.1820),
];
