//! Test fixtures for trailblazer.
//!
//! Provides:
//! - Real Barcelona locations (from OpenStreetMap)
//! - Scripted trail providers (counting, failing, gated)
//! - Builders for trail segments, networks and points of interest

#![allow(dead_code)]

pub mod barcelona_locations;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use trailblazer::cache::{CacheOptions, TrailCache};
use trailblazer::error::ProviderError;
use trailblazer::geo::EARTH_RADIUS_KM;
use trailblazer::jobs::MemoryJobStore;
use trailblazer::poi::MemoryPoiStore;
use trailblazer::{
    BoundingBox, GeoPoint, Orchestrator, OrchestratorConfig, PointOfInterest, TrailProvider,
    TrailSegment,
};

pub use barcelona_locations::*;

/// Degrees of latitude per kilometer along a meridian.
pub const DEG_PER_KM: f64 = 180.0 / (std::f64::consts::PI * EARTH_RADIUS_KM);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Builders
// ============================================================================

/// Point `km` kilometers due north of `origin`.
pub fn north_of(origin: GeoPoint, km: f64) -> GeoPoint {
    GeoPoint::new(origin.lat + km * DEG_PER_KM, origin.lon)
}

/// A trail heading north from `origin` with the given leg lengths.
pub fn northbound_trail(trail_id: u64, origin: GeoPoint, legs_km: &[f64]) -> TrailSegment {
    let mut points = vec![origin];
    let mut total = 0.0;
    for leg in legs_km {
        total += leg;
        points.push(north_of(origin, total));
    }
    TrailSegment::new(trail_id, points)
}

pub fn poi(id: &str, kind: &str, location: GeoPoint) -> PointOfInterest {
    PointOfInterest {
        id: id.to_string(),
        name: format!("POI {}", id),
        kind: kind.to_string(),
        location,
    }
}

/// A ladder of `rails` east-west trails with `points_per_rail` points each,
/// joined by north-south rungs at every tenth column. Points are ~50 m apart.
pub fn ladder_network(origin: GeoPoint, rails: usize, points_per_rail: usize) -> Vec<TrailSegment> {
    let step = 0.0005;
    let point = |rail: usize, col: usize| {
        GeoPoint::new(origin.lat + rail as f64 * step, origin.lon + col as f64 * step)
    };

    let mut segments = Vec::new();
    let mut next_id = 1;
    for rail in 0..rails {
        segments.push(TrailSegment::new(
            next_id,
            (0..points_per_rail).map(|col| point(rail, col)).collect(),
        ));
        next_id += 1;
    }
    for col in (0..points_per_rail).step_by(10) {
        segments.push(TrailSegment::new(
            next_id,
            (0..rails).map(|rail| point(rail, col)).collect(),
        ));
        next_id += 1;
    }
    segments
}

// ============================================================================
// Trail providers
// ============================================================================

/// Returns fixed segments and counts calls. An optional delay widens race
/// windows for concurrency tests.
pub struct CountingProvider {
    segments: Vec<TrailSegment>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl CountingProvider {
    pub fn new(segments: Vec<TrailSegment>) -> Self {
        Self {
            segments,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TrailProvider for CountingProvider {
    fn fetch_trails(&self, _bbox: &BoundingBox) -> Result<Vec<TrailSegment>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self.segments.clone())
    }
}

/// Always fails, counting attempts.
pub struct FailingProvider {
    message: String,
    calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TrailProvider for FailingProvider {
    fn fetch_trails(&self, _bbox: &BoundingBox) -> Result<Vec<TrailSegment>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Unavailable(self.message.clone()))
    }
}

/// Delegates to a closure, for per-area behavior.
pub struct FnProvider<F>(pub F);

impl<F> TrailProvider for FnProvider<F>
where
    F: Fn(&BoundingBox) -> Result<Vec<TrailSegment>, ProviderError> + Send + Sync,
{
    fn fetch_trails(&self, bbox: &BoundingBox) -> Result<Vec<TrailSegment>, ProviderError> {
        (self.0)(bbox)
    }
}

/// Blocks every fetch until the test releases it.
pub struct GatedProvider {
    segments: Vec<TrailSegment>,
    gate: Mutex<Receiver<()>>,
}

impl GatedProvider {
    pub fn new(segments: Vec<TrailSegment>) -> (Self, Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                segments,
                gate: Mutex::new(rx),
            },
            tx,
        )
    }
}

impl TrailProvider for GatedProvider {
    fn fetch_trails(&self, _bbox: &BoundingBox) -> Result<Vec<TrailSegment>, ProviderError> {
        let gate = self.gate.lock().map_err(|_| ProviderError::Unavailable("gate poisoned".into()))?;
        gate.recv()
            .map_err(|_| ProviderError::Unavailable("gate closed".into()))?;
        Ok(self.segments.clone())
    }
}

// ============================================================================
// Orchestrator wiring
// ============================================================================

pub fn orchestrator_with(
    provider: Arc<dyn TrailProvider>,
    pois: Vec<PointOfInterest>,
    worker_threads: usize,
) -> Orchestrator {
    let cache = Arc::new(TrailCache::new(provider, CacheOptions::default()));
    let config = OrchestratorConfig {
        worker_threads,
        ..OrchestratorConfig::default()
    };
    Orchestrator::new(
        config,
        cache,
        Arc::new(MemoryPoiStore::new(pois)),
        Arc::new(MemoryJobStore::new()),
    )
    .expect("orchestrator should start")
}

pub fn orchestrator(provider: Arc<dyn TrailProvider>, pois: Vec<PointOfInterest>) -> Orchestrator {
    orchestrator_with(provider, pois, 4)
}

pub const WAIT: Duration = Duration::from_secs(30);
