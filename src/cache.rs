//! Time-expiring cache of raw trail downloads with single-flight fetching.
//!
//! Entries are keyed by the bounding box quantized to a fixed grid so that
//! near-identical requests share one download. A miss calls the
//! [`TrailProvider`] once; concurrent callers for the same key wait for that
//! call instead of issuing their own. Failed fetches are never cached.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::disk_cache::{DiskCache, DiskRecord};
use crate::error::CacheError;
use crate::geo::BoundingBox;
use crate::traits::{TrailProvider, TrailSegment};

const DEFAULT_KEY_PRECISION_DEG: f64 = 0.001;
/// Longest TTL honoured; larger settings are clamped to it.
pub const MAX_TTL_DAYS: i64 = 36_500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    pub ttl_days: i64,
    /// Grid step in degrees that bounding-box corners are rounded to.
    pub key_precision_deg: f64,
    /// Persist entries as JSON files here when set.
    pub cache_dir: Option<PathBuf>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            key_precision_deg: DEFAULT_KEY_PRECISION_DEG,
            cache_dir: None,
        }
    }
}

impl CacheOptions {
    pub fn ttl(&self) -> Duration {
        Duration::days(self.ttl_days.clamp(0, MAX_TTL_DAYS))
    }
}

/// Bounding box snapped to the cache grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    corners: [i64; 4],
    step_nanodeg: i64,
}

impl CacheKey {
    pub fn quantize(bbox: &BoundingBox, step_deg: f64) -> Self {
        let q = |v: f64| (v / step_deg).round() as i64;
        Self {
            corners: [
                q(bbox.min_lat),
                q(bbox.min_lon),
                q(bbox.max_lat),
                q(bbox.max_lon),
            ],
            step_nanodeg: (step_deg * 1e9).round() as i64,
        }
    }

    fn step_deg(&self) -> f64 {
        self.step_nanodeg as f64 / 1e9
    }

    /// The box the provider is asked for; a pure function of the key.
    pub fn bbox(&self) -> BoundingBox {
        let step = self.step_deg();
        BoundingBox {
            min_lat: self.corners[0] as f64 * step,
            min_lon: self.corners[1] as f64 * step,
            max_lat: self.corners[2] as f64 * step,
            max_lon: self.corners[3] as f64 * step,
        }
    }

    /// File-system safe name, used by the disk cache.
    pub fn file_stem(&self) -> String {
        format!(
            "trails_{}_{}_{}_{}_{}",
            self.step_nanodeg, self.corners[0], self.corners[1], self.corners[2], self.corners[3]
        )
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub segments: Arc<Vec<TrailSegment>>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(segments: Arc<Vec<TrailSegment>>, fetched_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            segments,
            fetched_at,
            expires_at: fetched_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Snapshot returned by [`TrailCache::info`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInfo {
    /// Unexpired entries held in memory.
    pub entries: usize,
    pub in_flight: usize,
    pub ttl_days: i64,
    pub disk_entries: Option<usize>,
}

type FetchResult = Result<Arc<Vec<TrailSegment>>, CacheError>;

/// One outstanding provider call that followers wait on.
#[derive(Default)]
struct Flight {
    result: Mutex<Option<FetchResult>>,
    ready: Condvar,
}

impl Flight {
    fn publish(&self, result: FetchResult) {
        *lock(&self.result) = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self) -> FetchResult {
        let mut slot = lock(&self.result);
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self
                .ready
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TrailCache {
    provider: Arc<dyn TrailProvider>,
    options: CacheOptions,
    step_deg: f64,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<Flight>>>,
    disk: Option<DiskCache>,
}

impl TrailCache {
    /// Create a cache in front of `provider`. A configured cache directory
    /// that cannot be created is logged and the cache runs memory-only.
    pub fn new(provider: Arc<dyn TrailProvider>, options: CacheOptions) -> Self {
        let step_deg = if options.key_precision_deg.is_finite() && options.key_precision_deg > 0.0
        {
            options.key_precision_deg
        } else {
            tracing::warn!(
                precision = options.key_precision_deg,
                "invalid cache key precision, using default"
            );
            DEFAULT_KEY_PRECISION_DEG
        };

        let disk = options
            .cache_dir
            .as_ref()
            .and_then(|dir| match DiskCache::ensure(dir.clone()) {
                Ok(disk) => Some(disk),
                Err(err) => {
                    tracing::warn!(dir = %dir.display(), error = %err, "disk cache disabled");
                    None
                }
            });

        Self {
            provider,
            options,
            step_deg,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            disk,
        }
    }

    pub fn key_for(&self, bbox: &BoundingBox) -> CacheKey {
        CacheKey::quantize(bbox, self.step_deg)
    }

    pub fn get_or_fetch(&self, bbox: &BoundingBox) -> Result<Arc<Vec<TrailSegment>>, CacheError> {
        self.get_or_fetch_at(bbox, Utc::now())
    }

    /// Same as [`get_or_fetch`](Self::get_or_fetch) with an explicit clock.
    pub fn get_or_fetch_at(
        &self,
        bbox: &BoundingBox,
        now: DateTime<Utc>,
    ) -> Result<Arc<Vec<TrailSegment>>, CacheError> {
        let key = self.key_for(bbox);
        if let Some(hit) = self.fresh_entry(&key, now) {
            tracing::debug!(key = %key.file_stem(), "trail cache hit");
            return Ok(hit);
        }

        let (flight, leader) = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(&key) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let flight = Arc::new(Flight::default());
                    in_flight.insert(key, Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if !leader {
            tracing::debug!(key = %key.file_stem(), "waiting on in-flight trail fetch");
            return flight.wait();
        }

        let mut guard = FlightGuard {
            cache: self,
            key,
            flight,
            result: None,
        };
        let result = self.lead_fetch(&key, now);
        guard.result = Some(result.clone());
        drop(guard);
        result
    }

    fn lead_fetch(&self, key: &CacheKey, now: DateTime<Utc>) -> FetchResult {
        // Another leader may have finished between the lookup and registering.
        if let Some(hit) = self.fresh_entry(key, now) {
            return Ok(hit);
        }
        if let Some(hit) = self.load_from_disk(key, now) {
            return Ok(hit);
        }

        let bbox = key.bbox();
        tracing::info!(key = %key.file_stem(), "fetching trail data");
        let segments = match self.provider.fetch_trails(&bbox) {
            Ok(segments) => Arc::new(segments),
            Err(err) => {
                tracing::warn!(key = %key.file_stem(), error = %err, "trail fetch failed");
                return Err(CacheError::DataUnavailable {
                    message: err.to_string(),
                });
            }
        };

        let entry = CacheEntry::new(Arc::clone(&segments), now, self.options.ttl());
        self.store_on_disk(key, &entry);
        {
            let mut entries = lock(&self.entries);
            prune_expired(&mut entries, now);
            entries.insert(*key, entry);
        }
        tracing::info!(key = %key.file_stem(), segments = segments.len(), "cached trail data");
        Ok(segments)
    }

    fn fresh_entry(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Arc<Vec<TrailSegment>>> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(Arc::clone(&entry.segments)),
            Some(_) => {
                entries.remove(key);
                tracing::debug!(key = %key.file_stem(), "trail cache entry expired");
                None
            }
            None => None,
        }
    }

    fn load_from_disk(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<Arc<Vec<TrailSegment>>> {
        let disk = self.disk.as_ref()?;
        let record = match disk.load(&key.file_stem()) {
            Ok(record) => record?,
            Err(err) => {
                tracing::warn!(key = %key.file_stem(), error = %err, "ignoring unreadable cache file");
                return None;
            }
        };
        let entry = CacheEntry::new(Arc::new(record.segments), record.fetched_at, self.options.ttl());
        if !entry.is_fresh(now) {
            return None;
        }
        tracing::debug!(key = %key.file_stem(), "trail cache disk hit");
        let segments = Arc::clone(&entry.segments);
        lock(&self.entries).insert(*key, entry);
        Some(segments)
    }

    fn store_on_disk(&self, key: &CacheKey, entry: &CacheEntry) {
        let Some(disk) = self.disk.as_ref() else {
            return;
        };
        let record = DiskRecord {
            fetched_at: entry.fetched_at,
            segments: entry.segments.as_ref().clone(),
        };
        if let Err(err) = disk.store(&key.file_stem(), &record) {
            tracing::warn!(key = %key.file_stem(), error = %err, "failed to persist trail data");
        }
    }

    /// Drop the entry for `bbox`. Returns whether anything was removed.
    pub fn clear(&self, bbox: &BoundingBox) -> bool {
        let key = self.key_for(bbox);
        let mut removed = lock(&self.entries).remove(&key).is_some();
        if let Some(disk) = self.disk.as_ref() {
            match disk.remove(&key.file_stem()) {
                Ok(on_disk) => removed |= on_disk,
                Err(err) => tracing::warn!(error = %err, "failed to remove cache file"),
            }
        }
        removed
    }

    /// Drop every entry. Returns the number of memory entries removed.
    pub fn clear_all(&self) -> usize {
        let removed = {
            let mut entries = lock(&self.entries);
            let n = entries.len();
            entries.clear();
            n
        };
        if let Some(disk) = self.disk.as_ref() {
            if let Err(err) = disk.clear() {
                tracing::warn!(error = %err, "failed to clear cache directory");
            }
        }
        tracing::info!(removed, "cleared trail cache");
        removed
    }

    pub fn info(&self) -> CacheInfo {
        self.info_at(Utc::now())
    }

    pub fn info_at(&self, now: DateTime<Utc>) -> CacheInfo {
        let entries = {
            let mut entries = lock(&self.entries);
            prune_expired(&mut entries, now);
            entries.len()
        };
        CacheInfo {
            entries,
            in_flight: lock(&self.in_flight).len(),
            ttl_days: self.options.ttl_days,
            disk_entries: self.disk.as_ref().and_then(|disk| disk.len().ok()),
        }
    }
}

fn prune_expired(entries: &mut HashMap<CacheKey, CacheEntry>, now: DateTime<Utc>) {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_fresh(now));
    let expired = before - entries.len();
    if expired > 0 {
        tracing::debug!(expired, "dropped expired trail cache entries");
    }
}

/// Releases followers and unregisters the flight even if the provider panics.
struct FlightGuard<'a> {
    cache: &'a TrailCache,
    key: CacheKey,
    flight: Arc<Flight>,
    result: Option<FetchResult>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let result = self.result.take().unwrap_or_else(|| {
            Err(CacheError::DataUnavailable {
                message: "trail fetch aborted".to_string(),
            })
        });
        lock(&self.cache.in_flight).remove(&self.key);
        self.flight.publish(result);
    }
}
