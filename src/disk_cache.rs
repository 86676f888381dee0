//! JSON-on-disk persistence for trail cache entries.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traits::TrailSegment;

#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("cache io error: {0}")]
    Io(#[from] io::Error),
    #[error("cache file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One persisted download. `fetched_at` decides expiry, not the file mtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskRecord {
    pub fetched_at: DateTime<Utc>,
    pub segments: Vec<TrailSegment>,
}

#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Open a cache rooted at `dir`, creating it if needed. Relative paths
    /// resolve against the current directory.
    pub fn ensure(dir: impl Into<PathBuf>) -> Result<Self, DiskCacheError> {
        let dir = dir.into();
        let dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()?.join(dir)
        };
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    pub fn load(&self, name: &str) -> Result<Option<DiskRecord>, DiskCacheError> {
        let path = self.path_for(name);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let record = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(record))
    }

    /// Write through a temporary file so readers never see a partial record.
    pub fn store(&self, name: &str, record: &DiskRecord) -> Result<(), DiskCacheError> {
        let dest = self.path_for(name);
        let tmp_path = dest.with_extension("tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer(&mut writer, record)?;
        writer.flush()?;
        fs::rename(tmp_path, dest)?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<bool, DiskCacheError> {
        match fs::remove_file(self.path_for(name)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Delete every record. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, DiskCacheError> {
        let mut removed = 0;
        for path in self.record_paths()? {
            fs::remove_file(path)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn len(&self) -> Result<usize, DiskCacheError> {
        Ok(self.record_paths()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, DiskCacheError> {
        Ok(self.len()? == 0)
    }

    fn record_paths(&self) -> Result<Vec<PathBuf>, DiskCacheError> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoPoint;

    fn record() -> DiskRecord {
        DiskRecord {
            fetched_at: Utc::now(),
            segments: vec![TrailSegment::new(
                7,
                vec![GeoPoint::new(41.0, 2.0), GeoPoint::new(41.001, 2.001)],
            )],
        }
    }

    #[test]
    fn test_store_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::ensure(dir.path()).unwrap();
        let stored = record();
        cache.store("k1", &stored).unwrap();

        let loaded = cache.load("k1").unwrap().unwrap();
        assert_eq!(loaded.fetched_at, stored.fetched_at);
        assert_eq!(loaded.segments, stored.segments);
        assert!(!dir.path().join("k1.tmp").exists());
    }

    #[test]
    fn test_missing_record_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::ensure(dir.path()).unwrap();
        assert!(cache.load("absent").unwrap().is_none());
        assert!(!cache.remove("absent").unwrap());
    }

    #[test]
    fn test_corrupt_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::ensure(dir.path()).unwrap();
        fs::write(dir.path().join("bad.json"), b"{not json").unwrap();
        assert!(matches!(cache.load("bad"), Err(DiskCacheError::Json(_))));
    }

    #[test]
    fn test_clear_counts_records() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskCache::ensure(dir.path()).unwrap();
        cache.store("a", &record()).unwrap();
        cache.store("b", &record()).unwrap();
        assert_eq!(cache.len().unwrap(), 2);
        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.is_empty().unwrap());
    }
}
