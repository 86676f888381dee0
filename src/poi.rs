//! In-memory point-of-interest store.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::ProviderError;
use crate::geo::BoundingBox;
use crate::traits::{PoiStore, PointOfInterest};

#[derive(Debug, Clone, Default)]
pub struct MemoryPoiStore {
    pois: Vec<PointOfInterest>,
}

impl MemoryPoiStore {
    pub fn new(pois: Vec<PointOfInterest>) -> Self {
        Self { pois }
    }

    /// Load a JSON array of points of interest.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            ProviderError::Unavailable(format!("{}: {}", path.display(), err))
        })?;
        let pois: Vec<PointOfInterest> = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| ProviderError::Decode(err.to_string()))?;
        tracing::info!(count = pois.len(), path = %path.display(), "loaded points of interest");
        Ok(Self::new(pois))
    }

    pub fn len(&self) -> usize {
        self.pois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pois.is_empty()
    }
}

impl PoiStore for MemoryPoiStore {
    fn query_near(
        &self,
        bbox: &BoundingBox,
        kind: &str,
    ) -> Result<Vec<PointOfInterest>, ProviderError> {
        Ok(self
            .pois
            .iter()
            .filter(|poi| poi.kind == kind && bbox.contains(&poi.location))
            .cloned()
            .collect())
    }
}
