//! JSON settings file.
//!
//! Every field is optional; missing fields take their defaults. A top-level
//! `n_clusters` overrides `reducer.cap`, matching older settings files.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::{CacheOptions, MAX_TTL_DAYS};
use crate::error::SettingsError;
use crate::graph::GraphOptions;
use crate::orchestrator::{OrchestratorConfig, MAX_RETENTION_DAYS};
use crate::overpass::OverpassConfig;
use crate::reducer::ReducerOptions;

/// Environment variable naming the settings file.
pub const SETTINGS_ENV: &str = "TRAILBLAZER_SETTINGS";
pub const DEFAULT_SETTINGS_FILE: &str = "settings_file.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub n_clusters: Option<usize>,
    /// Worker threads for job execution; 0 lets the pool decide.
    pub worker_threads: usize,
    pub job_retention_days: i64,
    pub reducer: ReducerOptions,
    pub graph: GraphOptions,
    pub cache: CacheOptions,
    pub overpass: OverpassConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            n_clusters: None,
            worker_threads: 0,
            job_retention_days: 7,
            reducer: ReducerOptions::default(),
            graph: GraphOptions::default(),
            cache: CacheOptions::default(),
            overpass: OverpassConfig::default(),
        }
    }
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let mut settings: Settings = serde_json::from_str(text)?;
        if let Some(n) = settings.n_clusters {
            settings.reducer.cap = n.max(1);
        }
        if !(0..=MAX_TTL_DAYS).contains(&settings.cache.ttl_days) {
            tracing::warn!(
                ttl_days = settings.cache.ttl_days,
                max_days = MAX_TTL_DAYS,
                "cache ttl out of range, clamping"
            );
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&settings.job_retention_days) {
            tracing::warn!(
                retention_days = settings.job_retention_days,
                max_days = MAX_RETENTION_DAYS,
                "job retention out of range, clamping"
            );
        }
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        match Self::load(path) {
            Err(SettingsError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "settings file not found, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Load from the file named by `TRAILBLAZER_SETTINGS`, falling back to
    /// `settings_file.json` in the current directory.
    pub fn from_env() -> Result<Self, SettingsError> {
        let path = std::env::var_os(SETTINGS_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
        Self::load_or_default(path)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            worker_threads: self.worker_threads,
            job_retention_days: self.job_retention_days,
            reducer: self.reducer.clone(),
            graph: self.graph.clone(),
        }
    }
}
