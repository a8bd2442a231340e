use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::utils::{
    error::{EngineError, EngineResult},
    request::{DistanceKind, StddevVariant},
};

/// Main engine configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub spatial: SpatialConfig,
    pub query: QueryConfig,
    pub logging: LoggingConfig,
}

/// Spatial grid configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Fixed grid cell size; disables tuning from query history when set
    pub cell_size: Option<f64>,
    /// Cell size used before any distance threshold has been observed
    pub default_cell_size: f64,
    /// Cell size as a multiple of the largest observed distance threshold
    pub cell_size_multiplier: f64,
    /// Below this many entities radius lookups scan the whole store
    pub full_scan_threshold: usize,
}

/// Query execution defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_distance: DistanceKind,
    pub stddev: StddevVariant,
    /// Restrict join candidates with the spatial grid before exact distance checks
    pub spatial_pruning: bool,
    pub candidate_strategy: CandidateStrategy,
}

/// How join candidate tuples are enumerated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStrategy {
    /// Partition-index driven enumeration
    Indexed,
    /// Full cross product filtered afterwards
    Naive,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Overridden by the POI_LOG_LEVEL environment variable
    pub level: String,
    pub log_file: Option<String>,
}

impl EngineConfig {
    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: EngineConfig = serde_json::from_str(&content).map_err(|e| {
            EngineError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the grid cannot work with
    pub fn validate(&self) -> EngineResult<()> {
        if let Some(cell_size) = self.spatial.cell_size {
            if !(cell_size.is_finite() && cell_size > 0.0) {
                return Err(EngineError::Configuration(format!(
                    "cell_size must be positive and finite, got {}",
                    cell_size
                )));
            }
        }
        if !(self.spatial.default_cell_size.is_finite() && self.spatial.default_cell_size > 0.0) {
            return Err(EngineError::Configuration(format!(
                "default_cell_size must be positive and finite, got {}",
                self.spatial.default_cell_size
            )));
        }
        if !(self.spatial.cell_size_multiplier.is_finite() && self.spatial.cell_size_multiplier > 0.0) {
            return Err(EngineError::Configuration(format!(
                "cell_size_multiplier must be positive and finite, got {}",
                self.spatial.cell_size_multiplier
            )));
        }
        Ok(())
    }
}

impl SpatialConfig {
    /// Cell size to build the grid with, given the largest threshold seen so far
    pub fn effective_cell_size(&self, max_observed_threshold: Option<f64>) -> f64 {
        if let Some(cell_size) = self.cell_size {
            return cell_size;
        }
        match max_observed_threshold {
            Some(threshold) if threshold.is_finite() && threshold > 0.0 => {
                threshold * self.cell_size_multiplier
            }
            _ => self.default_cell_size,
        }
    }
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            cell_size: None,
            default_cell_size: 0.01, // roughly 1 km in degrees
            cell_size_multiplier: 2.0,
            full_scan_threshold: 64,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_distance: DistanceKind::Euclidean,
            stddev: StddevVariant::Sample,
            spatial_pruning: true,
            candidate_strategy: CandidateStrategy::Indexed,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}
