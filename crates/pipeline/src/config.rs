//! Delineation run configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How downstream distances are measured by the distance-to-stream stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DistanceMethod {
    /// Pure horizontal ground distance
    Horizontal,
    /// Pure vertical (elevation) drop
    Vertical,
    /// Euclidean-weighted combination of both
    Pythagoras,
    /// Along-surface distance
    #[default]
    Surface,
}

impl DistanceMethod {
    /// The single-character selector the external tools expect.
    pub fn flag_char(self) -> &'static str {
        match self {
            DistanceMethod::Horizontal => "h",
            DistanceMethod::Vertical => "v",
            DistanceMethod::Pythagoras => "p",
            DistanceMethod::Surface => "s",
        }
    }
}

/// Which accumulation grid drives stream definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccumulationSource {
    #[default]
    D8,
    Dinf,
}

/// Configuration of one watershed delineation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelineationConfig {
    /// Input DEM raster
    pub dem: PathBuf,
    /// Working directory for all artifacts
    pub working_dir: PathBuf,
    /// Worker processes per external stage
    pub processes: usize,
    /// Predefined outlet point file; None selects the maximum-accumulation
    /// cell as the default outlet
    pub outlet: Option<PathBuf>,
    /// Explicit stream threshold; None (or a non-positive value) selects the
    /// threshold by drop analysis
    pub threshold: Option<f64>,
    /// Accumulation grid used for stream definition
    pub accumulation_source: AccumulationSource,
    /// Distance measurement for the optional distance-to-stream product
    pub distance_method: DistanceMethod,
    /// Compute the D-infinity distance-to-stream raster
    pub stream_distance: bool,
    /// Restrict accumulation to basins draining the predefined outlets
    pub single_basin: bool,
    /// Search radius (cells) for snapping outlets onto the stream raster
    pub snap_distance: usize,
}

impl DelineationConfig {
    pub fn new(dem: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            dem: dem.into(),
            working_dir: working_dir.into(),
            processes: 1,
            outlet: None,
            threshold: None,
            accumulation_source: AccumulationSource::default(),
            distance_method: DistanceMethod::default(),
            stream_distance: false,
            single_basin: false,
            snap_distance: 50,
        }
    }

    /// Validate the configuration before any stage runs.
    ///
    /// Configuration errors abort immediately and are never retried.
    pub fn validate(&self) -> Result<()> {
        if !self.dem.is_file() {
            return Err(Error::Configuration(format!(
                "DEM {} does not exist",
                self.dem.display()
            )));
        }
        if self.processes == 0 {
            return Err(Error::Configuration(
                "process count must be at least 1".to_string(),
            ));
        }
        if let Some(t) = self.threshold {
            if !t.is_finite() {
                return Err(Error::Configuration(format!(
                    "stream threshold {} is not a number",
                    t
                )));
            }
        }
        if let Some(outlet) = &self.outlet {
            if !outlet.is_file() {
                return Err(Error::Configuration(format!(
                    "outlet file {} does not exist",
                    outlet.display()
                )));
            }
        }
        Ok(())
    }

    /// Whether drop analysis must pick the threshold.
    pub fn needs_drop_analysis(&self) -> bool {
        match self.threshold {
            None => true,
            Some(t) => t <= 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dem_is_configuration_error() {
        let config = DelineationConfig::new("/nonexistent/dem.tif", "/tmp");
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_zero_processes_rejected() {
        let dir = std::env::temp_dir();
        let dem = dir.join("config_test_dem.tif");
        std::fs::write(&dem, b"stub").unwrap();

        let mut config = DelineationConfig::new(&dem, &dir);
        config.processes = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        std::fs::remove_file(&dem).ok();
    }

    #[test]
    fn test_threshold_selects_drop_analysis() {
        let mut config = DelineationConfig::new("dem.tif", "/tmp");
        assert!(config.needs_drop_analysis());
        config.threshold = Some(0.0);
        assert!(config.needs_drop_analysis());
        config.threshold = Some(120.0);
        assert!(!config.needs_drop_analysis());
    }

    #[test]
    fn test_distance_method_flags() {
        assert_eq!(DistanceMethod::Horizontal.flag_char(), "h");
        assert_eq!(DistanceMethod::Vertical.flag_char(), "v");
        assert_eq!(DistanceMethod::Pythagoras.flag_char(), "p");
        assert_eq!(DistanceMethod::Surface.flag_char(), "s");
    }
}
