//! Tracker configuration.
//!
//! Mobile callers usually pass this across the FFI boundary as JSON.

use serde::{Deserialize, Serialize};

use crate::{units, Result, TrackingError};

/// Preference key for the persisted unit system.
pub const UNIT_PREFERENCE_KEY: &str = "unit_preference";

/// Storage identifier shared with the background location task.
pub const BACKGROUND_QUEUE_KEY: &str = "background_locations";

/// Name the background task is registered under.
pub const BACKGROUND_TASK_NAME: &str = "background-location-task";

/// How session statistics are maintained as points arrive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "snake_case")]
pub enum StatisticsMode {
    /// Recompute every aggregate from the full point list on each append.
    #[default]
    FullRecompute,
    /// Update running aggregates from the newest point only. O(1) per append.
    Incremental,
}

/// Configuration for location ingestion and session tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(default)]
pub struct TrackerConfig {
    /// Foreground fix interval in milliseconds.
    /// Default: 1000
    pub update_interval_ms: u32,

    /// Background fix interval in milliseconds.
    /// Default: 5000
    pub background_interval_ms: u32,

    /// Minimum movement between background fixes in meters.
    /// Default: 10.0
    pub background_distance_filter_m: f64,

    /// Accuracy above which a fix is considered poor, in meters.
    /// Poor fixes are still ingested; this only drives warnings.
    /// Default: 50.0
    pub accuracy_threshold_m: f64,

    /// Statistics maintenance strategy.
    /// Default: FullRecompute
    pub statistics_mode: StatisticsMode,

    /// Decimal places for displayed coordinates.
    /// Default: 4
    pub coordinate_decimals: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 1000,
            background_interval_ms: 5000,
            background_distance_filter_m: 10.0,
            accuracy_threshold_m: 50.0,
            statistics_mode: StatisticsMode::FullRecompute,
            coordinate_decimals: 4,
        }
    }
}

impl TrackerConfig {
    /// Parse a config from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackerConfig =
            serde_json::from_str(json).map_err(|e| TrackingError::ConfigError {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// A latitude or longitude at the configured display precision.
    pub fn format_coordinate(&self, value: f64) -> String {
        units::format_coordinate(value, self.coordinate_decimals as usize)
    }

    pub fn validate(&self) -> Result<()> {
        if self.update_interval_ms == 0 {
            return Err(TrackingError::ConfigError {
                message: "update_interval_ms must be positive".to_string(),
            });
        }
        if self.background_interval_ms == 0 {
            return Err(TrackingError::ConfigError {
                message: "background_interval_ms must be positive".to_string(),
            });
        }
        let filter = self.background_distance_filter_m;
        if !filter.is_finite() || filter < 0.0 {
            return Err(TrackingError::ConfigError {
                message: "background_distance_filter_m must be >= 0".to_string(),
            });
        }
        Ok(())
    }
}
