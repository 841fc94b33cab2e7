//! Unit conversion and display formatting.
//!
//! All stored values are SI (m, m/s). Conversions here are for display only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TrackingError;

pub const MS_TO_KMH: f64 = 3.6;
pub const MS_TO_MPH: f64 = 2.237;
pub const METERS_TO_KM: f64 = 0.001;
pub const METERS_TO_MILES: f64 = 0.000621371;
pub const METERS_TO_FEET: f64 = 3.28084;

/// Display unit preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    /// km/h, km, m
    #[default]
    Metric,
    /// mph, mi, ft
    Imperial,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
        }
    }

    pub fn toggle(self) -> Self {
        match self {
            UnitSystem::Metric => UnitSystem::Imperial,
            UnitSystem::Imperial => UnitSystem::Metric,
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitSystem {
    type Err = TrackingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metric" => Ok(UnitSystem::Metric),
            "imperial" => Ok(UnitSystem::Imperial),
            other => Err(TrackingError::ConfigError {
                message: format!("unknown unit system '{}'", other),
            }),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// m/s to km/h or mph.
pub fn convert_speed(speed_ms: f64, unit: UnitSystem) -> f64 {
    match unit {
        UnitSystem::Metric => speed_ms * MS_TO_KMH,
        UnitSystem::Imperial => speed_ms * MS_TO_MPH,
    }
}

/// m to km or miles.
pub fn convert_distance(distance_m: f64, unit: UnitSystem) -> f64 {
    match unit {
        UnitSystem::Metric => distance_m * METERS_TO_KM,
        UnitSystem::Imperial => distance_m * METERS_TO_MILES,
    }
}

/// m to m or ft.
pub fn convert_altitude(altitude_m: f64, unit: UnitSystem) -> f64 {
    match unit {
        UnitSystem::Metric => altitude_m,
        UnitSystem::Imperial => altitude_m * METERS_TO_FEET,
    }
}

/// Inverse of [`convert_speed`].
pub fn speed_to_si(value: f64, unit: UnitSystem) -> f64 {
    match unit {
        UnitSystem::Metric => value / MS_TO_KMH,
        UnitSystem::Imperial => value / MS_TO_MPH,
    }
}

/// Inverse of [`convert_distance`].
pub fn distance_to_si(value: f64, unit: UnitSystem) -> f64 {
    match unit {
        UnitSystem::Metric => value / METERS_TO_KM,
        UnitSystem::Imperial => value / METERS_TO_MILES,
    }
}

/// Inverse of [`convert_altitude`].
pub fn altitude_to_si(value: f64, unit: UnitSystem) -> f64 {
    match unit {
        UnitSystem::Metric => value,
        UnitSystem::Imperial => value / METERS_TO_FEET,
    }
}

pub fn speed_label(unit: UnitSystem) -> &'static str {
    match unit {
        UnitSystem::Metric => "km/h",
        UnitSystem::Imperial => "mph",
    }
}

pub fn distance_label(unit: UnitSystem) -> &'static str {
    match unit {
        UnitSystem::Metric => "km",
        UnitSystem::Imperial => "mi",
    }
}

pub fn altitude_label(unit: UnitSystem) -> &'static str {
    match unit {
        UnitSystem::Metric => "m",
        UnitSystem::Imperial => "ft",
    }
}

// ============================================================================
// Formatting
// ============================================================================

/// Round to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Seconds as `HH:MM:SS`. Negative or non-finite input formats as zero.
pub fn format_duration(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// Coordinate with a fixed number of decimals.
pub fn format_coordinate(value: f64, decimals: usize) -> String {
    format!("{:.*}", decimals, value)
}

const DIRECTIONS: [&str; 8] = ["N", "NE", "E", "SE", "S", "SW", "W", "NW"];

/// 8-point compass direction for a bearing in degrees.
pub fn compass_direction(bearing: f64) -> &'static str {
    let normalized = bearing.rem_euclid(360.0);
    let index = (normalized / 45.0).round() as usize % 8;
    DIRECTIONS[index]
}

/// GPS signal quality bucketed from horizontal accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SignalStrength {
    Excellent,
    Good,
    Fair,
    Poor,
    Weak,
}

impl SignalStrength {
    pub fn from_accuracy(accuracy_m: f64) -> Self {
        match accuracy_m {
            a if a <= 5.0 => SignalStrength::Excellent,
            a if a <= 10.0 => SignalStrength::Good,
            a if a <= 20.0 => SignalStrength::Fair,
            a if a <= 50.0 => SignalStrength::Poor,
            _ => SignalStrength::Weak,
        }
    }

    /// Number of filled bars out of 4.
    pub fn bars(&self) -> u8 {
        match self {
            SignalStrength::Excellent => 4,
            SignalStrength::Good => 3,
            SignalStrength::Fair => 2,
            SignalStrength::Poor => 1,
            SignalStrength::Weak => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SignalStrength::Excellent => "Excellent",
            SignalStrength::Good => "Good",
            SignalStrength::Fair => "Fair",
            SignalStrength::Poor => "Poor",
            SignalStrength::Weak => "Weak",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_speed() {
        assert!((convert_speed(10.0, UnitSystem::Metric) - 36.0).abs() < 1e-9);
        assert!((convert_speed(10.0, UnitSystem::Imperial) - 22.37).abs() < 1e-9);
    }

    #[test]
    fn test_convert_distance_and_altitude() {
        assert!((convert_distance(1500.0, UnitSystem::Metric) - 1.5).abs() < 1e-9);
        assert!((convert_distance(1609.344, UnitSystem::Imperial) - 1.0).abs() < 1e-3);
        assert_eq!(convert_altitude(100.0, UnitSystem::Metric), 100.0);
        assert!((convert_altitude(100.0, UnitSystem::Imperial) - 328.084).abs() < 1e-9);
    }

    #[test]
    fn test_inverse_round_trip() {
        for unit in [UnitSystem::Metric, UnitSystem::Imperial] {
            for x in [0.0, 1.0, 12.5, 1234.567] {
                assert!((speed_to_si(convert_speed(x, unit), unit) - x).abs() < 1e-9);
                assert!((distance_to_si(convert_distance(x, unit), unit) - x).abs() < 1e-9);
                assert!((altitude_to_si(convert_altitude(x, unit), unit) - x).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_labels() {
        assert_eq!(speed_label(UnitSystem::Metric), "km/h");
        assert_eq!(speed_label(UnitSystem::Imperial), "mph");
        assert_eq!(distance_label(UnitSystem::Imperial), "mi");
        assert_eq!(altitude_label(UnitSystem::Imperial), "ft");
    }

    #[test]
    fn test_unit_system_parse() {
        assert_eq!("metric".parse::<UnitSystem>().unwrap(), UnitSystem::Metric);
        assert_eq!("imperial".parse::<UnitSystem>().unwrap(), UnitSystem::Imperial);
        assert!("furlongs".parse::<UnitSystem>().is_err());
        assert_eq!(UnitSystem::Metric.toggle(), UnitSystem::Imperial);
        assert_eq!(UnitSystem::Imperial.to_string(), "imperial");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(3661.0), "01:01:01");
        assert_eq!(format_duration(59.9), "00:00:59");
        assert_eq!(format_duration(0.0), "00:00:00");
        assert_eq!(format_duration(-5.0), "00:00:00");
        assert_eq!(format_duration(360_000.0), "100:00:00");
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(format_coordinate(51.507412, 4), "51.5074");
        assert_eq!(round_to(3.14159, 2), 3.14);
    }

    #[test]
    fn test_compass_direction() {
        assert_eq!(compass_direction(0.0), "N");
        assert_eq!(compass_direction(44.0), "NE");
        assert_eq!(compass_direction(180.0), "S");
        assert_eq!(compass_direction(350.0), "N");
        assert_eq!(compass_direction(-90.0), "W");
    }

    #[test]
    fn test_signal_strength() {
        assert_eq!(SignalStrength::from_accuracy(3.0), SignalStrength::Excellent);
        assert_eq!(SignalStrength::from_accuracy(10.0), SignalStrength::Good);
        assert_eq!(SignalStrength::from_accuracy(15.0).bars(), 2);
        assert_eq!(SignalStrength::from_accuracy(50.0), SignalStrength::Poor);
        assert_eq!(SignalStrength::from_accuracy(51.0).label(), "Weak");
    }
}
