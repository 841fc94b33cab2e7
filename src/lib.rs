//! # SpeedTrack
//!
//! GPS session tracking core for mobile apps.
//!
//! This library provides:
//! - Location ingestion: normalization and filtering of raw platform fixes
//! - Session statistics: distance, average/max/min speed and duration
//! - Session lifecycle: start/stop, finalization and hand-off to storage
//! - Background reconciliation: replay of fixes queued while backgrounded
//! - Unit conversion, formatting helpers and JSON/CSV export
//!
//! ## Features
//!
//! - **`persistence`** - SQLite storage for sessions, preferences and the background queue
//! - **`runtime`** - Async tracking service (tokio command loop)
//! - **`ffi`** - FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use speedtrack::{LocationSample, TrackingSession, statistics::fold};
//!
//! let mut session = TrackingSession::new("session-1".to_string(), 0);
//! fold(&mut session, LocationSample::new(0.0, 0.0, 1_000).with_speed(10.0), 2_000);
//! fold(&mut session, LocationSample::new(0.0, 0.001, 2_000).with_speed(12.0), 2_000);
//!
//! assert_eq!(session.points.len(), 2);
//! assert!((session.statistics.total_distance - 111.19).abs() < 0.01);
//! assert_eq!(session.statistics.avg_speed, 11.0);
//! ```

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{Result, TrackingError};

// Geographic utilities (haversine distance, bearing)
pub mod geo_utils;

// Unit conversion and display formatting
pub mod units;
pub use units::{SignalStrength, UnitSystem};

// Tracker configuration
pub mod config;
pub use config::{StatisticsMode, TrackerConfig};

// Session statistics accumulator
pub mod statistics;

// Location ingestion pipeline (platform fixes -> samples)
pub mod ingestion;
pub use ingestion::{
    LocationProvider, LocationWatcher, PermissionLevel, PermissionStatus, RawFix, Subscription,
    WatchRequest,
};

// Storage collaborator contracts and the in-memory implementation
pub mod store;
pub use store::{BackgroundQueue, MemoryStore, SessionStore};

// Background sample queue reconciliation
pub mod background;

// Session lifecycle engine (single state owner)
pub mod engine;
pub use engine::{Command, CommandOutcome, TrackingEngine, TrackingState};

// JSON / CSV export
pub mod export;

// Network reachability monitoring (display only)
pub mod network;
pub use network::{NetworkMonitor, NetworkStatus};

// SQLite-backed storage
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Async tracking service
#[cfg(feature = "runtime")]
pub mod service;
#[cfg(feature = "runtime")]
pub use service::{TrackingHandle, TrackingService};

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("SpeedTrackRust"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// One GPS fix in canonical form.
///
/// Fields the platform could not provide are stored as `0`.
///
/// # Example
/// ```
/// use speedtrack::LocationSample;
/// let sample = LocationSample::new(51.5074, -0.1278, 1_700_000_000_000).with_speed(3.2);
/// assert!(sample.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters above sea level
    pub altitude: f64,
    /// Meters per second
    pub speed: f64,
    /// Horizontal uncertainty in meters
    pub accuracy: f64,
    /// Degrees clockwise from north, 0..360
    pub heading: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl LocationSample {
    /// Create a sample with only a position and timestamp.
    pub fn new(latitude: f64, longitude: f64, timestamp: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: 0.0,
            speed: 0.0,
            accuracy: 0.0,
            heading: 0.0,
            timestamp,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = heading;
        self
    }

    /// Check if the sample has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Aggregates derived from a session's points.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistics {
    /// Meters along the path in arrival order
    pub total_distance: f64,
    /// Mean of positive speeds (m/s)
    pub avg_speed: f64,
    /// Max of positive speeds (m/s)
    pub max_speed: f64,
    /// Min of positive speeds (m/s)
    pub min_speed: f64,
    /// Wall-clock seconds since session start
    pub duration: f64,
}

/// One tracking interval from start to stop.
///
/// A session is *active* until `end_time` is stamped, after which it is
/// *finalized* and no longer accepts points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub id: String,
    /// Epoch ms, set at creation
    pub start_time: i64,
    /// Epoch ms, set exactly once at finalization
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub points: Vec<LocationSample>,
    pub statistics: SessionStatistics,
}

impl TrackingSession {
    /// Create an empty active session.
    pub fn new(id: String, start_time: i64) -> Self {
        Self {
            id,
            start_time,
            end_time: None,
            points: Vec::new(),
            statistics: SessionStatistics::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Stamp the end time. Fails if the session was already finalized.
    pub fn finalize(&mut self, end_time: i64) -> Result<()> {
        if let Some(existing) = self.end_time {
            return Err(TrackingError::InvalidState {
                message: format!(
                    "session '{}' already finalized at {}",
                    self.id, existing
                ),
            });
        }
        self.end_time = Some(end_time);
        Ok(())
    }

    /// Seconds between the earliest and latest sample timestamps.
    ///
    /// This can disagree with `statistics.duration`, which is measured
    /// against the wall clock from `start_time`.
    pub fn points_span_secs(&self) -> f64 {
        let min = self.points.iter().map(|p| p.timestamp).min();
        let max = self.points.iter().map(|p| p.timestamp).max();
        match (min, max) {
            (Some(min), Some(max)) => (max - min) as f64 / 1000.0,
            _ => 0.0,
        }
    }

    /// Lightweight list-view record (no point data).
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            point_count: self.points.len() as u32,
            statistics: self.statistics,
            bounds: Bounds::from_points(&self.points),
        }
    }
}

/// Bounding box of a session path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from samples.
    pub fn from_points(points: &[LocationSample]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }
}

/// Session metadata for history list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub point_count: u32,
    pub statistics: SessionStatistics,
    pub bounds: Option<Bounds>,
}

// ============================================================================
// Clock
// ============================================================================

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
