//! FFI bindings for mobile platforms (iOS/Android).
//!
//! The platform owns the OS location APIs and pushes fixes in; Rust owns
//! session state, statistics and storage. One [`SpeedTracker`] object wraps
//! one engine and its SQLite store. Functions prefixed with `ffi_` expose
//! the pure helpers.

use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::background::record_background_fixes;
use crate::config::UNIT_PREFERENCE_KEY;
use crate::engine::{Command, CommandOutcome, TrackingEngine};
use crate::ingestion::{normalize, RawFix};
use crate::{
    export, geo_utils, init_logging, units, Clock, LocationSample, SessionSummary,
    SignalStrength, SqliteStore, SystemClock, TrackerConfig, TrackingError, TrackingSession,
    UnitSystem,
};

// ============================================================================
// Tracker Object
// ============================================================================

/// Tracking state as seen by the UI.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTrackingState {
    pub is_tracking: bool,
    pub current_session: Option<TrackingSession>,
    pub current_location: Option<LocationSample>,
    pub unit_system: UnitSystem,
    pub error: Option<String>,
    pub pending_save_count: u32,
    /// Direction of travel in degrees, if known
    pub course: Option<f64>,
    pub signal: Option<SignalStrength>,
}

/// Session tracker backed by a SQLite database.
#[derive(uniffi::Object)]
pub struct SpeedTracker {
    engine: Mutex<TrackingEngine>,
    store: Arc<SqliteStore>,
    clock: Arc<dyn Clock>,
}

impl SpeedTracker {
    fn with_engine<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut TrackingEngine) -> R,
    {
        let mut guard = self.engine.lock().ok()?;
        Some(f(&mut guard))
    }

    fn dispatch(&self, command: Command) -> Option<CommandOutcome> {
        self.with_engine(|e| e.dispatch(command))
    }
}

#[uniffi::export]
impl SpeedTracker {
    /// Open the database at `db_path` and load history and preferences.
    ///
    /// `config_json` may be empty for defaults.
    #[uniffi::constructor]
    pub fn new(db_path: String, config_json: String) -> Result<Arc<Self>, TrackingError> {
        init_logging();
        info!("[SpeedTracker] Initializing with db: {}", db_path);

        let config = if config_json.trim().is_empty() {
            TrackerConfig::default()
        } else {
            TrackerConfig::from_json(&config_json)?
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let mut engine = TrackingEngine::new(store.clone(), clock.clone(), config)
            .with_queue(store.clone());
        engine.dispatch(Command::LoadSessions);

        Ok(Arc::new(Self {
            engine: Mutex::new(engine),
            store,
            clock,
        }))
    }

    /// Begin a session. False if one is already active.
    pub fn start(&self) -> bool {
        matches!(
            self.dispatch(Command::Start),
            Some(CommandOutcome::Started { .. })
        )
    }

    /// Finalize the active session. False if none was active or the save
    /// failed (the session is then kept for a retry).
    pub fn stop(&self) -> bool {
        matches!(
            self.dispatch(Command::Stop),
            Some(CommandOutcome::Stopped {
                persisted: true,
                ..
            })
        )
    }

    /// Feed one live fix. False if it was rejected.
    pub fn on_location(&self, fix: RawFix) -> bool {
        match normalize(&fix, self.clock.now_ms()) {
            Ok(sample) => matches!(
                self.dispatch(Command::SampleArrived(sample)),
                Some(CommandOutcome::SampleApplied { .. })
            ),
            Err(e) => {
                self.dispatch(Command::ReportError(e.to_string()));
                false
            }
        }
    }

    /// Queue fixes delivered to the background task. Returns how many were kept.
    pub fn record_background_locations(&self, fixes: Vec<RawFix>) -> u32 {
        match record_background_fixes(&*self.store, &fixes, &*self.clock) {
            Ok(count) => count as u32,
            Err(e) => {
                warn!("[SpeedTracker] Failed to store background locations: {}", e);
                0
            }
        }
    }

    /// Replay queued background fixes. Returns how many were replayed.
    pub fn on_app_foreground(&self) -> u32 {
        match self.dispatch(Command::Foreground) {
            Some(CommandOutcome::Reconciled { replayed }) => replayed as u32,
            _ => 0,
        }
    }

    pub fn state(&self) -> Option<FfiTrackingState> {
        self.with_engine(|e| {
            let state = e.state();
            FfiTrackingState {
                is_tracking: state.is_tracking,
                current_session: state.current_session.clone(),
                current_location: state.current_location,
                unit_system: state.unit_system,
                error: state.error.clone(),
                pending_save_count: state.pending_saves.len() as u32,
                course: state.current_course(),
                signal: state.signal_strength(),
            }
        })
    }

    /// History list records, newest first.
    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        self.with_engine(|e| e.state().summaries())
            .unwrap_or_default()
    }

    pub fn get_session(&self, id: String) -> Option<TrackingSession> {
        self.with_engine(|e| e.state().sessions.iter().find(|s| s.id == id).cloned())
            .flatten()
    }

    pub fn delete_session(&self, id: String) -> bool {
        matches!(
            self.dispatch(Command::DeleteSession(id)),
            Some(CommandOutcome::Applied)
        )
    }

    pub fn clear_all_sessions(&self) -> bool {
        matches!(
            self.dispatch(Command::ClearAllSessions),
            Some(CommandOutcome::Applied)
        )
    }

    pub fn set_unit_system(&self, unit: UnitSystem) {
        self.dispatch(Command::SetUnitSystem(unit));
    }

    pub fn toggle_unit_system(&self) -> UnitSystem {
        let next = self
            .with_engine(|e| e.state().unit_system.toggle())
            .unwrap_or_default();
        self.set_unit_system(next);
        next
    }

    pub fn clear_error(&self) {
        self.dispatch(Command::ClearError);
    }

    /// Re-submit sessions whose save failed. Returns how many remain.
    pub fn retry_pending_saves(&self) -> u32 {
        match self.dispatch(Command::RetryPendingSaves) {
            Some(CommandOutcome::SavesRetried { remaining, .. }) => remaining as u32,
            _ => 0,
        }
    }

    /// All persisted sessions as pretty JSON; `[]` on failure.
    pub fn export_json(&self) -> String {
        export::export_store_json(&*self.store).unwrap_or_else(|e| {
            warn!("[SpeedTracker] Export sessions error: {}", e);
            "[]".to_string()
        })
    }

    /// All persisted sessions as CSV; empty on failure.
    pub fn export_csv(&self) -> String {
        export::export_store_csv(&*self.store).unwrap_or_else(|e| {
            warn!("[SpeedTracker] Export CSV error: {}", e);
            String::new()
        })
    }

    /// A coordinate at the tracker's configured display precision.
    pub fn format_coordinate(&self, value: f64) -> String {
        self.with_engine(|e| e.config().format_coordinate(value))
            .unwrap_or_else(|| TrackerConfig::default().format_coordinate(value))
    }

    /// The persisted unit preference, read straight from storage.
    pub fn stored_unit_preference(&self) -> Option<UnitSystem> {
        use crate::SessionStore;
        self.store
            .get_preference(UNIT_PREFERENCE_KEY)
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
    }
}

// ============================================================================
// Units and Formatting
// ============================================================================

#[uniffi::export]
pub fn ffi_convert_speed(speed_ms: f64, unit: UnitSystem) -> f64 {
    units::convert_speed(speed_ms, unit)
}

#[uniffi::export]
pub fn ffi_convert_distance(distance_m: f64, unit: UnitSystem) -> f64 {
    units::convert_distance(distance_m, unit)
}

#[uniffi::export]
pub fn ffi_convert_altitude(altitude_m: f64, unit: UnitSystem) -> f64 {
    units::convert_altitude(altitude_m, unit)
}

#[uniffi::export]
pub fn ffi_speed_label(unit: UnitSystem) -> String {
    units::speed_label(unit).to_string()
}

#[uniffi::export]
pub fn ffi_distance_label(unit: UnitSystem) -> String {
    units::distance_label(unit).to_string()
}

#[uniffi::export]
pub fn ffi_altitude_label(unit: UnitSystem) -> String {
    units::altitude_label(unit).to_string()
}

/// Seconds as HH:MM:SS.
#[uniffi::export]
pub fn ffi_format_duration(seconds: f64) -> String {
    units::format_duration(seconds)
}

#[uniffi::export]
pub fn ffi_format_coordinate(value: f64, decimals: u32) -> String {
    units::format_coordinate(value, decimals as usize)
}

#[uniffi::export]
pub fn ffi_compass_direction(bearing: f64) -> String {
    units::compass_direction(bearing).to_string()
}

#[uniffi::export]
pub fn ffi_signal_strength(accuracy_m: f64) -> SignalStrength {
    SignalStrength::from_accuracy(accuracy_m)
}

#[uniffi::export]
pub fn ffi_signal_bars(accuracy_m: f64) -> u8 {
    SignalStrength::from_accuracy(accuracy_m).bars()
}

// ============================================================================
// Geometry and Config
// ============================================================================

/// Great-circle distance in meters.
#[uniffi::export]
pub fn ffi_haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    geo_utils::haversine_m(lat1, lon1, lat2, lon2)
}

#[uniffi::export]
pub fn default_tracker_config() -> TrackerConfig {
    TrackerConfig::default()
}
