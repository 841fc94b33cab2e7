//! # Tracking Engine
//!
//! Session lifecycle coordinator. The engine is the single owner of
//! [`TrackingState`]: every mutation arrives as a [`Command`] and is applied
//! in the order received.
//!
//! ## Lifecycle
//!
//! ```text
//!   Idle --Start--> Active --Stop--> Idle
//! ```
//!
//! - `Start` while Active is ignored (state unchanged, logged).
//! - `Stop` while Idle is a silent no-op.
//! - `Stop` always returns to Idle. If the store rejects the finalized
//!   session it is kept in `pending_saves` until `RetryPendingSaves`.
//!
//! Collaborator failures never propagate out of [`TrackingEngine::dispatch`];
//! they are logged and surfaced through `TrackingState::error`.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::config::UNIT_PREFERENCE_KEY;
use crate::geo_utils::{bearing, haversine_distance};
use crate::statistics::SessionAccumulator;
use crate::{
    BackgroundQueue, Clock, LocationSample, SessionStore, SessionSummary, SignalStrength,
    TrackerConfig, TrackingError, TrackingSession, UnitSystem,
};

/// Minimum hop in meters before a course is derived from positions.
const MIN_COURSE_HOP_M: f64 = 0.5;

// ============================================================================
// State
// ============================================================================

/// Everything the UI renders, owned by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingState {
    pub is_tracking: bool,
    /// The active session, if any
    pub current_session: Option<TrackingSession>,
    /// Last sample seen, whether or not a session was active
    pub current_location: Option<LocationSample>,
    /// Persisted history
    pub sessions: Vec<TrackingSession>,
    pub unit_system: UnitSystem,
    /// Last user-facing failure; cleared by `ClearError` or `Start`
    pub error: Option<String>,
    /// Finalized sessions the store refused
    pub pending_saves: Vec<TrackingSession>,
}

impl TrackingState {
    /// Direction of travel in degrees.
    ///
    /// Uses the reported heading when there is one, otherwise the bearing
    /// between the last two points of the active session.
    pub fn current_course(&self) -> Option<f64> {
        let location = self.current_location?;
        if location.heading > 0.0 {
            return Some(location.heading);
        }
        let points = &self.current_session.as_ref()?.points;
        let [.., previous, last] = points.as_slice() else {
            return None;
        };
        if haversine_distance(previous, last) < MIN_COURSE_HOP_M {
            return None;
        }
        Some(bearing(previous, last))
    }

    pub fn signal_strength(&self) -> Option<SignalStrength> {
        self.current_location
            .map(|l| SignalStrength::from_accuracy(l.accuracy))
    }

    /// History list records, newest first.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> =
            self.sessions.iter().map(TrackingSession::summary).collect();
        summaries.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        summaries
    }
}

// ============================================================================
// Commands
// ============================================================================

/// A request to change tracking state.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Stop,
    SampleArrived(LocationSample),
    /// App returned to the foreground; replay queued background samples
    Foreground,
    SetUnitSystem(UnitSystem),
    DeleteSession(String),
    ClearAllSessions,
    /// Load history and preferences from the store
    LoadSessions,
    ReportError(String),
    ClearError,
    RetryPendingSaves,
}

/// What a command did.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Started { session_id: String },
    Stopped { session_id: String, persisted: bool },
    /// `folded` is false when no session was active
    SampleApplied { folded: bool },
    Reconciled { replayed: usize },
    SavesRetried { saved: usize, remaining: usize },
    Applied,
    /// Not valid in the current state; nothing changed
    Ignored,
    Failed(TrackingError),
}

// ============================================================================
// Engine
// ============================================================================

/// Owns tracking state and applies commands to it.
pub struct TrackingEngine {
    state: TrackingState,
    store: Arc<dyn SessionStore>,
    queue: Option<Arc<dyn BackgroundQueue>>,
    clock: Arc<dyn Clock>,
    accumulator: SessionAccumulator,
    config: TrackerConfig,
}

impl TrackingEngine {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>, config: TrackerConfig) -> Self {
        Self {
            state: TrackingState::default(),
            store,
            queue: None,
            clock,
            accumulator: SessionAccumulator::new(config.statistics_mode),
            config,
        }
    }

    /// Attach the queue drained on `Foreground`.
    pub fn with_queue(mut self, queue: Arc<dyn BackgroundQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn state(&self) -> &TrackingState {
        &self.state
    }

    pub fn snapshot(&self) -> TrackingState {
        self.state.clone()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub fn is_tracking(&self) -> bool {
        self.state.is_tracking
    }

    /// Apply one command.
    pub fn dispatch(&mut self, command: Command) -> CommandOutcome {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::SampleArrived(sample) => self.on_sample(sample),
            Command::Foreground => self.reconcile_background(),
            Command::SetUnitSystem(unit) => self.set_unit_system(unit),
            Command::DeleteSession(id) => self.delete_session(&id),
            Command::ClearAllSessions => self.clear_all(),
            Command::LoadSessions => self.load(),
            Command::ReportError(message) => {
                warn!("[TrackingEngine] {}", message);
                self.state.error = Some(message);
                CommandOutcome::Applied
            }
            Command::ClearError => {
                self.state.error = None;
                CommandOutcome::Applied
            }
            Command::RetryPendingSaves => self.retry_pending_saves(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Begin a new session. Ignored if one is already active.
    pub fn start(&mut self) -> CommandOutcome {
        if let Some(active) = &self.state.current_session {
            info!(
                "[TrackingEngine] Start ignored, session {} already active",
                active.id
            );
            return CommandOutcome::Ignored;
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let start_time = self.clock.now_ms();
        self.state.current_session = Some(TrackingSession::new(session_id.clone(), start_time));
        self.state.is_tracking = true;
        self.state.error = None;
        self.accumulator.reset();

        info!("[TrackingEngine] Started session {}", session_id);
        CommandOutcome::Started { session_id }
    }

    /// Finalize the active session and hand it to the store.
    pub fn stop(&mut self) -> CommandOutcome {
        let Some(mut session) = self.state.current_session.take() else {
            debug!("[TrackingEngine] Stop with no active session");
            return CommandOutcome::Ignored;
        };
        self.state.is_tracking = false;
        self.accumulator.reset();

        if let Err(e) = session.finalize(self.clock.now_ms()) {
            return self.fail("Failed to stop session", e);
        }

        let session_id = session.id.clone();
        match self.store.save(&session) {
            Ok(()) => {
                info!(
                    "[TrackingEngine] Stopped session {} ({} points, {:.1}m)",
                    session_id,
                    session.points.len(),
                    session.statistics.total_distance
                );
                self.state.sessions.push(session);
                CommandOutcome::Stopped {
                    session_id,
                    persisted: true,
                }
            }
            Err(e) => {
                warn!(
                    "[TrackingEngine] Failed to save session {}: {}",
                    session_id, e
                );
                self.state.error = Some(format!("Failed to save session: {}", e));
                self.state.pending_saves.push(session);
                CommandOutcome::Stopped {
                    session_id,
                    persisted: false,
                }
            }
        }
    }

    /// Record a sample and fold it into the active session, if any.
    pub fn on_sample(&mut self, sample: LocationSample) -> CommandOutcome {
        if !sample.is_valid() {
            let e = TrackingError::provider(format!(
                "Rejected sample with invalid coordinates ({}, {})",
                sample.latitude, sample.longitude
            ));
            warn!("[TrackingEngine] {}", e);
            return CommandOutcome::Failed(e);
        }

        self.state.current_location = Some(sample);
        let folded = match self.state.current_session.as_mut() {
            Some(session) => self.accumulator.fold(session, sample, self.clock.now_ms()),
            None => false,
        };
        CommandOutcome::SampleApplied { folded }
    }

    /// Drain the background queue and replay it in FIFO order.
    ///
    /// A failed drain leaves the queue untouched.
    pub fn reconcile_background(&mut self) -> CommandOutcome {
        let Some(queue) = self.queue.clone() else {
            return CommandOutcome::Reconciled { replayed: 0 };
        };

        let batch = match queue.drain() {
            Ok(batch) => batch,
            Err(e) => {
                warn!("[TrackingEngine] Failed to drain background queue: {}", e);
                self.state.error = Some(format!("Failed to process background locations: {}", e));
                return CommandOutcome::Failed(e);
            }
        };

        let replayed = batch.len();
        for sample in batch {
            self.on_sample(sample);
        }
        if replayed > 0 {
            info!("[TrackingEngine] Replayed {} background samples", replayed);
        }
        CommandOutcome::Reconciled { replayed }
    }

    /// Re-submit sessions the store previously refused.
    pub fn retry_pending_saves(&mut self) -> CommandOutcome {
        let pending = std::mem::take(&mut self.state.pending_saves);
        let mut saved = 0;

        for session in pending {
            match self.store.save(&session) {
                Ok(()) => {
                    saved += 1;
                    self.state.sessions.push(session);
                }
                Err(e) => {
                    warn!("[TrackingEngine] Retry failed for {}: {}", session.id, e);
                    self.state.pending_saves.push(session);
                }
            }
        }

        let remaining = self.state.pending_saves.len();
        if remaining == 0 {
            self.state.error = None;
        } else {
            self.state.error = Some(format!("{} sessions could not be saved", remaining));
        }
        info!(
            "[TrackingEngine] Retried saves: {} saved, {} remaining",
            saved, remaining
        );
        CommandOutcome::SavesRetried { saved, remaining }
    }

    // ========================================================================
    // History and preferences
    // ========================================================================

    /// Load persisted sessions and the unit preference.
    pub fn load(&mut self) -> CommandOutcome {
        let sessions = match self.store.load_all() {
            Ok(sessions) => sessions,
            Err(e) => return self.fail("Failed to load sessions", e),
        };
        info!("[TrackingEngine] Loaded {} sessions", sessions.len());
        self.state.sessions = sessions;

        match self.store.get_preference(UNIT_PREFERENCE_KEY) {
            Ok(Some(value)) => match value.parse::<UnitSystem>() {
                Ok(unit) => self.state.unit_system = unit,
                Err(e) => warn!("[TrackingEngine] Ignoring stored unit preference: {}", e),
            },
            Ok(None) => {}
            Err(e) => return self.fail("Failed to load unit preference", e),
        }
        CommandOutcome::Applied
    }

    /// Change the display unit and persist it.
    ///
    /// The in-memory choice sticks even if persisting it fails.
    pub fn set_unit_system(&mut self, unit: UnitSystem) -> CommandOutcome {
        self.state.unit_system = unit;
        match self.store.set_preference(UNIT_PREFERENCE_KEY, unit.as_str()) {
            Ok(()) => CommandOutcome::Applied,
            Err(e) => self.fail("Failed to save unit preference", e),
        }
    }

    /// Delete from the store first, then from memory.
    pub fn delete_session(&mut self, id: &str) -> CommandOutcome {
        if let Err(e) = self.store.delete(id) {
            return self.fail("Failed to delete session", e);
        }
        self.state.sessions.retain(|s| s.id != id);
        info!("[TrackingEngine] Deleted session {}", id);
        CommandOutcome::Applied
    }

    pub fn clear_all(&mut self) -> CommandOutcome {
        if let Err(e) = self.store.clear_all() {
            return self.fail("Failed to clear sessions", e);
        }
        self.state.sessions.clear();
        info!("[TrackingEngine] Cleared all sessions");
        CommandOutcome::Applied
    }

    /// Log a failure and surface it unless it is an invalid transition.
    fn fail(&mut self, context: &str, e: TrackingError) -> CommandOutcome {
        warn!("[TrackingEngine] {}: {}", context, e);
        if e.is_user_facing() {
            self.state.error = Some(format!("{}: {}", context, e));
        }
        CommandOutcome::Failed(e)
    }
}

// ============================================================================
// Tests
// ============================================================================
