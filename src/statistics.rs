//! # Session Statistics
//!
//! Folds location samples into a session and keeps its aggregates in sync.
//!
//! Two strategies are available (see [`StatisticsMode`]):
//!
//! - **Full recompute** (default): every fold rebuilds distance and speed
//!   aggregates from the complete point list. O(n) per fold, and the result
//!   depends only on the final point sequence.
//! - **Incremental**: distance grows by the hop from the previous point and
//!   speed aggregates are running values. O(1) per fold; gives the same
//!   output as full recompute for append-only sequences.
//!
//! Distance is measured along points in *arrival* order, not timestamp
//! order, so a single mis-ordered fix affects the total.

use crate::config::StatisticsMode;
use crate::geo_utils::{haversine_distance, polyline_length};
use crate::{LocationSample, SessionStatistics, TrackingSession};

/// Append `sample` to an active session and recompute its statistics.
///
/// `now_ms` is the wall-clock time of the fold; duration is measured from
/// `session.start_time` to it, not from sample timestamps.
///
/// Returns `false` without touching the session if it is already finalized.
pub fn fold(session: &mut TrackingSession, sample: LocationSample, now_ms: i64) -> bool {
    if !session.is_active() {
        return false;
    }
    session.points.push(sample);
    session.statistics = compute_statistics(&session.points, session.start_time, now_ms);
    true
}

/// Statistics for a point sequence, computed from scratch.
pub fn compute_statistics(
    points: &[LocationSample],
    start_time: i64,
    now_ms: i64,
) -> SessionStatistics {
    let (avg_speed, max_speed, min_speed) = speed_aggregates(points);
    SessionStatistics {
        total_distance: polyline_length(points),
        avg_speed,
        max_speed,
        min_speed,
        duration: elapsed_secs(start_time, now_ms),
    }
}

/// (avg, max, min) over speeds > 0. All zero when no point is moving.
pub fn speed_aggregates(points: &[LocationSample]) -> (f64, f64, f64) {
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut max = f64::MIN;
    let mut min = f64::MAX;

    for speed in points.iter().map(|p| p.speed).filter(|s| *s > 0.0) {
        sum += speed;
        count += 1;
        max = max.max(speed);
        min = min.min(speed);
    }

    if count == 0 {
        (0.0, 0.0, 0.0)
    } else {
        (sum / count as f64, max, min)
    }
}

fn elapsed_secs(start_time: i64, now_ms: i64) -> f64 {
    (now_ms - start_time) as f64 / 1000.0
}

// ============================================================================
// Accumulator
// ============================================================================

/// Running aggregates for incremental mode.
#[derive(Debug, Clone, Copy, Default)]
struct RunningStats {
    distance: f64,
    speed_sum: f64,
    speed_count: usize,
    max_speed: f64,
    min_speed: f64,
    last: Option<LocationSample>,
}

impl RunningStats {
    fn push(&mut self, sample: &LocationSample) {
        if let Some(last) = &self.last {
            self.distance += haversine_distance(last, sample);
        }
        if sample.speed > 0.0 {
            if self.speed_count == 0 {
                self.max_speed = sample.speed;
                self.min_speed = sample.speed;
            } else {
                self.max_speed = self.max_speed.max(sample.speed);
                self.min_speed = self.min_speed.min(sample.speed);
            }
            self.speed_sum += sample.speed;
            self.speed_count += 1;
        }
        self.last = Some(*sample);
    }

    fn snapshot(&self, start_time: i64, now_ms: i64) -> SessionStatistics {
        let avg_speed = if self.speed_count == 0 {
            0.0
        } else {
            self.speed_sum / self.speed_count as f64
        };
        SessionStatistics {
            total_distance: self.distance,
            avg_speed,
            max_speed: self.max_speed,
            min_speed: self.min_speed,
            duration: elapsed_secs(start_time, now_ms),
        }
    }
}

/// Applies samples to the active session using the configured strategy.
#[derive(Debug, Clone)]
pub struct SessionAccumulator {
    mode: StatisticsMode,
    running: RunningStats,
    /// Session the running state belongs to
    session_id: Option<String>,
}

impl SessionAccumulator {
    pub fn new(mode: StatisticsMode) -> Self {
        Self {
            mode,
            running: RunningStats::default(),
            session_id: None,
        }
    }

    pub fn mode(&self) -> StatisticsMode {
        self.mode
    }

    /// Drop running state; the next fold re-seeds from the session.
    pub fn reset(&mut self) {
        self.running = RunningStats::default();
        self.session_id = None;
    }

    /// Fold one sample into `session`. Returns `false` if the session is finalized.
    pub fn fold(
        &mut self,
        session: &mut TrackingSession,
        sample: LocationSample,
        now_ms: i64,
    ) -> bool {
        match self.mode {
            StatisticsMode::FullRecompute => fold(session, sample, now_ms),
            StatisticsMode::Incremental => {
                if !session.is_active() {
                    return false;
                }
                if self.session_id.as_deref() != Some(session.id.as_str()) {
                    self.seed(session);
                }
                session.points.push(sample);
                self.running.push(&sample);
                session.statistics = self.running.snapshot(session.start_time, now_ms);
                true
            }
        }
    }

    /// Rebuild running state from the points already in `session`.
    fn seed(&mut self, session: &TrackingSession) {
        self.running = RunningStats::default();
        for p in &session.points {
            self.running.push(p);
        }
        self.session_id = Some(session.id.clone());
    }
}

// ============================================================================
// Tests
// ============================================================================
