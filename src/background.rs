//! # Background Reconciliation
//!
//! While the app is backgrounded the OS delivers fixes to a background task
//! that cannot reach the engine. The task appends normalized samples to a
//! [`BackgroundQueue`]; on return to the foreground the engine drains the
//! queue and replays it through the same path as live samples, then the
//! live subscription is re-established.
//!
//! The replay finishes before the live stream restarts, so queued samples
//! always precede samples captured after resuming.

use log::{info, warn};

use crate::engine::{Command, CommandOutcome, TrackingEngine};
use crate::ingestion::{normalize, LocationProvider, LocationWatcher, RawFix};
use crate::{BackgroundQueue, Clock, LocationSample, Result};

/// Producer side: normalize a batch of background fixes and queue it.
///
/// Fixes without a usable position are dropped. Returns the number queued.
pub fn record_background_fixes(
    queue: &dyn BackgroundQueue,
    fixes: &[RawFix],
    clock: &dyn Clock,
) -> Result<usize> {
    let now = clock.now_ms();
    let samples: Vec<LocationSample> = fixes
        .iter()
        .filter_map(|raw| match normalize(raw, now) {
            Ok(sample) => Some(sample),
            Err(e) => {
                warn!("[Background] Dropping fix: {}", e);
                None
            }
        })
        .collect();

    if samples.is_empty() {
        return Ok(0);
    }

    queue.append(&samples)?;
    info!("[Background] Stored {} location points", samples.len());
    Ok(samples.len())
}

/// Entry point for the OS background task.
///
/// A task-level error is logged and nothing is queued. Storage failures are
/// logged too; the task has nobody to report them to.
pub fn handle_background_event(
    queue: &dyn BackgroundQueue,
    event: std::result::Result<Vec<RawFix>, String>,
    clock: &dyn Clock,
) -> usize {
    match event {
        Ok(fixes) => match record_background_fixes(queue, &fixes, clock) {
            Ok(count) => count,
            Err(e) => {
                warn!("[Background] Failed to store background locations: {}", e);
                0
            }
        },
        Err(message) => {
            warn!("[Background] Background location error: {}", message);
            0
        }
    }
}

/// Consumer side: replay the queue, then restart live capture if tracking.
///
/// `on_sample` and `on_error` become the callbacks of the new subscription.
/// A failed restart is reported through `on_error` only.
pub fn resume_foreground<P, F, E>(
    engine: &mut TrackingEngine,
    watcher: &mut LocationWatcher<P>,
    on_sample: F,
    on_error: E,
) -> CommandOutcome
where
    P: LocationProvider,
    F: FnMut(LocationSample) + Send + 'static,
    E: FnMut(String) + Send + 'static,
{
    let outcome = engine.dispatch(Command::Foreground);

    if engine.is_tracking() {
        let interval = engine.config().update_interval_ms;
        if !watcher.start_watching(on_sample, on_error, interval) {
            warn!("[Background] Live capture not resumed");
        }
    }
    outcome
}
