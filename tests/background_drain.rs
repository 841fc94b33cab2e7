//! Background drain ordering through the async tracking service.
//!
//! Samples queued while backgrounded must be folded before any live sample
//! captured after returning to the foreground, never interleaved.
//!
//! Run with: `cargo test --test background_drain --features synthetic`

use std::sync::Arc;

use speedtrack::background::record_background_fixes;
use speedtrack::engine::{CommandOutcome, TrackingEngine};
use speedtrack::ingestion::scripted::ScriptedProvider;
use speedtrack::{
    BackgroundQueue, LocationWatcher, ManualClock, MemoryStore, RawFix, TrackerConfig,
    TrackingHandle, TrackingService,
};

struct Harness {
    handle: TrackingHandle,
    provider: ScriptedProvider,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn spawn() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(0));
    let provider = ScriptedProvider::new().grant(true, true);
    let watcher = LocationWatcher::new(provider.clone(), clock.clone(), TrackerConfig::default());
    let engine = TrackingEngine::new(store.clone(), clock.clone(), TrackerConfig::default())
        .with_queue(store.clone());
    let (handle, _task) = TrackingService::spawn(engine, watcher);

    Harness {
        handle,
        provider,
        store,
        clock,
    }
}

/// Fix tagged by longitude so arrival order can be read back.
fn tagged(tag: usize) -> RawFix {
    RawFix::at(0.0, tag as f64 * 0.0001)
}

fn tags(points: &[speedtrack::LocationSample]) -> Vec<usize> {
    points
        .iter()
        .map(|p| (p.longitude / 0.0001).round() as usize)
        .collect()
}

#[tokio::test]
async fn test_queued_samples_precede_live_samples() {
    let h = spawn();
    h.handle.start().await.unwrap();

    // Live capture before backgrounding
    h.provider.emit(tagged(1));
    h.provider.emit(tagged(2));

    h.handle.background().unwrap();
    // Snapshot forces the background message through
    h.handle.snapshot().await.unwrap();
    assert!(!h.provider.is_subscribed());
    assert!(h.provider.background_registered());

    // Delivered to the background task while the app sleeps
    let queued: Vec<RawFix> = (3..=7).map(tagged).collect();
    record_background_fixes(&*h.store, &queued, &*h.clock).unwrap();
    // Not subscribed, so nothing reaches the engine
    assert!(!h.provider.emit(tagged(99)));

    assert_eq!(
        h.handle.foreground().await.unwrap(),
        CommandOutcome::Reconciled { replayed: 5 }
    );
    assert!(h.provider.is_subscribed());

    for tag in 8..=10 {
        h.provider.emit(tagged(tag));
    }

    let state = h.handle.snapshot().await.unwrap();
    let points = state.current_session.unwrap().points;
    assert_eq!(tags(&points), (1..=10).collect::<Vec<_>>());
    assert!(h.store.is_empty().unwrap());
}

#[tokio::test]
async fn test_live_samples_already_queued_are_applied_first() {
    let h = spawn();
    h.handle.start().await.unwrap();

    record_background_fixes(&*h.store, &[tagged(5), tagged(6)], &*h.clock).unwrap();

    // These reach the channel before the foreground message
    h.provider.emit(tagged(1));
    h.provider.emit(tagged(2));
    let outcome = h.handle.foreground().await.unwrap();
    h.provider.emit(tagged(7));

    assert_eq!(outcome, CommandOutcome::Reconciled { replayed: 2 });
    let state = h.handle.snapshot().await.unwrap();
    assert_eq!(tags(&state.current_session.unwrap().points), vec![1, 2, 5, 6, 7]);
}

#[tokio::test]
async fn test_drain_failure_keeps_queue_and_still_resumes() {
    let h = spawn();
    h.handle.start().await.unwrap();
    record_background_fixes(&*h.store, &[tagged(1), tagged(2)], &*h.clock).unwrap();

    h.store.fail_reads(true);
    assert!(matches!(
        h.handle.foreground().await.unwrap(),
        CommandOutcome::Failed(_)
    ));
    h.store.fail_reads(false);
    assert_eq!(h.store.len().unwrap(), 2);
    assert!(h.provider.is_subscribed());

    let state = h.handle.snapshot().await.unwrap();
    assert!(state.error.unwrap().contains("background locations"));

    assert_eq!(
        h.handle.foreground().await.unwrap(),
        CommandOutcome::Reconciled { replayed: 2 }
    );
}

#[tokio::test]
async fn test_foreground_while_idle_only_updates_location() {
    let h = spawn();
    record_background_fixes(&*h.store, &[tagged(4)], &*h.clock).unwrap();

    h.handle.foreground().await.unwrap();
    let state = h.handle.snapshot().await.unwrap();

    assert!(state.current_session.is_none());
    assert_eq!(tags(&[state.current_location.unwrap()]), vec![4]);
    assert!(!h.provider.is_subscribed());
}
