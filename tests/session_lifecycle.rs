//! Session lifecycle integration tests.
//!
//! Tests the full pipeline against a SQLite file: scripted fixes ->
//! watcher -> engine -> store, then a reopen from disk.
//!
//! Run with: `cargo test --test session_lifecycle --features synthetic`

use std::sync::{Arc, Mutex};

use speedtrack::engine::{Command, CommandOutcome, TrackingEngine};
use speedtrack::export::{sessions_to_csv, sessions_to_json};
use speedtrack::ingestion::scripted::ScriptedProvider;
use speedtrack::{
    BackgroundQueue, LocationSample, LocationWatcher, ManualClock, RawFix, SessionStore,
    SqliteStore, TrackerConfig, TrackingSession, UnitSystem,
};
use tempfile::TempDir;

/// Helper: engine + watcher over a fresh database in a temp dir.
fn setup(
    dir: &TempDir,
) -> (
    TrackingEngine,
    LocationWatcher<ScriptedProvider>,
    ScriptedProvider,
    Arc<ManualClock>,
    Arc<SqliteStore>,
) {
    let db_path = dir.path().join("tracking.db");
    let store = Arc::new(SqliteStore::new(&db_path).expect("failed to open store"));
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let provider = ScriptedProvider::new().grant(true, true);
    let watcher = LocationWatcher::new(provider.clone(), clock.clone(), TrackerConfig::default());
    let engine = TrackingEngine::new(store.clone(), clock.clone(), TrackerConfig::default())
        .with_queue(store.clone());
    (engine, watcher, provider, clock, store)
}

/// Helper: run the watcher into a shared buffer, then fold what arrived.
fn drive(
    engine: &mut TrackingEngine,
    provider: &ScriptedProvider,
    buffer: &Arc<Mutex<Vec<LocationSample>>>,
    clock: &ManualClock,
    fixes: &[RawFix],
) {
    for fix in fixes {
        clock.advance(1_000);
        provider.emit(*fix);
        let pending: Vec<_> = buffer.lock().unwrap().drain(..).collect();
        for sample in pending {
            engine.dispatch(Command::SampleArrived(sample));
        }
    }
}

fn eastward(n: usize, speed: f64) -> Vec<RawFix> {
    (0..n)
        .map(|i| RawFix {
            speed: Some(speed),
            accuracy: Some(5.0),
            ..RawFix::at(0.0, i as f64 * 0.001)
        })
        .collect()
}

// ============================================================================
// Test: Full Session Round Trip
// ============================================================================

#[test]
fn test_session_persists_across_reopen() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let (mut engine, mut watcher, provider, clock, _store) = setup(&dir);

    let buffer = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&buffer);
    assert!(watcher.start_watching(move |s| sink.lock().unwrap().push(s), |_| {}, 1000));

    assert!(matches!(
        engine.dispatch(Command::Start),
        CommandOutcome::Started { .. }
    ));
    drive(&mut engine, &provider, &buffer, &clock, &eastward(11, 10.0));

    watcher.stop_watching();
    let CommandOutcome::Stopped {
        session_id,
        persisted: true,
    } = engine.dispatch(Command::Stop)
    else {
        panic!("expected a persisted stop");
    };
    engine.dispatch(Command::SetUnitSystem(UnitSystem::Imperial));
    drop(engine);

    // Reopen the same file
    let (mut reopened, _watcher, _provider, _clock, store) = setup(&dir);
    reopened.dispatch(Command::LoadSessions);

    let state = reopened.state();
    assert_eq!(state.unit_system, UnitSystem::Imperial);
    assert_eq!(state.sessions.len(), 1);

    let session = &state.sessions[0];
    assert_eq!(session.id, session_id);
    assert_eq!(session.points.len(), 11);
    assert!((session.statistics.total_distance - 10.0 * 111.1949).abs() < 0.05);
    assert_eq!(session.statistics.avg_speed, 10.0);
    assert_eq!(session.statistics.duration, 11.0);
    assert_eq!(session.end_time, Some(session.start_time + 11_000));

    let summaries = store.load_summaries().unwrap();
    assert_eq!(summaries[0], session.summary());
}

// ============================================================================
// Test: Background Queue Shared Through SQLite
// ============================================================================

#[test]
fn test_background_fixes_replayed_from_disk() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let (mut engine, _watcher, _provider, clock, store) = setup(&dir);

    engine.dispatch(Command::Start);
    speedtrack::background::record_background_fixes(&*store, &eastward(5, 3.0), &*clock)
        .unwrap();

    // A second handle on the same file sees the queued rows
    let other = SqliteStore::new(dir.path().join("tracking.db")).unwrap();
    assert_eq!(other.len().unwrap(), 5);

    assert_eq!(
        engine.dispatch(Command::Foreground),
        CommandOutcome::Reconciled { replayed: 5 }
    );
    assert!(other.is_empty().unwrap());

    let points = &engine.state().current_session.as_ref().unwrap().points;
    let longitudes: Vec<f64> = points.iter().map(|p| p.longitude).collect();
    assert_eq!(longitudes, vec![0.0, 0.001, 0.002, 0.003, 0.004]);
}

// ============================================================================
// Test: Undecodable Queue Row Does Not Block Replay
// ============================================================================

#[test]
fn test_corrupt_background_row_does_not_block_replay() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let (mut engine, _watcher, _provider, clock, store) = setup(&dir);
    engine.dispatch(Command::Start);

    // A row written by some other producer that is not a sample
    let raw = rusqlite::Connection::open(dir.path().join("tracking.db")).unwrap();
    raw.execute(
        "INSERT INTO background_queue (queue_key, sample) VALUES (?, ?)",
        rusqlite::params![speedtrack::config::BACKGROUND_QUEUE_KEY, "{\"latitude\": "],
    )
    .unwrap();
    speedtrack::background::record_background_fixes(&*store, &eastward(2, 1.0), &*clock)
        .unwrap();

    assert_eq!(
        engine.dispatch(Command::Foreground),
        CommandOutcome::Reconciled { replayed: 2 }
    );
    assert!(engine.state().error.is_none());
    assert_eq!(store.dead_letter_count().unwrap(), 1);

    // The next background batch replays as well
    speedtrack::background::record_background_fixes(&*store, &eastward(1, 1.0), &*clock)
        .unwrap();
    assert_eq!(
        engine.dispatch(Command::Foreground),
        CommandOutcome::Reconciled { replayed: 1 }
    );
    assert_eq!(engine.state().current_session.as_ref().unwrap().points.len(), 3);
    assert!(store.is_empty().unwrap());
}

// ============================================================================
// Test: History Management and Export
// ============================================================================

#[test]
fn test_history_delete_and_export() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let (mut engine, _watcher, _provider, clock, store) = setup(&dir);

    for _ in 0..3 {
        engine.dispatch(Command::Start);
        for fix in eastward(3, 2.0) {
            clock.advance(500);
            let sample = speedtrack::ingestion::normalize(&fix, 0).unwrap();
            engine.dispatch(Command::SampleArrived(sample));
        }
        engine.dispatch(Command::Stop);
        clock.advance(60_000);
    }

    let ids: Vec<String> = engine.state().sessions.iter().map(|s| s.id.clone()).collect();
    assert_eq!(engine.dispatch(Command::DeleteSession(ids[1].clone())), CommandOutcome::Applied);

    let stored: Vec<TrackingSession> = store.load_all().unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|s| s.id != ids[1]));

    let csv = sessions_to_csv(&stored).unwrap();
    assert_eq!(csv.lines().count(), 3);
    assert!(csv.lines().nth(1).unwrap().starts_with(&ids[0]));

    let json = sessions_to_json(&stored).unwrap();
    let parsed: Vec<TrackingSession> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, stored);

    engine.dispatch(Command::ClearAllSessions);
    assert!(store.load_all().unwrap().is_empty());
}

// ============================================================================
// Test: Permissions and Background Delivery
// ============================================================================

#[test]
fn test_background_delivery_registration() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let (_engine, mut watcher, provider, _clock, _store) = setup(&dir);

    assert_eq!(
        watcher.request_permissions(),
        speedtrack::PermissionLevel::Background
    );
    assert!(watcher.start_background_tracking());
    assert!(provider.background_registered());

    watcher.stop_background_tracking();
    assert!(!provider.background_registered());
}
