//! # SQLite Store
//!
//! [`SessionStore`] and [`BackgroundQueue`] backed by a single SQLite file.
//!
//! ## Tables
//!
//! 1. **sessions**: metadata columns (times, statistics, bounds) plus the
//!    point list as a MessagePack blob. History list views read the
//!    metadata only; points are decoded on full loads.
//! 2. **preferences**: key/value strings (unit preference).
//! 3. **background_queue**: one JSON sample per row under the
//!    [`BACKGROUND_QUEUE_KEY`] queue, ordered by an autoincrement sequence.
//!    Drained inside a transaction.
//! 4. **background_dead_letter**: queued rows that could not be decoded,
//!    moved aside by the drain so they cannot block later samples.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::BACKGROUND_QUEUE_KEY;
use crate::{
    BackgroundQueue, Bounds, LocationSample, Result, SessionStatistics, SessionStore,
    SessionSummary, TrackingError, TrackingSession,
};

/// SQLite-backed session store and background queue.
///
/// The connection sits behind a mutex so one store can be shared by the
/// engine and the background task.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) a store at the given path.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db = Connection::open(db_path.as_ref())?;
        Self::init_schema(&db)?;
        info!(
            "[SqliteStore] Opened database at {}",
            db_path.as_ref().display()
        );
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Finalized sessions (metadata + point blob)
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                total_distance REAL NOT NULL,
                avg_speed REAL NOT NULL,
                max_speed REAL NOT NULL,
                min_speed REAL NOT NULL,
                duration REAL NOT NULL,
                point_count INTEGER NOT NULL,
                min_lat REAL,
                max_lat REAL,
                min_lng REAL,
                max_lng REAL,
                points BLOB NOT NULL
            );

            -- User preferences
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Samples captured while backgrounded
            CREATE TABLE IF NOT EXISTS background_queue (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                queue_key TEXT NOT NULL,
                sample TEXT NOT NULL
            );

            -- Queue rows the drain could not decode
            CREATE TABLE IF NOT EXISTS background_dead_letter (
                seq INTEGER PRIMARY KEY,
                queue_key TEXT NOT NULL,
                sample TEXT NOT NULL,
                error TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(start_time);
            CREATE INDEX IF NOT EXISTS idx_queue_key ON background_queue(queue_key, seq);
        "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| TrackingError::persistence("database lock poisoned"))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Session list records read from metadata columns only.
    pub fn load_summaries(&self) -> Result<Vec<SessionSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, start_time, end_time, total_distance, avg_speed, max_speed, min_speed,
                    duration, point_count, min_lat, max_lat, min_lng, max_lng
             FROM sessions ORDER BY rowid",
        )?;

        let summaries = stmt
            .query_map([], |row| {
                let bounds = match (
                    row.get::<_, Option<f64>>(9)?,
                    row.get::<_, Option<f64>>(10)?,
                    row.get::<_, Option<f64>>(11)?,
                    row.get::<_, Option<f64>>(12)?,
                ) {
                    (Some(min_lat), Some(max_lat), Some(min_lng), Some(max_lng)) => Some(Bounds {
                        min_lat,
                        max_lat,
                        min_lng,
                        max_lng,
                    }),
                    _ => None,
                };
                Ok(SessionSummary {
                    id: row.get(0)?,
                    start_time: row.get(1)?,
                    end_time: row.get(2)?,
                    statistics: SessionStatistics {
                        total_distance: row.get(3)?,
                        avg_speed: row.get(4)?,
                        max_speed: row.get(5)?,
                        min_speed: row.get(6)?,
                        duration: row.get(7)?,
                    },
                    point_count: row.get::<_, i64>(8)? as u32,
                    bounds,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(summaries)
    }

    pub fn session_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Number of queue rows set aside as undecodable.
    pub fn dead_letter_count(&self) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM background_dead_letter WHERE queue_key = ?",
            params![BACKGROUND_QUEUE_KEY],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl SessionStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<TrackingSession>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, start_time, end_time, total_distance, avg_speed, max_speed, min_speed,
                    duration, points
             FROM sessions ORDER BY rowid",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let session = TrackingSession {
                    id: row.get(0)?,
                    start_time: row.get(1)?,
                    end_time: row.get(2)?,
                    points: Vec::new(),
                    statistics: SessionStatistics {
                        total_distance: row.get(3)?,
                        avg_speed: row.get(4)?,
                        max_speed: row.get(5)?,
                        min_speed: row.get(6)?,
                        duration: row.get(7)?,
                    },
                };
                let blob: Vec<u8> = row.get(8)?;
                Ok((session, blob))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(mut session, blob)| -> Result<TrackingSession> {
                session.points = rmp_serde::from_slice(&blob)?;
                Ok(session)
            })
            .collect()
    }

    fn save(&self, session: &TrackingSession) -> Result<()> {
        let points_blob = rmp_serde::to_vec(&session.points)?;
        let bounds = Bounds::from_points(&session.points);
        let stats = &session.statistics;

        let conn = self.conn()?;
        // Upsert keeps the original rowid so history order is stable
        conn.execute(
            "INSERT INTO sessions (id, start_time, end_time, total_distance, avg_speed, max_speed,
                                   min_speed, duration, point_count, min_lat, max_lat, min_lng,
                                   max_lng, points)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                total_distance = excluded.total_distance,
                avg_speed = excluded.avg_speed,
                max_speed = excluded.max_speed,
                min_speed = excluded.min_speed,
                duration = excluded.duration,
                point_count = excluded.point_count,
                min_lat = excluded.min_lat,
                max_lat = excluded.max_lat,
                min_lng = excluded.min_lng,
                max_lng = excluded.max_lng,
                points = excluded.points",
            params![
                session.id,
                session.start_time,
                session.end_time,
                stats.total_distance,
                stats.avg_speed,
                stats.max_speed,
                stats.min_speed,
                stats.duration,
                session.points.len() as i64,
                bounds.map(|b| b.min_lat),
                bounds.map(|b| b.max_lat),
                bounds.map(|b| b.min_lng),
                bounds.map(|b| b.max_lng),
                points_blob
            ],
        )?;
        debug!(
            "[SqliteStore] Saved session {} ({} points)",
            session.id,
            session.points.len()
        );
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM sessions WHERE id = ?", params![id])?;
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        self.conn()?.execute("DELETE FROM sessions", [])?;
        Ok(())
    }

    fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM preferences WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO preferences (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}

impl BackgroundQueue for SqliteStore {
    fn append(&self, samples: &[LocationSample]) -> Result<()> {
        let encoded = samples
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO background_queue (queue_key, sample) VALUES (?, ?)")?;
            for sample in &encoded {
                stmt.execute(params![BACKGROUND_QUEUE_KEY, sample])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Take every queued sample in FIFO order.
    ///
    /// Rows that fail to decode move to `background_dead_letter`; the rest
    /// are returned and the whole batch leaves the queue in one transaction.
    fn drain(&self) -> Result<Vec<LocationSample>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let rows = {
            let mut stmt = tx.prepare(
                "SELECT seq, sample FROM background_queue WHERE queue_key = ? ORDER BY seq",
            )?;
            let rows = stmt
                .query_map(params![BACKGROUND_QUEUE_KEY], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        let Some(&(last_seq, _)) = rows.last() else {
            return Ok(Vec::new());
        };

        let mut samples = Vec::with_capacity(rows.len());
        for (seq, json) in &rows {
            match serde_json::from_str::<LocationSample>(json) {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    warn!(
                        "[SqliteStore] Moving undecodable queue row {} aside: {}",
                        seq, e
                    );
                    tx.execute(
                        "INSERT OR REPLACE INTO background_dead_letter
                            (seq, queue_key, sample, error)
                         VALUES (?, ?, ?, ?)",
                        params![seq, BACKGROUND_QUEUE_KEY, json, e.to_string()],
                    )?;
                }
            }
        }

        tx.execute(
            "DELETE FROM background_queue WHERE queue_key = ? AND seq <= ?",
            params![BACKGROUND_QUEUE_KEY, last_seq],
        )?;
        tx.commit()?;

        debug!("[SqliteStore] Drained {} background samples", samples.len());
        Ok(samples)
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM background_queue WHERE queue_key = ?",
            params![BACKGROUND_QUEUE_KEY],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finalized(id: &str, start: i64) -> TrackingSession {
        let mut s = TrackingSession::new(id.to_string(), start);
        for i in 0..20 {
            s.points.push(
                LocationSample::new(51.5 + i as f64 * 0.001, -0.12, start + i * 1000)
                    .with_speed(i as f64 * 0.5)
                    .with_altitude(12.0),
            );
        }
        s.statistics = crate::statistics::compute_statistics(&s.points, start, start + 20_000);
        s.finalize(start + 20_000).unwrap();
        s
    }

    #[test]
    fn test_create_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.session_count().unwrap(), 0);
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_session_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let session = finalized("a", 1_000);
        store.save(&session).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![session]);
    }

    #[test]
    fn test_upsert_keeps_order() {
        let store = SqliteStore::in_memory().unwrap();
        store.save(&finalized("a", 1_000)).unwrap();
        store.save(&finalized("b", 2_000)).unwrap();
        store.save(&finalized("a", 1_000)).unwrap();

        let ids: Vec<String> = store.load_all().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_summaries_from_metadata() {
        let store = SqliteStore::in_memory().unwrap();
        let session = finalized("a", 1_000);
        store.save(&session).unwrap();
        store.save(&TrackingSession::new("empty".to_string(), 5)).unwrap();

        let summaries = store.load_summaries().unwrap();
        assert_eq!(summaries[0], session.summary());
        assert_eq!(summaries[1].point_count, 0);
        assert!(summaries[1].bounds.is_none());
    }

    #[test]
    fn test_delete_and_clear() {
        let store = SqliteStore::in_memory().unwrap();
        store.save(&finalized("a", 1)).unwrap();
        store.save(&finalized("b", 2)).unwrap();

        store.delete("a").unwrap();
        store.delete("missing").unwrap();
        assert_eq!(store.session_count().unwrap(), 1);

        store.clear_all().unwrap();
        assert_eq!(store.session_count().unwrap(), 0);
    }

    #[test]
    fn test_preferences() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_preference("unit_preference").unwrap().is_none());
        store.set_preference("unit_preference", "metric").unwrap();
        store.set_preference("unit_preference", "imperial").unwrap();
        assert_eq!(
            store.get_preference("unit_preference").unwrap().as_deref(),
            Some("imperial")
        );
    }

    #[test]
    fn test_queue_fifo_drain() {
        let store = SqliteStore::in_memory().unwrap();
        let first: Vec<_> = (0..3).map(|i| LocationSample::new(1.0, i as f64, i)).collect();
        let second = vec![LocationSample::new(2.0, 2.0, 99).with_heading(180.0)];
        store.append(&first).unwrap();
        store.append(&second).unwrap();
        assert_eq!(store.len().unwrap(), 4);

        let drained = store.drain().unwrap();
        assert_eq!(drained.len(), 4);
        assert_eq!(&drained[..3], &first[..]);
        assert_eq!(drained[3], second[0]);
        assert!(store.is_empty().unwrap());
        assert!(store.drain().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_queue_row_moved_aside() {
        let store = SqliteStore::in_memory().unwrap();
        let insert_raw = |json: &str| {
            store
                .conn()
                .unwrap()
                .execute(
                    "INSERT INTO background_queue (queue_key, sample) VALUES (?, ?)",
                    params![BACKGROUND_QUEUE_KEY, json],
                )
                .unwrap();
        };

        store.append(&[LocationSample::new(0.0, 0.0, 0)]).unwrap();
        insert_raw("not json");
        store.append(&[LocationSample::new(0.0, 1.0, 1)]).unwrap();

        let drained = store.drain().unwrap();
        let longitudes: Vec<f64> = drained.iter().map(|s| s.longitude).collect();
        assert_eq!(longitudes, vec![0.0, 1.0]);
        assert!(store.is_empty().unwrap());
        assert_eq!(store.dead_letter_count().unwrap(), 1);

        // Later samples are not held back by the bad row
        store.append(&[LocationSample::new(0.0, 2.0, 2)]).unwrap();
        assert_eq!(store.drain().unwrap()[0].longitude, 2.0);
        assert_eq!(store.len().unwrap(), 0);
        assert_eq!(store.dead_letter_count().unwrap(), 1);
    }

    #[test]
    fn test_only_corrupt_rows_drain_empty() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO background_queue (queue_key, sample) VALUES (?, '{}')",
                params![BACKGROUND_QUEUE_KEY],
            )
            .unwrap();

        assert!(store.drain().unwrap().is_empty());
        assert!(store.is_empty().unwrap());
        assert_eq!(store.dead_letter_count().unwrap(), 1);
    }
}
