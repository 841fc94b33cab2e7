//! Session history export.
//!
//! JSON is the session list verbatim (camelCase, 2-space indent). CSV is one
//! summary row per session.

use chrono::{DateTime, SecondsFormat};
use csv::{Terminator, WriterBuilder};

use crate::{Result, SessionStore, TrackingError, TrackingSession};

pub const CSV_HEADER: [&str; 8] = [
    "Session ID",
    "Start Time",
    "End Time",
    "Duration (s)",
    "Total Distance (m)",
    "Avg Speed (m/s)",
    "Max Speed (m/s)",
    "Min Speed (m/s)",
];

/// Pretty-printed JSON array of full sessions, points included.
pub fn sessions_to_json(sessions: &[TrackingSession]) -> Result<String> {
    Ok(serde_json::to_string_pretty(sessions)?)
}

/// CSV with a header row and one row per session.
pub fn sessions_to_csv(sessions: &[TrackingSession]) -> Result<String> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADER).map_err(csv_error)?;
    for session in sessions {
        let stats = &session.statistics;
        let end_time = session
            .end_time
            .map(iso_timestamp)
            .unwrap_or_else(|| "N/A".to_string());

        writer
            .write_record([
                session.id.clone(),
                iso_timestamp(session.start_time),
                end_time,
                format!("{:.2}", stats.duration),
                format!("{:.2}", stats.total_distance),
                format!("{:.2}", stats.avg_speed),
                format!("{:.2}", stats.max_speed),
                format!("{:.2}", stats.min_speed),
            ])
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| TrackingError::Serialization {
            message: e.to_string(),
        })?;
    String::from_utf8(bytes).map_err(|e| TrackingError::Serialization {
        message: e.to_string(),
    })
}

/// Export everything in `store` as JSON.
pub fn export_store_json(store: &dyn SessionStore) -> Result<String> {
    sessions_to_json(&store.load_all()?)
}

/// Export everything in `store` as CSV.
pub fn export_store_csv(store: &dyn SessionStore) -> Result<String> {
    sessions_to_csv(&store.load_all()?)
}

/// Epoch ms as ISO-8601 UTC with millisecond precision, e.g.
/// `2023-11-14T22:13:20.000Z`.
pub fn iso_timestamp(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "N/A".to_string())
}

fn csv_error(e: csv::Error) -> TrackingError {
    TrackingError::Serialization {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocationSample, MemoryStore, SessionStatistics};

    fn session(id: &str, end_time: Option<i64>) -> TrackingSession {
        let mut s = TrackingSession::new(id.to_string(), 1_700_000_000_000);
        s.end_time = end_time;
        s.points.push(LocationSample::new(51.5, -0.12, 1_700_000_000_500).with_speed(2.5));
        s.statistics = SessionStatistics {
            total_distance: 1234.5678,
            avg_speed: 2.5,
            max_speed: 3.14159,
            min_speed: 1.0,
            duration: 61.0,
        };
        s
    }

    #[test]
    fn test_iso_timestamp() {
        assert_eq!(iso_timestamp(0), "1970-01-01T00:00:00.000Z");
        assert_eq!(iso_timestamp(1_700_000_000_123), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn test_csv_rows() {
        let csv = sessions_to_csv(&[session("a", Some(1_700_000_061_000)), session("b", None)])
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(
            lines[0],
            "Session ID,Start Time,End Time,Duration (s),Total Distance (m),Avg Speed (m/s),Max Speed (m/s),Min Speed (m/s)"
        );
        assert_eq!(
            lines[1],
            "a,2023-11-14T22:13:20.000Z,2023-11-14T22:14:21.000Z,61.00,1234.57,2.50,3.14,1.00"
        );
        assert!(lines[2].starts_with("b,2023-11-14T22:13:20.000Z,N/A,"));
        assert_eq!(lines.len(), 3);
        assert!(csv.ends_with('\n'));
    }

    #[test]
    fn test_csv_empty_is_header_only() {
        let csv = sessions_to_csv(&[]).unwrap();
        assert_eq!(csv.lines().count(), 1);
    }

    #[test]
    fn test_json_is_verbatim_list() {
        let sessions = vec![session("a", Some(1_700_000_061_000)), session("b", None)];
        let json = sessions_to_json(&sessions).unwrap();

        assert!(json.contains("\n  {"));
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["id"], "a");
        assert_eq!(parsed[0]["statistics"]["maxSpeed"], 3.14159);
        assert!(parsed[1].get("endTime").is_none());
        assert_eq!(parsed[1]["points"][0]["speed"], 2.5);

        let back: Vec<TrackingSession> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sessions);
    }

    #[test]
    fn test_export_from_store() {
        let store = MemoryStore::new();
        store.save(&session("a", Some(1))).unwrap();
        assert!(export_store_json(&store).unwrap().contains("\"a\""));
        assert_eq!(export_store_csv(&store).unwrap().lines().count(), 2);
    }
}
