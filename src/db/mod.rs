// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/tempnet-rs

//! Database module for the event log and temperature history

mod logger;

pub use logger::{DataLogger, TemperatureLog};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::core::{Event, EventSink};

/// Database manager
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&config.path)?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        "#,
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.create_tables()?;

        info!("Database opened at {:?}", config.path);
        Ok(db)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Dispatched events, keyed by sequence key
            CREATE TABLE IF NOT EXISTS events (
                pk INTEGER PRIMARY KEY,
                class TEXT NOT NULL,
                topic INTEGER NOT NULL,
                priority INTEGER NOT NULL,
                data TEXT NOT NULL,
                time TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_time ON events(time);

            -- Per-minute temperature summaries
            CREATE TABLE IF NOT EXISTS temperature_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session TEXT NOT NULL,
                ts TEXT NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_temperature_log_session ON temperature_log(session, ts);
        "#,
        )?;

        Ok(())
    }

    /// Store a dispatched event
    pub fn store_event(&self, event: &Event) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            "INSERT OR REPLACE INTO events (pk, class, topic, priority, data, time) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.sequence_key,
                event.class().code(),
                event.topic.code(),
                event.priority.code(),
                event.payload,
                event.timestamp.to_rfc3339()
            ],
        )?;

        Ok(())
    }

    /// Query events by time range, newest first
    pub fn query_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        topic: Option<u16>,
        limit: Option<usize>,
    ) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock();

        let sql = format!(
            "SELECT pk, class, topic, priority, data, time FROM events
             WHERE time >= ?1 AND time <= ?2 AND (?3 IS NULL OR topic = ?3)
             ORDER BY pk DESC LIMIT {}",
            limit.unwrap_or(100)
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339(), topic], |row| {
            Ok(StoredEvent {
                pk: row.get(0)?,
                class: row.get(1)?,
                topic: row.get(2)?,
                priority: row.get(3)?,
                data: row.get(4)?,
                time: row.get(5)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }

    /// Append temperature summary rows for `session`
    pub fn insert_log_rows(&self, session: &str, rows: &[(DateTime<Utc>, String)]) -> Result<usize> {
        let conn = self.conn.lock();

        let tx = conn.unchecked_transaction()?;
        for (ts, data) in rows {
            tx.execute(
                "INSERT INTO temperature_log (session, ts, data) VALUES (?1, ?2, ?3)",
                params![session, ts.to_rfc3339(), data],
            )?;
        }
        tx.commit()?;

        debug!("Wrote {} temperature rows for session {}", rows.len(), session);
        Ok(rows.len())
    }

    /// Remove the stored history of `session`
    pub fn delete_session_log(&self, session: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM temperature_log WHERE session = ?1", params![session])?;
        Ok(deleted)
    }

    /// Temperature history of `session` in time order
    pub fn query_log(
        &self,
        session: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<LogRow>> {
        let conn = self.conn.lock();

        let sql = format!(
            "SELECT ts, data FROM temperature_log
             WHERE session = ?1 AND ts >= ?2 AND ts <= ?3
             ORDER BY id ASC LIMIT {}",
            limit.unwrap_or(1440)
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![session, start.to_rfc3339(), end.to_rfc3339()], |row| {
            Ok(LogRow {
                ts: row.get(0)?,
                data: row.get(1)?,
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn.lock();

        let event_count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        let log_count: i64 = conn.query_row("SELECT COUNT(*) FROM temperature_log", [], |row| row.get(0))?;

        let size_bytes: i64 = conn
            .query_row(
                "SELECT page_count * page_size as size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(DatabaseStats {
            event_count: event_count as usize,
            log_count: log_count as usize,
            size_bytes: size_bytes as u64,
        })
    }

    /// Cleanup old data
    pub fn cleanup(&self, retention_days: u32) -> Result<usize> {
        let conn = self.conn.lock();

        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);

        let deleted_events = conn.execute("DELETE FROM events WHERE time < ?1", params![cutoff.to_rfc3339()])?;
        let deleted_rows = conn.execute("DELETE FROM temperature_log WHERE ts < ?1", params![cutoff.to_rfc3339()])?;

        info!(
            "Cleaned up {} events and {} temperature rows older than {} days",
            deleted_events, deleted_rows, retention_days
        );

        Ok(deleted_events + deleted_rows)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    pub pk: i64,
    pub class: String,
    pub topic: u16,
    pub priority: u8,
    pub data: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogRow {
    pub ts: String,
    pub data: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub event_count: usize,
    pub log_count: usize,
    pub size_bytes: u64,
}

/// Sink writing every routed event to the `events` table
pub struct EventLogSink {
    db: Arc<Database>,
}

impl EventLogSink {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventSink for EventLogSink {
    fn name(&self) -> &str {
        "database"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        self.db.store_event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Action, EventQueue, Priority, Topic};

    fn event(topic: Topic, payload: &str) -> Event {
        let (publisher, mut receiver) = EventQueue::bounded(1);
        publisher.raise(topic, Priority::High, payload, Action::Database);
        receiver.try_next().unwrap()
    }

    #[tokio::test]
    async fn test_event_log_sink() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let sink = EventLogSink::new(db.clone());

        sink.handle(&event(Topic::ControllerFault, "bus")).await.unwrap();
        sink.handle(&event(Topic::A2Alarm, "Current A2 alarms;1,Door,45.0,30,40,A2 alarm,A2 rising"))
            .await
            .unwrap();

        let start = Utc::now() - chrono::Duration::minutes(1);
        let end = Utc::now() + chrono::Duration::minutes(1);
        let all = db.query_events(start, end, None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].topic, 3);
        assert_eq!(all[0].class, "TMP");
        assert_eq!(all[0].priority, 2);

        let faults = db.query_events(start, end, Some(1), None).unwrap();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].data, "bus");
    }

    #[test]
    fn test_temperature_log_rows() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_log_rows("12", &[(now, "1.0,2.0".into()), (now, "1.5,2.5".into())]).unwrap();
        db.insert_log_rows("13", &[(now, "9.0".into())]).unwrap();

        let start = now - chrono::Duration::minutes(1);
        let end = now + chrono::Duration::minutes(1);
        let rows = db.query_log("12", start, end, None).unwrap();
        assert_eq!(rows.iter().map(|r| r.data.as_str()).collect::<Vec<_>>(), vec!["1.0,2.0", "1.5,2.5"]);

        assert_eq!(db.delete_session_log("12").unwrap(), 2);
        assert_eq!(db.get_stats().unwrap().log_count, 1);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("data").join("tempnet.db"),
            retention_days: 30,
        };
        let db = Database::open(&config).unwrap();
        db.store_event(&event(Topic::PowerOn, "")).unwrap();
        assert_eq!(db.get_stats().unwrap().event_count, 1);
        assert_eq!(db.cleanup(30).unwrap(), 0);
    }
}
