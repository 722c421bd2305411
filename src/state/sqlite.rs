// src/state/sqlite.rs
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::error::StoreError;
use crate::event::{Alert, NotifyFailure};

use super::StateStore;

/// Default state store: a single SQLite file in WAL mode.
///
/// Four tables:
/// - `cursors`       source_key -> cursor (upsert)
/// - `seen_events`   fingerprint -> first_seen_at (insert-or-ignore)
/// - `alerts`        fingerprint -> alert JSON
/// - `notify_failures` append-only delivery failure log
///
/// One connection behind a mutex: every write is serialized, which covers
/// the per-source-key write serialization the runner relies on.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_conn(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_conn(Connection::open_in_memory()?)
    }

    fn from_conn(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS cursors (
                 source_key TEXT PRIMARY KEY,
                 cursor     TEXT,
                 updated_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS seen_events (
                 fingerprint   TEXT PRIMARY KEY,
                 first_seen_at TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS alerts (
                 fingerprint TEXT PRIMARY KEY,
                 alert_json  TEXT NOT NULL,
                 created_at  TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS notify_failures (
                 id          INTEGER PRIMARY KEY AUTOINCREMENT,
                 fingerprint TEXT NOT NULL,
                 channel     TEXT NOT NULL,
                 error       TEXT NOT NULL,
                 created_at  TEXT NOT NULL
             );",
        )?;
        Ok(())
    }

    // --- inspection helpers (used by tests and the CLI summary) ---

    pub fn load_alert(&self, fingerprint: &str) -> Result<Option<Alert>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT alert_json FROM alerts WHERE fingerprint = ?1")?;
        let mut rows = stmt.query(params![fingerprint])?;
        match rows.next()? {
            Some(row) => {
                let json: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    pub fn alert_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn seen_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM seen_events", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn notify_failures_for(&self, fingerprint: &str) -> Result<Vec<NotifyFailure>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT fingerprint, channel, error, created_at
             FROM notify_failures WHERE fingerprint = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![fingerprint], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (fingerprint, channel, error, created_at) = row?;
            out.push(NotifyFailure {
                fingerprint,
                channel,
                error,
                occurred_at: created_at
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(out)
    }
}

impl StateStore for SqliteStateStore {
    fn get_cursor(&self, source_key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT cursor FROM cursors WHERE source_key = ?1")?;
        let mut rows = stmt.query(params![source_key])?;
        match rows.next()? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(None),
        }
    }

    fn set_cursor(&self, source_key: &str, cursor: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO cursors(source_key, cursor, updated_at)
             VALUES(?1, ?2, ?3)
             ON CONFLICT(source_key) DO UPDATE SET
                 cursor = excluded.cursor,
                 updated_at = excluded.updated_at",
            params![source_key, cursor, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn has_seen(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT 1 FROM seen_events WHERE fingerprint = ?1 LIMIT 1")?;
        let mut rows = stmt.query(params![fingerprint])?;
        Ok(rows.next()?.is_some())
    }

    fn mark_seen(&self, fingerprint: &str, first_seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        // Insert-or-ignore: safe to call twice for the same fingerprint.
        self.conn()?.execute(
            "INSERT OR IGNORE INTO seen_events(fingerprint, first_seen_at) VALUES(?1, ?2)",
            params![fingerprint, first_seen_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn save_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        let json = serde_json::to_string(alert)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO alerts(fingerprint, alert_json, created_at)
             VALUES(?1, ?2, ?3)",
            params![alert.fingerprint, json, alert.created_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn record_notify_failure(&self, failure: &NotifyFailure) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO notify_failures(fingerprint, channel, error, created_at)
             VALUES(?1, ?2, ?3, ?4)",
            params![
                failure.fingerprint,
                failure.channel,
                failure.error,
                failure.occurred_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{RuleMatch, TrackerEvent};

    fn sample_alert(fp: &str) -> Alert {
        Alert {
            fingerprint: fp.into(),
            event: TrackerEvent {
                source: "github".into(),
                resource_type: "repo_issue".into(),
                resource_id: "o/r".into(),
                event_type: "issue_updated".into(),
                event_id: Some("1".into()),
                title: "t".into(),
                summary: "s".into(),
                url: "https://x".into(),
                occurred_at: None,
                observed_at: Utc::now(),
                raw: None,
            },
            matched_rules: vec![RuleMatch {
                rule_id: "keyword:t".into(),
                reason: "matched keyword 't'".into(),
            }],
            channels: vec!["welink".into()],
            content: "body".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn cursor_roundtrip_and_overwrite() {
        let store = SqliteStateStore::in_memory().unwrap();
        assert_eq!(store.get_cursor("github:o/r:issues").unwrap(), None);
        store.set_cursor("github:o/r:issues", "c1").unwrap();
        assert_eq!(
            store.get_cursor("github:o/r:issues").unwrap().as_deref(),
            Some("c1")
        );
        store.set_cursor("github:o/r:issues", "c2").unwrap();
        assert_eq!(
            store.get_cursor("github:o/r:issues").unwrap().as_deref(),
            Some("c2")
        );
    }

    #[test]
    fn mark_seen_is_idempotent() {
        let store = SqliteStateStore::in_memory().unwrap();
        let now = Utc::now();
        assert!(!store.has_seen("fp1").unwrap());
        store.mark_seen("fp1", now).unwrap();
        store.mark_seen("fp1", now).unwrap();
        assert!(store.has_seen("fp1").unwrap());
        assert_eq!(store.seen_count().unwrap(), 1);
    }

    #[test]
    fn alert_roundtrips_through_json_column() {
        let store = SqliteStateStore::in_memory().unwrap();
        let alert = sample_alert("fp-a");
        store.save_alert(&alert).unwrap();
        let loaded = store.load_alert("fp-a").unwrap().unwrap();
        assert_eq!(loaded.fingerprint, "fp-a");
        assert_eq!(loaded.event.title, "t");
        assert_eq!(loaded.matched_rules, alert.matched_rules);
        assert!(store.load_alert("missing").unwrap().is_none());
    }

    #[test]
    fn notify_failures_accumulate() {
        let store = SqliteStateStore::in_memory().unwrap();
        for i in 0..2 {
            store
                .record_notify_failure(&NotifyFailure {
                    fingerprint: "fp-a".into(),
                    channel: "welink".into(),
                    error: format!("boom {i}"),
                    occurred_at: Utc::now(),
                })
                .unwrap();
        }
        let failures = store.notify_failures_for("fp-a").unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].channel, "welink");
    }

    #[test]
    fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.sqlite3");
        {
            let store = SqliteStateStore::open(&path).unwrap();
            store.mark_seen("fp-disk", Utc::now()).unwrap();
            store.set_cursor("src", "cur").unwrap();
        }
        let store = SqliteStateStore::open(&path).unwrap();
        assert!(store.has_seen("fp-disk").unwrap());
        assert_eq!(store.get_cursor("src").unwrap().as_deref(), Some("cur"));
    }
}
