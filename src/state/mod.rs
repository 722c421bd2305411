// src/state/mod.rs
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::event::{Alert, NotifyFailure};

pub use sqlite::SqliteStateStore;

/// Durability boundary of the pipeline. Owns cursors, the seen-fingerprint
/// set, alert records, and notify-failure records.
///
/// The handle is passed to the runner explicitly (opened once at startup),
/// so tests can run isolated instances side by side. Implementations must
/// serialize writes; `mark_seen` must be an idempotent insert, because a
/// crash between mark-seen and cursor-advance is expected and recovery
/// re-runs the step.
pub trait StateStore: Send + Sync {
    fn get_cursor(&self, source_key: &str) -> Result<Option<String>, StoreError>;
    fn set_cursor(&self, source_key: &str, cursor: &str) -> Result<(), StoreError>;
    fn has_seen(&self, fingerprint: &str) -> Result<bool, StoreError>;
    fn mark_seen(&self, fingerprint: &str, first_seen_at: DateTime<Utc>) -> Result<(), StoreError>;
    fn save_alert(&self, alert: &Alert) -> Result<(), StoreError>;
    fn record_notify_failure(&self, failure: &NotifyFailure) -> Result<(), StoreError>;
}
