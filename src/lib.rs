// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod notify;
pub mod rules;
pub mod runner;
pub mod sources;
pub mod state;

// ---- Re-exports for stable public API ----
pub use crate::config::{load_config, AppConfig};
pub use crate::error::{FetchError, NotifyError, StoreError};
pub use crate::event::{Alert, NotifyFailure, RuleMatch, TrackerEvent};
pub use crate::notify::Notifier;
pub use crate::rules::RuleMatcher;
pub use crate::runner::{build_runner, CycleReport, Runner};
pub use crate::sources::{PollBatch, Source};
pub use crate::state::{SqliteStateStore, StateStore};
