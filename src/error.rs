// src/error.rs
use thiserror::Error;

/// Adapter fetch failure, classified so the orchestrator can branch on it.
/// Transient errors (rate limits, timeouts) are retried by the next poll
/// cycle; fatal ones (bad auth, broken config) are surfaced prominently and
/// will recur until fixed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch error: {0:#}")]
    Transient(anyhow::Error),
    #[error("fatal fetch error: {0:#}")]
    Fatal(anyhow::Error),
}

impl FetchError {
    pub fn transient(err: impl Into<anyhow::Error>) -> Self {
        Self::Transient(err.into())
    }

    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(err.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// State store failure. Always fatal to the current source's step (cursor
/// stays put), never to the whole cycle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("state store lock poisoned")]
    Poisoned,
}

/// Channel delivery failure. Recovered locally: recorded in the store,
/// never propagated as a cycle failure.
#[derive(Debug, Error)]
#[error("{detail}")]
pub struct NotifyError {
    pub detail: String,
}

impl NotifyError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl From<anyhow::Error> for NotifyError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            detail: format!("{err:#}"),
        }
    }
}
