// src/sources/mod.rs
pub mod github;
pub mod huggingface;
pub mod modelscope;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::event::TrackerEvent;

pub use github::{GitHubIssuesSource, GitHubPullsSource};
pub use huggingface::HuggingFaceModelsSource;
pub use modelscope::ModelScopeModelsSource;

/// One poll's worth of events plus the adapter's updated progress token.
#[derive(Debug, Clone)]
pub struct PollBatch {
    pub events: Vec<TrackerEvent>,
    /// Opaque to the core; `None` means "keep the previous cursor".
    pub new_cursor: Option<String>,
}

/// Platform adapter: fetch everything since `cursor` and hand back canonical
/// events plus the new cursor. The cursor's contents are meaningful only to
/// the adapter that produced them; the core just persists and returns them.
#[async_trait]
pub trait Source: Send + Sync {
    fn key(&self) -> String;

    /// `cursor == None` means "from the beginning"; what that covers is the
    /// adapter's call.
    async fn poll(&self, cursor: Option<String>) -> Result<PollBatch, FetchError>;
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}
