// src/event.rs
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Canonical change event. Every platform adapter normalizes its payloads
/// into this shape before the pipeline sees them; downstream code never
/// touches platform-private fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerEvent {
    pub source: String,
    pub resource_type: String,
    pub resource_id: String,
    pub event_type: String,
    /// Platform-native id; absent for platforms without stable ids.
    #[serde(default)]
    pub event_id: Option<String>,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub occurred_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
    /// Opaque upstream payload, kept for diagnostics only. Never feeds
    /// dedup or matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl TrackerEvent {
    /// Stable idempotency key for this event.
    ///
    /// When the platform supplies an `event_id`, the key covers
    /// `(source, resource_type, resource_id, event_type, event_id)` only,
    /// so title/summary/url churn never re-alerts. Without an id the key
    /// falls back to `(…, url, title, occurred_at)` with whitespace
    /// normalized, since some adapters re-fetch text with trailing-newline
    /// differences.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        let mut field = |s: &str| {
            hasher.update(s.as_bytes());
            hasher.update([0x1f]);
        };

        field(&self.source);
        field(&self.resource_type);
        field(&self.resource_id);
        field(&self.event_type);

        match self.event_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => field(id),
            None => {
                field(&self.url);
                field(&normalize_ws(&self.title));
                let occurred = self
                    .occurred_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                field(&occurred);
            }
        }

        format!("{:x}", hasher.finalize())
    }
}

/// Collapse runs of whitespace and trim, so transient field noise does not
/// change the fingerprint.
pub fn normalize_ws(s: &str) -> String {
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(s.trim(), " ").into_owned()
}

/// One rule hit, with a human-readable reason for the alert text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_id: String,
    pub reason: String,
}

/// Decision artifact: created when an event matched at least one rule.
/// Immutable after creation; delivery outcomes live in the store, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub fingerprint: String,
    pub event: TrackerEvent,
    pub matched_rules: Vec<RuleMatch>,
    pub channels: Vec<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Diagnostic record of one failed channel delivery. Not retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyFailure {
    pub fingerprint: String,
    pub channel: String,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base_event() -> TrackerEvent {
        TrackerEvent {
            source: "github".into(),
            resource_type: "repo_pr".into(),
            resource_id: "vllm-project/vllm".into(),
            event_type: "pr_opened".into(),
            event_id: Some("123".into()),
            title: "Add DeepSeek-V3 support".into(),
            summary: "adds a new model".into(),
            url: "https://github.com/vllm-project/vllm/pull/123".into(),
            occurred_at: None,
            observed_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            raw: None,
        }
    }

    #[test]
    fn fingerprint_ignores_text_and_raw_when_id_present() {
        let a = base_event();
        let mut b = base_event();
        b.title = "Add DeepSeek-V3 support\n".into();
        b.summary = "completely different".into();
        b.observed_at = Utc.with_ymd_and_hms(2025, 6, 6, 6, 6, 6).unwrap();
        b.raw = Some(serde_json::json!({"noise": true}));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_across_event_ids() {
        let a = base_event();
        let mut b = base_event();
        b.event_id = Some("124".into());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_without_id_is_stable() {
        let mut a = base_event();
        a.event_id = None;
        a.url = "https://x/y".into();
        a.title = "Model Z".into();
        a.occurred_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut b = a.clone();
        b.observed_at = Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_without_id_normalizes_title_whitespace() {
        let mut a = base_event();
        a.event_id = None;
        a.occurred_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let mut b = a.clone();
        b.title = format!("  {}\n", a.title.replace(' ', "  "));
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn empty_event_id_uses_fallback_fields() {
        let mut a = base_event();
        a.event_id = Some(String::new());
        let mut b = a.clone();
        b.url = "https://elsewhere".into();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
