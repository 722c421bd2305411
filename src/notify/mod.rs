// src/notify/mod.rs
pub mod email;
pub mod welink;

use async_trait::async_trait;

use crate::error::NotifyError;
use crate::event::Alert;

pub use email::EmailNotifier;
pub use welink::WeLinkNotifier;

/// Delivery channel. `send` failures are caught by the dispatcher and
/// recorded against the alert; they never abort the cycle.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn channel(&self) -> &'static str;
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError>;
}

/// Shared plain-text rendering, usable both as IM webhook text and as an
/// email body. Stored on the alert as `content`.
pub fn format_alert_text(alert: &Alert) -> String {
    let event = &alert.event;
    let rules = alert
        .matched_rules
        .iter()
        .map(|m| m.rule_id.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    let rules = if rules.is_empty() { "-".to_string() } else { rules };
    let occurred = event
        .occurred_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".into());

    let mut lines = vec![
        "Release tracker alert".to_string(),
        format!("source: {}", event.source),
        format!("resource: {} {}", event.resource_type, event.resource_id),
        format!("type: {}", event.event_type),
        format!("title: {}", event.title),
        format!("url: {}", event.url),
        format!("occurred_at: {occurred}"),
        format!("observed_at: {}", event.observed_at.to_rfc3339()),
        format!("matched_rules: {rules}"),
    ];
    if !event.summary.is_empty() {
        lines.push(String::new());
        lines.push(event.summary.clone());
    }
    lines.join("\n")
}
