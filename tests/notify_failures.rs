// tests/notify_failures.rs
// Channel failures are recorded, never retried, and never abort the cycle.
// The alert record itself is durable regardless of delivery outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use relwatch::error::{FetchError, NotifyError};
use relwatch::event::{Alert, TrackerEvent};
use relwatch::notify::Notifier;
use relwatch::rules::RuleMatcher;
use relwatch::runner::Runner;
use relwatch::sources::{PollBatch, Source};
use relwatch::state::{SqliteStateStore, StateStore};

struct StaticSource {
    events: Vec<TrackerEvent>,
}

#[async_trait]
impl Source for StaticSource {
    fn key(&self) -> String {
        "huggingface:deepseek-ai:models".to_string()
    }

    async fn poll(&self, _cursor: Option<String>) -> Result<PollBatch, FetchError> {
        Ok(PollBatch {
            events: self.events.clone(),
            new_cursor: Some(r#"{"last_modified_after":"2024-03-03T00:00:00Z"}"#.into()),
        })
    }
}

struct BrokenWebhook;

#[async_trait]
impl Notifier for BrokenWebhook {
    fn channel(&self) -> &'static str {
        "welink"
    }

    async fn send(&self, _alert: &Alert) -> Result<(), NotifyError> {
        Err(NotifyError::new("welink webhook code 58500: server error"))
    }
}

struct WorkingChannel {
    sent: Arc<AtomicUsize>,
}

#[async_trait]
impl Notifier for WorkingChannel {
    fn channel(&self) -> &'static str {
        "email"
    }

    async fn send(&self, _alert: &Alert) -> Result<(), NotifyError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn model_event(id: &str) -> TrackerEvent {
    TrackerEvent {
        source: "huggingface".into(),
        resource_type: "org_model".into(),
        resource_id: "deepseek-ai".into(),
        event_type: "model_updated".into(),
        event_id: Some(id.into()),
        title: format!("deepseek-ai/DeepSeek-{id}"),
        summary: "text-generation".into(),
        url: format!("https://huggingface.co/deepseek-ai/DeepSeek-{id}"),
        occurred_at: None,
        observed_at: Utc::now(),
        raw: None,
    }
}

#[tokio::test]
async fn failed_channel_is_recorded_and_others_still_deliver() {
    let store = Arc::new(SqliteStateStore::in_memory().unwrap());
    let sent = Arc::new(AtomicUsize::new(0));
    let source = Arc::new(StaticSource {
        events: vec![model_event("V3"), model_event("R2")],
    });
    let runner = Runner::new(
        store.clone(),
        vec![source],
        RuleMatcher::new(vec!["deepseek".into()]),
        vec![
            Arc::new(BrokenWebhook),
            Arc::new(WorkingChannel { sent: sent.clone() }),
        ],
    );

    let report = runner.run_once().await;

    // Both events matched; the broken channel did not stop processing.
    assert_eq!(report.alerts_created(), 2);
    assert_eq!(report.notify_failures(), 2);
    assert_eq!(report.source_errors(), 0);
    assert_eq!(sent.load(Ordering::SeqCst), 2);

    // Alerts persisted despite the failure, one failure row per alert.
    assert_eq!(store.alert_count().unwrap(), 2);
    let fp = model_event("V3").fingerprint();
    let alert = store.load_alert(&fp).unwrap().expect("alert persisted");
    assert_eq!(alert.channels, vec!["welink", "email"]);
    let failures = store.notify_failures_for(&fp).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].channel, "welink");
    assert!(failures[0].error.contains("58500"));

    // Cursor advanced: delivery failure is not a source failure.
    assert!(store
        .get_cursor("huggingface:deepseek-ai:models")
        .unwrap()
        .is_some());

    // Failed deliveries are not retried by the next cycle.
    let second = runner.run_once().await;
    assert_eq!(second.alerts_created(), 0);
    assert_eq!(store.notify_failures_for(&fp).unwrap().len(), 1);
}
