// src/runner.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{resolve_env, AppConfig};
use crate::error::{FetchError, StoreError};
use crate::event::{Alert, NotifyFailure, TrackerEvent};
use crate::http::HttpClient;
use crate::notify::{format_alert_text, EmailNotifier, Notifier, WeLinkNotifier};
use crate::rules::RuleMatcher;
use crate::sources::{
    GitHubIssuesSource, GitHubPullsSource, HuggingFaceModelsSource, ModelScopeModelsSource, Source,
};
use crate::state::{SqliteStateStore, StateStore};

/// One-time metrics registration (so series carry descriptions).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "relwatch_events_fetched_total",
            "Events returned by source adapters."
        );
        describe_counter!(
            "relwatch_events_deduped_total",
            "Events skipped because their fingerprint was already seen."
        );
        describe_counter!("relwatch_alerts_total", "Alerts created and persisted.");
        describe_counter!(
            "relwatch_notify_failures_total",
            "Channel deliveries that failed and were recorded."
        );
        describe_counter!(
            "relwatch_source_errors_total",
            "Source steps aborted by fetch or store errors."
        );
        describe_gauge!(
            "relwatch_last_cycle_ts",
            "Unix ts when the last poll cycle finished."
        );
    });
}

/// Per-source outcome of one cycle. `error` set means the step aborted and
/// the cursor was left untouched.
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source_key: String,
    pub events_fetched: usize,
    pub events_deduped: usize,
    pub events_matched: usize,
    pub alerts_created: usize,
    pub notify_failures: usize,
    pub error: Option<String>,
}

impl SourceOutcome {
    fn empty(source_key: String) -> Self {
        Self {
            source_key,
            events_fetched: 0,
            events_deduped: 0,
            events_matched: 0,
            alerts_created: 0,
            notify_failures: 0,
            error: None,
        }
    }
}

/// Summary of one full poll cycle across all sources.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: Vec<SourceOutcome>,
}

impl CycleReport {
    pub fn events_fetched(&self) -> usize {
        self.sources.iter().map(|s| s.events_fetched).sum()
    }
    pub fn events_matched(&self) -> usize {
        self.sources.iter().map(|s| s.events_matched).sum()
    }
    pub fn alerts_created(&self) -> usize {
        self.sources.iter().map(|s| s.alerts_created).sum()
    }
    pub fn notify_failures(&self) -> usize {
        self.sources.iter().map(|s| s.notify_failures).sum()
    }
    pub fn source_errors(&self) -> usize {
        self.sources.iter().filter(|s| s.error.is_some()).count()
    }
}

/// Builds an alert from a matched event, persists it, then attempts every
/// channel independently. A channel failure is recorded and does not block
/// the other channels; only a store failure propagates.
pub struct AlertDispatcher {
    store: Arc<dyn StateStore>,
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl AlertDispatcher {
    pub fn new(store: Arc<dyn StateStore>, notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { store, notifiers }
    }

    pub fn channels(&self) -> Vec<String> {
        self.notifiers
            .iter()
            .map(|n| n.channel().to_string())
            .collect()
    }

    /// Returns the number of failed channel deliveries.
    pub async fn dispatch(
        &self,
        event: &TrackerEvent,
        matched_rules: Vec<crate::event::RuleMatch>,
        fingerprint: &str,
    ) -> Result<usize, StoreError> {
        let mut alert = Alert {
            fingerprint: fingerprint.to_string(),
            event: event.clone(),
            matched_rules,
            channels: self.channels(),
            content: String::new(),
            created_at: Utc::now(),
        };
        alert.content = format_alert_text(&alert);

        // The fact that this event alerted is durable regardless of
        // whether any delivery succeeds.
        self.store.save_alert(&alert)?;

        let mut failures = 0usize;
        for notifier in &self.notifiers {
            let channel = notifier.channel();
            if let Err(err) = notifier.send(&alert).await {
                failures += 1;
                tracing::warn!(
                    channel,
                    fingerprint = %alert.fingerprint,
                    error = %err,
                    "notify failed"
                );
                counter!("relwatch_notify_failures_total").increment(1);
                self.store.record_notify_failure(&NotifyFailure {
                    fingerprint: alert.fingerprint.clone(),
                    channel: channel.to_string(),
                    error: err.detail,
                    occurred_at: Utc::now(),
                })?;
            } else {
                tracing::debug!(channel, fingerprint = %alert.fingerprint, "notify delivered");
            }
        }
        Ok(failures)
    }
}

/// Poll orchestrator: drives one cycle across all configured sources,
/// each source under its own timeout, concurrently up to a bounded pool.
///
/// Crash-consistency contract: a source's cursor only advances after every
/// event in its batch has been dedup-recorded (and dispatched when
/// matched), so a restart re-fetches from the previous cursor and the
/// idempotent seen-set swallows the replay.
pub struct Runner {
    store: Arc<dyn StateStore>,
    sources: Vec<Arc<dyn Source>>,
    matcher: Arc<RuleMatcher>,
    dispatcher: Arc<AlertDispatcher>,
    record_unmatched_as_seen: bool,
    max_concurrent_sources: usize,
    source_timeout: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(
        store: Arc<dyn StateStore>,
        sources: Vec<Arc<dyn Source>>,
        matcher: RuleMatcher,
        notifiers: Vec<Arc<dyn Notifier>>,
    ) -> Self {
        let dispatcher = Arc::new(AlertDispatcher::new(store.clone(), notifiers));
        Self {
            store,
            sources,
            matcher: Arc::new(matcher),
            dispatcher,
            record_unmatched_as_seen: true,
            max_concurrent_sources: 4,
            source_timeout: Duration::from_secs(120),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// When false, unmatched events are not marked seen and get
    /// re-evaluated against future rule changes. Default true: fingerprints
    /// are logical-event identity, not rule-outcome identity.
    pub fn record_unmatched_as_seen(mut self, yes: bool) -> Self {
        self.record_unmatched_as_seen = yes;
        self
    }

    pub fn with_max_concurrent_sources(mut self, n: usize) -> Self {
        self.max_concurrent_sources = n.max(1);
        self
    }

    pub fn with_source_timeout(mut self, timeout: Duration) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Cloneable flag that makes in-flight cycles wind down cooperatively:
    /// sources not yet started are skipped, running ones finish their step.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn source_keys(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.key()).collect()
    }

    pub fn notifier_channels(&self) -> Vec<String> {
        self.dispatcher.channels()
    }

    /// Execute one poll cycle across all sources. Never fails as a whole:
    /// per-source errors land in the report.
    pub async fn run_once(&self) -> CycleReport {
        ensure_metrics_described();
        let started_at = Utc::now();
        let t0 = Instant::now();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_sources));
        let mut tasks = JoinSet::new();
        for source in &self.sources {
            let source = source.clone();
            let store = self.store.clone();
            let matcher = self.matcher.clone();
            let dispatcher = self.dispatcher.clone();
            let shutdown = self.shutdown.clone();
            let semaphore = semaphore.clone();
            let record_unmatched = self.record_unmatched_as_seen;
            let timeout = self.source_timeout;
            tasks.spawn(async move {
                // Semaphore is never closed, so acquire cannot fail.
                let _permit = semaphore.acquire_owned().await;
                if shutdown.load(Ordering::Relaxed) {
                    let mut outcome = SourceOutcome::empty(source.key());
                    outcome.error = Some("skipped: shutdown requested".into());
                    return outcome;
                }
                poll_source(
                    source, store, matcher, dispatcher, record_unmatched, timeout,
                )
                .await
            });
        }

        let mut sources = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => sources.push(outcome),
                Err(err) => tracing::error!(error = %err, "source task panicked"),
            }
        }
        // Task completion order is nondeterministic; keep the report stable.
        sources.sort_by(|a, b| a.source_key.cmp(&b.source_key));

        gauge!("relwatch_last_cycle_ts").set(Utc::now().timestamp() as f64);

        CycleReport {
            started_at,
            duration_ms: t0.elapsed().as_millis() as u64,
            sources,
        }
    }

    /// Daemon mode: cycle, sleep interruptibly, repeat until Ctrl-C.
    pub async fn run_daemon(&self, interval: Duration) -> Result<()> {
        let shutdown = self.shutdown_flag();
        let notify = Arc::new(tokio::sync::Notify::new());
        {
            let shutdown = shutdown.clone();
            let notify = notify.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown signal received");
                    shutdown.store(true, Ordering::Relaxed);
                    notify.notify_waiters();
                }
            });
        }

        let mut cycle_id = 0u64;
        loop {
            cycle_id += 1;
            let report = self.run_once().await;
            log_cycle_summary(cycle_id, &report);

            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = notify.notified() => break,
            }
        }
        tracing::info!(cycles = cycle_id, "daemon stopped");
        Ok(())
    }
}

pub fn log_cycle_summary(cycle_id: u64, report: &CycleReport) {
    tracing::info!(
        cycle = cycle_id,
        duration_ms = report.duration_ms,
        sources = report.sources.len(),
        events_fetched = report.events_fetched(),
        matched = report.events_matched(),
        alerts = report.alerts_created(),
        notify_failures = report.notify_failures(),
        source_errors = report.source_errors(),
        "cycle summary"
    );
    for outcome in &report.sources {
        if let Some(error) = &outcome.error {
            tracing::warn!(source = %outcome.source_key, error = %error, "source step failed");
        }
    }
}

/// One source's step: cursor read, poll, per-event dedupe/match/dispatch,
/// then the cursor advance.
async fn poll_source(
    source: Arc<dyn Source>,
    store: Arc<dyn StateStore>,
    matcher: Arc<RuleMatcher>,
    dispatcher: Arc<AlertDispatcher>,
    record_unmatched_as_seen: bool,
    timeout: Duration,
) -> SourceOutcome {
    let key = source.key();
    let mut outcome = SourceOutcome::empty(key.clone());

    let step = async {
        let cursor = store
            .get_cursor(&key)
            .map_err(|e| anyhow!(e).context("read cursor"))?;

        let batch = match tokio::time::timeout(timeout, source.poll(cursor)).await {
            Ok(Ok(batch)) => batch,
            Ok(Err(err)) => {
                match &err {
                    FetchError::Transient(_) => {
                        // The next scheduled cycle is the retry mechanism.
                        tracing::warn!(source = %key, error = %err, "transient fetch error; will retry next cycle");
                    }
                    FetchError::Fatal(_) => {
                        tracing::error!(source = %key, error = %err, "fatal fetch error; check credentials/config");
                    }
                }
                return Err(anyhow!(err));
            }
            Err(_) => {
                tracing::warn!(source = %key, timeout_secs = timeout.as_secs(), "source poll timed out");
                return Err(anyhow!("poll timed out after {}s", timeout.as_secs()));
            }
        };

        outcome.events_fetched = batch.events.len();
        counter!("relwatch_events_fetched_total").increment(batch.events.len() as u64);

        // Stable processing order: chronological, fingerprint as
        // tie-break, so replays of the same batch alert identically.
        let mut events: Vec<(String, TrackerEvent)> = batch
            .events
            .into_iter()
            .map(|e| (e.fingerprint(), e))
            .collect();
        events.sort_by(|a, b| {
            let ta = a.1.occurred_at.unwrap_or(a.1.observed_at);
            let tb = b.1.occurred_at.unwrap_or(b.1.observed_at);
            ta.cmp(&tb).then_with(|| a.0.cmp(&b.0))
        });

        for (fingerprint, event) in events {
            if store
                .has_seen(&fingerprint)
                .map_err(|e| anyhow!(e).context("dedup check"))?
            {
                outcome.events_deduped += 1;
                counter!("relwatch_events_deduped_total").increment(1);
                continue;
            }

            let matched = matcher.matches(&event);
            if matched.is_empty() {
                if record_unmatched_as_seen {
                    store
                        .mark_seen(&fingerprint, Utc::now())
                        .map_err(|e| anyhow!(e).context("mark seen"))?;
                }
                continue;
            }

            outcome.events_matched += 1;
            tracing::info!(
                source = %key,
                fingerprint = %fingerprint,
                title = %event.title,
                rules = ?matched.iter().map(|m| m.rule_id.as_str()).collect::<Vec<_>>(),
                "event matched"
            );

            let failures = dispatcher
                .dispatch(&event, matched, &fingerprint)
                .await
                .map_err(|e| anyhow!(e).context("dispatch alert"))?;
            outcome.alerts_created += 1;
            outcome.notify_failures += failures;
            counter!("relwatch_alerts_total").increment(1);

            // Seen only after dispatch was attempted; a failed delivery is
            // recorded, not retried via re-alerting.
            store
                .mark_seen(&fingerprint, Utc::now())
                .map_err(|e| anyhow!(e).context("mark seen"))?;
        }

        if let Some(new_cursor) = batch.new_cursor {
            store
                .set_cursor(&key, &new_cursor)
                .map_err(|e| anyhow!(e).context("advance cursor"))?;
        }
        Ok::<(), anyhow::Error>(())
    };

    if let Err(err) = step.await {
        counter!("relwatch_source_errors_total").increment(1);
        outcome.error = Some(format!("{err:#}"));
    }
    outcome
}

/// Assemble a runnable pipeline from config: store, sources, matcher and
/// notifiers. Secrets come in via env-var indirection only.
pub fn build_runner(config: &AppConfig) -> Result<Runner> {
    let store: Arc<dyn StateStore> = Arc::new(
        SqliteStateStore::open(&config.state.sqlite_path)
            .with_context(|| format!("opening state store {}", config.state.sqlite_path))?,
    );
    build_runner_with_store(config, store)
}

pub fn build_runner_with_store(config: &AppConfig, store: Arc<dyn StateStore>) -> Result<Runner> {
    let http = HttpClient::new();

    let mut sources: Vec<Arc<dyn Source>> = Vec::new();
    if let Some(gh) = &config.sources.github {
        let token = resolve_env(gh.token_env.as_deref());
        for repo in &gh.repos {
            if gh.monitor.issues {
                sources.push(Arc::new(GitHubIssuesSource::new(
                    repo.clone(),
                    http.clone(),
                    token.clone(),
                )));
            }
            if gh.monitor.pulls {
                sources.push(Arc::new(GitHubPullsSource::new(
                    repo.clone(),
                    http.clone(),
                    token.clone(),
                )));
            }
        }
    }
    if let Some(hf) = &config.sources.huggingface {
        let token = resolve_env(hf.token_env.as_deref());
        for org in &hf.orgs {
            sources.push(Arc::new(HuggingFaceModelsSource::new(
                org.clone(),
                http.clone(),
                token.clone(),
            )));
        }
    }
    if let Some(ms) = &config.sources.modelscope {
        for org in &ms.orgs {
            sources.push(Arc::new(ModelScopeModelsSource::new(
                org.clone(),
                http.clone(),
            )));
        }
    }

    let matcher = RuleMatcher::new(config.watch_keywords.clone());

    let mut notifiers: Vec<Arc<dyn Notifier>> = Vec::new();
    if let Some(wl) = &config.notify.welink {
        match resolve_env(Some(&wl.webhook_env)) {
            Some(url) => notifiers.push(Arc::new(WeLinkNotifier::new(url).with_mentions(
                wl.is_at(),
                wl.is_at_all,
                wl.at_accounts.clone(),
            ))),
            None => tracing::warn!(
                env = %wl.webhook_env,
                "welink configured but webhook env var is unset; channel disabled"
            ),
        }
    }
    if let Some(em) = &config.notify.email {
        if !em.smtp_host.is_empty() && !em.to_list.is_empty() {
            let username = resolve_env(Some(&em.user_env)).unwrap_or_default();
            let password = resolve_env(Some(&em.password_env)).unwrap_or_default();
            notifiers.push(Arc::new(EmailNotifier::new(
                &em.smtp_host,
                em.smtp_port,
                username,
                password,
                &em.to_list,
                em.use_tls,
            )?));
        }
    }

    Ok(Runner::new(store, sources, matcher, notifiers))
}
