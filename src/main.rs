//! relwatch: polling change-detection sentinel.
//! Watches GitHub repos and model hubs, dedupes events by fingerprint,
//! matches keyword rules, and delivers alerts to WeLink/email.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relwatch::runner::{build_runner, log_cycle_summary};

#[derive(Debug, Parser)]
#[command(name = "relwatch", version, about = "Polling change-detection sentinel")]
struct Cli {
    /// Path to the JSON config file.
    #[arg(long)]
    config: PathBuf,

    /// Run one poll cycle and exit (default).
    #[arg(long, conflicts_with = "daemon")]
    once: bool,

    /// Loop forever with the configured poll interval.
    #[arg(long)]
    daemon: bool,

    /// Log level filter (overrides RUST_LOG), e.g. "relwatch=debug,warn".
    #[arg(long, env = "RELWATCH_LOG")]
    log_level: Option<String>,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("relwatch=info,warn")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = relwatch::load_config(&cli.config)?;
    let runner = build_runner(&config)?;

    // --once and --daemon conflict at parse time; once is the default.
    let daemon_mode = cli.daemon && !cli.once;
    let mode = if daemon_mode { "daemon" } else { "once" };
    tracing::info!(
        mode,
        config = %cli.config.display(),
        poll_interval_seconds = config.poll_interval_seconds,
        sqlite_path = %config.state.sqlite_path,
        keywords = ?config.watch_keywords,
        "relwatch start"
    );
    let sources = runner.source_keys();
    let channels = runner.notifier_channels();
    tracing::info!(sources = ?sources, notifiers = ?channels, "pipeline assembled");
    if sources.is_empty() {
        tracing::warn!("no sources configured; nothing will be polled");
    }
    if channels.is_empty() {
        tracing::warn!("no notifiers configured; alerts will be recorded but not delivered");
    }

    if daemon_mode {
        let interval = Duration::from_secs(config.poll_interval_seconds.max(1));
        runner.run_daemon(interval).await?;
    } else {
        let report = runner.run_once().await;
        log_cycle_summary(1, &report);
    }
    Ok(())
}
