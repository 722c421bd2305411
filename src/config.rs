// src/config.rs
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Application config, loaded from a JSON file. Secrets never live in the
/// file: every credential field (`*_env`) names an environment variable,
/// resolved at assembly time.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    #[serde(default)]
    pub watch_keywords: Vec<String>,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesConfig {
    pub github: Option<GitHubConfig>,
    pub huggingface: Option<HuggingFaceConfig>,
    pub modelscope: Option<ModelScopeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubConfig {
    /// `owner/repo` strings.
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub monitor: GitHubMonitor,
    /// Env var holding the API token; anonymous access rate-limits fast.
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitHubMonitor {
    #[serde(default = "default_true")]
    pub issues: bool,
    #[serde(default = "default_true")]
    pub pulls: bool,
}

impl Default for GitHubMonitor {
    fn default() -> Self {
        Self {
            issues: true,
            pulls: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HuggingFaceConfig {
    #[serde(default)]
    pub orgs: Vec<String>,
    pub token_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelScopeConfig {
    #[serde(default)]
    pub orgs: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    pub welink: Option<WeLinkConfig>,
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeLinkConfig {
    #[serde(default = "default_webhook_env")]
    pub webhook_env: String,
    /// Defaults to "whenever at_accounts is non-empty".
    pub is_at: Option<bool>,
    #[serde(default)]
    pub is_at_all: bool,
    #[serde(default)]
    pub at_accounts: Vec<String>,
}

impl WeLinkConfig {
    pub fn is_at(&self) -> bool {
        self.is_at.unwrap_or(!self.at_accounts.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub user_env: String,
    pub password_env: String,
    #[serde(default)]
    pub to_list: Vec<String>,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

fn default_poll_interval() -> u64 {
    300
}

fn default_sqlite_path() -> String {
    "./relwatch.sqlite3".to_string()
}

fn default_webhook_env() -> String {
    "WELINK_WEBHOOK_URL".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

/// Env-var indirection for secrets; `None` env name resolves to `None`.
pub fn resolve_env(name: Option<&str>) -> Option<String> {
    std::env::var(name?).ok()
}
