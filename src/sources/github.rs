// src/sources/github.rs
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;
use crate::event::TrackerEvent;
use crate::http::HttpClient;

use super::{truncate_chars, PollBatch, Source};

const API_BASE: &str = "https://api.github.com";

/// Cursor for both GitHub sources: high-water mark over `updated_at`.
#[derive(Debug, Serialize, Deserialize)]
struct TimeCursor {
    updated_after: DateTime<Utc>,
}

fn decode_cursor(cursor: Option<&str>) -> Option<DateTime<Utc>> {
    // A cursor we cannot parse is treated as absent rather than an error;
    // the next successful poll rewrites it.
    let c: TimeCursor = serde_json::from_str(cursor?).ok()?;
    Some(c.updated_after)
}

fn encode_cursor(updated_after: DateTime<Utc>) -> Option<String> {
    serde_json::to_string(&TimeCursor { updated_after }).ok()
}

fn auth_headers(token: Option<&str>) -> Vec<(&'static str, String)> {
    let mut headers = vec![
        ("Accept", "application/vnd.github+json".to_string()),
        ("X-GitHub-Api-Version", "2022-11-28".to_string()),
    ];
    if let Some(token) = token {
        headers.push(("Authorization", format!("Bearer {token}")));
    }
    headers
}

/// Follow Link-header pagination, collecting every page's items.
async fn fetch_pages(
    http: &HttpClient,
    url: String,
    token: Option<&str>,
) -> Result<Vec<Value>, FetchError> {
    let headers = auth_headers(token);
    let mut items = Vec::new();
    let mut next_url = Some(url);
    while let Some(url) = next_url {
        let resp = http.get(&url, &headers).await?;
        let page: Vec<Value> = resp.json().map_err(FetchError::transient)?;
        items.extend(page);
        next_url = resp.next_link();
    }
    Ok(items)
}

fn str_field(item: &Value, key: &str) -> String {
    item.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn item_id(item: &Value) -> String {
    if let Some(id) = item.get("id").and_then(Value::as_i64) {
        return id.to_string();
    }
    if let Some(number) = item.get("number").and_then(Value::as_i64) {
        return number.to_string();
    }
    str_field(item, "url")
}

fn updated_at(item: &Value) -> Option<DateTime<Utc>> {
    item.get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Watches one repo's issues (PRs excluded; the issues listing mixes them
/// in, keyed by the `pull_request` field).
pub struct GitHubIssuesSource {
    repo: String,
    http: HttpClient,
    token: Option<String>,
}

impl GitHubIssuesSource {
    pub fn new(repo: impl Into<String>, http: HttpClient, token: Option<String>) -> Self {
        Self {
            repo: repo.into(),
            http,
            token,
        }
    }
}

#[async_trait]
impl Source for GitHubIssuesSource {
    fn key(&self) -> String {
        format!("github:{}:issues", self.repo)
    }

    async fn poll(&self, cursor: Option<String>) -> Result<PollBatch, FetchError> {
        let updated_after = decode_cursor(cursor.as_deref());

        let mut params = vec![
            ("state", "all".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
            ("per_page", "100".to_string()),
        ];
        if let Some(after) = updated_after {
            params.push(("since", after.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        let url = reqwest::Url::parse_with_params(
            &format!("{API_BASE}/repos/{}/issues", self.repo),
            &params,
        )
        .map_err(FetchError::fatal)?;

        let items = fetch_pages(&self.http, url.to_string(), self.token.as_deref()).await?;

        let mut newest = updated_after;
        let mut events = Vec::new();
        for item in items {
            if item.get("pull_request").is_some() {
                continue;
            }
            let Some(updated) = updated_at(&item) else {
                continue;
            };
            if matches!(updated_after, Some(after) if updated <= after) {
                continue;
            }
            if newest.map_or(true, |n| updated > n) {
                newest = Some(updated);
            }

            events.push(TrackerEvent {
                source: "github".into(),
                resource_type: "repo_issue".into(),
                resource_id: self.repo.clone(),
                event_type: "issue_updated".into(),
                event_id: Some(item_id(&item)),
                title: str_field(&item, "title"),
                summary: truncate_chars(&str_field(&item, "body"), 400),
                url: str_field(&item, "html_url"),
                occurred_at: Some(updated),
                observed_at: Utc::now(),
                raw: Some(item),
            });
        }

        Ok(PollBatch {
            events,
            new_cursor: newest.and_then(encode_cursor).or(cursor),
        })
    }
}

/// Watches one repo's pull requests. Merged PRs surface as `pr_merged`
/// with the merge time as `occurred_at`.
pub struct GitHubPullsSource {
    repo: String,
    http: HttpClient,
    token: Option<String>,
}

impl GitHubPullsSource {
    pub fn new(repo: impl Into<String>, http: HttpClient, token: Option<String>) -> Self {
        Self {
            repo: repo.into(),
            http,
            token,
        }
    }
}

#[async_trait]
impl Source for GitHubPullsSource {
    fn key(&self) -> String {
        format!("github:{}:pulls", self.repo)
    }

    async fn poll(&self, cursor: Option<String>) -> Result<PollBatch, FetchError> {
        let updated_after = decode_cursor(cursor.as_deref());

        let url = reqwest::Url::parse_with_params(
            &format!("{API_BASE}/repos/{}/pulls", self.repo),
            &[
                ("state", "all"),
                ("sort", "updated"),
                ("direction", "desc"),
                ("per_page", "100"),
            ],
        )
        .map_err(FetchError::fatal)?;

        let items = fetch_pages(&self.http, url.to_string(), self.token.as_deref()).await?;

        let mut newest = updated_after;
        let mut events = Vec::new();
        for item in items {
            let Some(updated) = updated_at(&item) else {
                continue;
            };
            if matches!(updated_after, Some(after) if updated <= after) {
                continue;
            }
            if newest.map_or(true, |n| updated > n) {
                newest = Some(updated);
            }

            let merged_at = item
                .get("merged_at")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc));
            let (event_type, occurred_at) = match merged_at {
                Some(merged) => ("pr_merged", merged),
                None => ("pr_updated", updated),
            };

            events.push(TrackerEvent {
                source: "github".into(),
                resource_type: "repo_pr".into(),
                resource_id: self.repo.clone(),
                event_type: event_type.into(),
                event_id: Some(item_id(&item)),
                title: str_field(&item, "title"),
                summary: truncate_chars(&str_field(&item, "body"), 400),
                url: str_field(&item, "html_url"),
                occurred_at: Some(occurred_at),
                observed_at: Utc::now(),
                raw: Some(item),
            });
        }

        Ok(PollBatch {
            events,
            new_cursor: newest.and_then(encode_cursor).or(cursor),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cursor_roundtrip() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let encoded = encode_cursor(t).unwrap();
        assert_eq!(decode_cursor(Some(&encoded)), Some(t));
    }

    #[test]
    fn garbage_cursor_is_ignored() {
        assert_eq!(decode_cursor(Some("not json at all")), None);
        assert_eq!(decode_cursor(Some(r#"{"other":"shape"}"#)), None);
        assert_eq!(decode_cursor(None), None);
    }

    #[test]
    fn item_id_prefers_numeric_id() {
        let item = serde_json::json!({"id": 42, "number": 7, "url": "https://x"});
        assert_eq!(item_id(&item), "42");
        let item = serde_json::json!({"number": 7, "url": "https://x"});
        assert_eq!(item_id(&item), "7");
        let item = serde_json::json!({"url": "https://x"});
        assert_eq!(item_id(&item), "https://x");
    }

    #[test]
    fn auth_header_present_only_with_token() {
        assert_eq!(auth_headers(None).len(), 2);
        let with = auth_headers(Some("tok"));
        assert!(with
            .iter()
            .any(|(k, v)| *k == "Authorization" && v == "Bearer tok"));
    }
}
