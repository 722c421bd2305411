// src/sources/huggingface.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;
use crate::event::TrackerEvent;
use crate::http::HttpClient;

use super::{PollBatch, Source};

const API_URL: &str = "https://huggingface.co/api/models";

#[derive(Debug, Serialize, Deserialize)]
struct TimeCursor {
    last_modified_after: DateTime<Utc>,
}

fn decode_cursor(cursor: Option<&str>) -> Option<DateTime<Utc>> {
    let c: TimeCursor = serde_json::from_str(cursor?).ok()?;
    Some(c.last_modified_after)
}

fn encode_cursor(last_modified_after: DateTime<Utc>) -> Option<String> {
    serde_json::to_string(&TimeCursor {
        last_modified_after,
    })
    .ok()
}

/// Watches one Hugging Face org/user's model listing via the Hub API.
/// Pagination follows the Link header, same convention as GitHub.
pub struct HuggingFaceModelsSource {
    org: String,
    http: HttpClient,
    token: Option<String>,
}

impl HuggingFaceModelsSource {
    pub fn new(org: impl Into<String>, http: HttpClient, token: Option<String>) -> Self {
        Self {
            org: org.into(),
            http,
            token,
        }
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("Accept", "application/json".to_string())];
        if let Some(token) = &self.token {
            headers.push(("Authorization", format!("Bearer {token}")));
        }
        headers
    }
}

#[async_trait]
impl Source for HuggingFaceModelsSource {
    fn key(&self) -> String {
        format!("huggingface:{}:models", self.org)
    }

    async fn poll(&self, cursor: Option<String>) -> Result<PollBatch, FetchError> {
        let last_modified_after = decode_cursor(cursor.as_deref());

        let url = reqwest::Url::parse_with_params(
            API_URL,
            &[
                ("author", self.org.as_str()),
                ("sort", "lastModified"),
                ("direction", "-1"),
                ("limit", "100"),
                ("full", "true"),
            ],
        )
        .map_err(FetchError::fatal)?;

        let headers = self.headers();
        let mut newest = last_modified_after;
        let mut events = Vec::new();

        let mut next_url = Some(url.to_string());
        while let Some(page_url) = next_url {
            let resp = self.http.get(&page_url, &headers).await?;
            let items: Vec<Value> = resp.json().map_err(FetchError::transient)?;

            for item in items {
                let Some(last_modified) = item
                    .get("lastModified")
                    .or_else(|| item.get("last_modified"))
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc))
                else {
                    continue;
                };
                if matches!(last_modified_after, Some(after) if last_modified <= after) {
                    continue;
                }
                if newest.map_or(true, |n| last_modified > n) {
                    newest = Some(last_modified);
                }

                let model_id = item
                    .get("modelId")
                    .or_else(|| item.get("id"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if model_id.is_empty() {
                    continue;
                }

                let sha = item
                    .get("sha")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let event_id = if sha.is_empty() { model_id.clone() } else { sha };
                let summary = item
                    .get("pipeline_tag")
                    .or_else(|| item.get("library_name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                events.push(TrackerEvent {
                    source: "huggingface".into(),
                    resource_type: "org_model".into(),
                    resource_id: self.org.clone(),
                    event_type: "model_updated".into(),
                    event_id: Some(event_id),
                    title: model_id.clone(),
                    summary,
                    url: format!("https://huggingface.co/{model_id}"),
                    occurred_at: Some(last_modified),
                    observed_at: Utc::now(),
                    raw: Some(item),
                });
            }

            next_url = resp.next_link();
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
        let t = Utc.with_ymd_and_hms(2024, 5, 2, 8, 30, 0).unwrap();
        let encoded = encode_cursor(t).unwrap();
        assert!(encoded.contains("last_modified_after"));
        assert_eq!(decode_cursor(Some(&encoded)), Some(t));
    }

    #[test]
    fn foreign_cursor_shape_is_ignored() {
        assert_eq!(decode_cursor(Some(r#"{"updated_after":"2024-01-01T00:00:00Z"}"#)), None);
    }
}
