// src/sources/modelscope.rs
use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FetchError;
use crate::event::TrackerEvent;
use crate::http::HttpClient;

use super::{PollBatch, Source};

const API_URL: &str = "https://modelscope.cn/openapi/v1/models";
const PAGE_SIZE: usize = 50;
const MAX_ITEMS: usize = 3000;

/// Cursor: the set of model ids already announced for this org. The signal
/// here is "new model appeared", so a set survives listing reorderings that
/// a timestamp high-water mark would not.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IdSetCursor {
    known_model_ids: BTreeSet<String>,
}

fn decode_cursor(cursor: Option<&str>) -> BTreeSet<String> {
    cursor
        .and_then(|c| serde_json::from_str::<IdSetCursor>(c).ok())
        .map(|c| c.known_model_ids)
        .unwrap_or_default()
}

fn encode_cursor(known_model_ids: BTreeSet<String>) -> Option<String> {
    serde_json::to_string(&IdSetCursor { known_model_ids }).ok()
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    models: Vec<Value>,
    total_count: Option<usize>,
}

/// Watches one ModelScope org's model listing. Only newly appeared models
/// produce events (`model_added`).
pub struct ModelScopeModelsSource {
    org: String,
    http: HttpClient,
}

impl ModelScopeModelsSource {
    pub fn new(org: impl Into<String>, http: HttpClient) -> Self {
        Self {
            org: org.into(),
            http,
        }
    }
}

#[async_trait]
impl Source for ModelScopeModelsSource {
    fn key(&self) -> String {
        format!("modelscope:{}:models", self.org)
    }

    async fn poll(&self, cursor: Option<String>) -> Result<PollBatch, FetchError> {
        let known_ids = decode_cursor(cursor.as_deref());

        let mut found: BTreeMap<String, Value> = BTreeMap::new();
        let mut page_number = 1usize;
        while page_number * PAGE_SIZE <= MAX_ITEMS {
            let url = reqwest::Url::parse_with_params(
                API_URL,
                &[
                    ("owner", self.org.clone()),
                    ("sort", "last_modified".to_string()),
                    ("page_number", page_number.to_string()),
                    ("page_size", PAGE_SIZE.to_string()),
                ],
            )
            .map_err(FetchError::fatal)?;

            let resp = self
                .http
                .get(url.as_str(), &[("Accept", "application/json".to_string())])
                .await?;
            let envelope: Envelope = resp.json().map_err(FetchError::transient)?;
            if !envelope.success {
                return Err(FetchError::transient(anyhow!(
                    "ModelScope OpenAPI reported success=false for {}",
                    self.org
                )));
            }
            let data = envelope.data.ok_or_else(|| {
                FetchError::transient(anyhow!(
                    "ModelScope OpenAPI payload missing data for {}",
                    self.org
                ))
            })?;

            let empty_page = data.models.is_empty();
            for item in data.models {
                let Some(model_id) = item.get("id").and_then(Value::as_str) else {
                    continue;
                };
                if model_id.is_empty() {
                    continue;
                }
                found.insert(model_id.to_string(), item);
            }

            if let Some(total) = data.total_count {
                if total <= page_number * PAGE_SIZE {
                    break;
                }
            }
            if empty_page {
                break;
            }
            page_number += 1;
        }

        let now = Utc::now();
        let mut events = Vec::new();
        for (model_id, raw) in &found {
            if known_ids.contains(model_id) {
                continue;
            }
            let occurred_at = raw
                .get("last_modified")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|t| t.with_timezone(&Utc));
            let summary = raw
                .get("tasks")
                .and_then(Value::as_array)
                .map(|tasks| {
                    tasks
                        .iter()
                        .filter_map(Value::as_str)
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();

            events.push(TrackerEvent {
                source: "modelscope".into(),
                resource_type: "org_model".into(),
                resource_id: self.org.clone(),
                event_type: "model_added".into(),
                event_id: Some(model_id.clone()),
                title: model_id.clone(),
                summary,
                url: format!("https://modelscope.cn/models/{model_id}"),
                occurred_at,
                observed_at: now,
                raw: Some(raw.clone()),
            });
        }

        let mut all_ids = known_ids;
        all_ids.extend(found.into_keys());

        Ok(PollBatch {
            events,
            new_cursor: encode_cursor(all_ids),
        })
    }
}
