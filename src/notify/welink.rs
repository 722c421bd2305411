// src/notify/welink.rs
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::NotifyError;
use crate::event::Alert;

use super::Notifier;

const MAX_TEXT_CHARS: usize = 500;
const MAX_AT_ACCOUNTS: usize = 10;

/// WeLink group-robot webhook channel.
///
/// The webhook URL must already carry the token and `channel=standard`
/// query parameters. Receiver-side rules the payload builder upholds:
/// - `timeStamp` is epoch milliseconds, freshly generated per call
///   (the receiver rejects timestamps older than 10 minutes)
/// - `uuid` is regenerated per call, never reused
/// - mentions only highlight when the mentioned ids also appear as
///   `@userid` tokens inside `content.text` (`@all` for isAtAll)
/// - `content.text` is 1..=500 chars
pub struct WeLinkNotifier {
    webhook_url: String,
    client: Client,
    is_at: bool,
    is_at_all: bool,
    at_accounts: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload {
    message_type: &'static str,
    content: TextContent,
    time_stamp: i64,
    uuid: String,
    is_at: bool,
    is_at_all: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    at_accounts: Vec<String>,
}

#[derive(Debug, Serialize)]
struct TextContent {
    text: String,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    code: serde_json::Value,
    #[serde(default)]
    message: Option<String>,
}

impl WeLinkNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: Client::new(),
            is_at: false,
            is_at_all: false,
            at_accounts: Vec::new(),
        }
    }

    pub fn with_mentions(mut self, is_at: bool, is_at_all: bool, at_accounts: Vec<String>) -> Self {
        self.is_at = is_at;
        self.is_at_all = is_at_all;
        self.at_accounts = at_accounts;
        self
    }

    fn build_payload(&self, text: &str) -> WebhookPayload {
        let mut message_text = self.decorate_text(text);
        if message_text.is_empty() {
            message_text = "-".to_string();
        }
        if message_text.chars().count() > MAX_TEXT_CHARS {
            message_text = message_text.chars().take(MAX_TEXT_CHARS - 1).collect();
            message_text.push('…');
        }

        let mut payload = WebhookPayload {
            message_type: "text",
            content: TextContent { text: message_text },
            time_stamp: Utc::now().timestamp_millis(),
            uuid: Uuid::new_v4().simple().to_string(),
            is_at: false,
            is_at_all: false,
            at_accounts: Vec::new(),
        };

        if self.is_at_all {
            payload.is_at_all = true;
            return payload;
        }

        let at_accounts: Vec<String> = self
            .at_accounts
            .iter()
            .filter(|a| !a.is_empty())
            .take(MAX_AT_ACCOUNTS)
            .cloned()
            .collect();
        if self.is_at && !at_accounts.is_empty() {
            payload.is_at = true;
            payload.at_accounts = at_accounts;
        }
        payload
    }

    fn decorate_text(&self, text: &str) -> String {
        let text = text.trim();
        if self.is_at_all {
            if text.starts_with("@all") {
                return text.to_string();
            }
            return format!("@all {text}");
        }

        if self.is_at && !self.at_accounts.is_empty() {
            let mentions = self
                .at_accounts
                .iter()
                .filter(|a| !a.is_empty())
                .take(MAX_AT_ACCOUNTS)
                .map(|a| format!("@{a}"))
                .collect::<Vec<_>>()
                .join(" ");
            if !mentions.is_empty() && !text.contains(&mentions) {
                return format!("{mentions} {text}").trim().to_string();
            }
        }
        text.to_string()
    }
}

#[async_trait]
impl Notifier for WeLinkNotifier {
    fn channel(&self) -> &'static str {
        "welink"
    }

    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        let payload = self.build_payload(&alert.content);

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .context("welink webhook post")?;
        let status = resp.status();
        let body = resp.text().await.context("welink webhook body")?;
        if !status.is_success() {
            return Err(anyhow!("welink webhook status {status}: {}", snippet(&body)).into());
        }

        let parsed: WebhookResponse = serde_json::from_str(&body)
            .with_context(|| format!("welink webhook invalid JSON: {}", snippet(&body)))?;
        let code = match &parsed.code {
            serde_json::Value::String(s) => s.clone(),
            v => v.to_string(),
        };
        if code != "0" {
            // Notable codes: 58404 missing resource, 58500 server error,
            // 58601 bad params, 58602 bot disabled.
            return Err(NotifyError::new(format!(
                "welink webhook code {code}: {}",
                parsed.message.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

fn snippet(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> WeLinkNotifier {
        WeLinkNotifier::new("https://example.test/webhook?token=t&channel=standard".into())
    }

    #[test]
    fn plain_payload_has_fresh_uuid_and_no_mentions() {
        let n = notifier();
        let a = n.build_payload("hello");
        let b = n.build_payload("hello");
        assert_eq!(a.content.text, "hello");
        assert!(!a.is_at && !a.is_at_all);
        assert!(a.at_accounts.is_empty());
        assert_ne!(a.uuid, b.uuid);
    }

    #[test]
    fn at_all_prefixes_text_and_sets_flag() {
        let n = notifier().with_mentions(false, true, vec![]);
        let p = n.build_payload("release out");
        assert!(p.is_at_all);
        assert!(!p.is_at);
        assert_eq!(p.content.text, "@all release out");
    }

    #[test]
    fn at_accounts_are_mentioned_in_text_and_capped_at_ten() {
        let accounts: Vec<String> = (0..12).map(|i| format!("u{i}")).collect();
        let n = notifier().with_mentions(true, false, accounts);
        let p = n.build_payload("ping");
        assert!(p.is_at);
        assert_eq!(p.at_accounts.len(), 10);
        assert!(p.content.text.starts_with("@u0 @u1"));
    }

    #[test]
    fn empty_text_becomes_dash_and_long_text_truncates() {
        let n = notifier();
        assert_eq!(n.build_payload("   ").content.text, "-");
        let long = "x".repeat(800);
        let text = n.build_payload(&long).content.text;
        assert_eq!(text.chars().count(), 500);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn payload_serializes_with_wire_field_names() {
        let n = notifier().with_mentions(true, false, vec!["alice".into()]);
        let json = serde_json::to_value(n.build_payload("hi")).unwrap();
        assert_eq!(json["messageType"], "text");
        assert!(json["timeStamp"].is_i64());
        assert!(json["uuid"].is_string());
        assert_eq!(json["isAt"], true);
        assert_eq!(json["isAtAll"], false);
        assert_eq!(json["atAccounts"][0], "alice");
        assert_eq!(json["content"]["text"], "@alice hi");
    }

    #[test]
    fn error_code_parses_as_string_or_number() {
        let s: WebhookResponse =
            serde_json::from_str(r#"{"code":"58602","data":null,"message":"bot disabled"}"#)
                .unwrap();
        assert_eq!(s.code.as_str(), Some("58602"));
        let n: WebhookResponse = serde_json::from_str(r#"{"code":0,"data":"ok"}"#).unwrap();
        assert_eq!(n.code.to_string(), "0");
    }
}
