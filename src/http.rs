// src/http.rs
use std::time::Duration;

use anyhow::{anyhow, Context};
use rand::Rng;
use reqwest::StatusCode;

use crate::error::FetchError;

const USER_AGENT: &str = concat!("relwatch/", env!("CARGO_PKG_VERSION"));

/// Shared GET client for source adapters: common User-Agent and timeout,
/// bounded retry with backoff+jitter on 429/5xx and transport errors.
/// Classification happens here so adapters only see `FetchError`.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    max_retries: u32,
    base_backoff: Duration,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_retries: 3,
            base_backoff: Duration::from_millis(800),
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub async fn get(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
    ) -> Result<HttpResponse, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            let mut req = self.client.get(url);
            for (name, value) in headers {
                req = req.header(*name, value);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let final_url = resp.url().to_string();
                        let link = resp
                            .headers()
                            .get(reqwest::header::LINK)
                            .and_then(|v| v.to_str().ok())
                            .map(|s| s.to_string());
                        let body = resp
                            .text()
                            .await
                            .map_err(|e| FetchError::transient(anyhow!(e).context("read body")))?;
                        return Ok(HttpResponse {
                            status,
                            final_url,
                            link,
                            body,
                        });
                    }

                    if retryable_status(status) && attempt < self.max_retries {
                        self.pause(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(classify_status(status, url));
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        self.pause(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(FetchError::transient(
                        anyhow!(e).context(format!("GET {url}")),
                    ));
                }
            }
        }
    }

    async fn pause(&self, attempt: u32) {
        let delay = backoff_delay(self.base_backoff, attempt);
        let jitter = delay.mul_f64(rand::rng().random_range(0.0..0.25));
        tokio::time::sleep(delay + jitter).await;
    }
}

/// Pure backoff policy: attempt number -> delay. Jitter is applied by the
/// caller.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(16))
}

fn retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_status(status: StatusCode, url: &str) -> FetchError {
    let err = anyhow!("GET {url} returned {status}");
    match status {
        // 403 is how GitHub signals secondary rate limits, so it counts as
        // transient; 401 is a bad token and will not fix itself.
        StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => FetchError::transient(err),
        s if s.is_server_error() => FetchError::transient(err),
        StatusCode::UNAUTHORIZED => FetchError::fatal(err),
        _ => FetchError::fatal(err),
    }
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub link: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_str(&self.body)
            .with_context(|| format!("parse JSON from {}", self.final_url))
    }

    /// `rel="next"` URL from the RFC5988 Link header, if any.
    pub fn next_link(&self) -> Option<String> {
        self.link
            .as_deref()
            .and_then(|l| parse_link_header(l).remove("next"))
    }
}

/// Parse an RFC5988 Link header into a rel -> url map.
///
/// Example: `<https://...>; rel="next", <https://...>; rel="last"`
pub fn parse_link_header(value: &str) -> std::collections::HashMap<String, String> {
    let mut out = std::collections::HashMap::new();
    for part in value.split(',') {
        let part = part.trim();
        let Some(rest) = part.strip_prefix('<') else {
            continue;
        };
        let Some((url, params)) = rest.split_once('>') else {
            continue;
        };
        for p in params.split(';') {
            let p = p.trim();
            if let Some(rel) = p.strip_prefix("rel=") {
                let rel = rel.trim_matches('"');
                if !rel.is_empty() {
                    out.insert(rel.to_string(), url.to_string());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_header_parses_next_and_last() {
        let v = r#"<https://api.github.com/x?page=2>; rel="next", <https://api.github.com/x?page=9>; rel="last""#;
        let links = parse_link_header(v);
        assert_eq!(
            links.get("next").map(String::as_str),
            Some("https://api.github.com/x?page=2")
        );
        assert_eq!(
            links.get("last").map(String::as_str),
            Some("https://api.github.com/x?page=9")
        );
    }

    #[test]
    fn malformed_link_header_yields_empty_map() {
        assert!(parse_link_header("nonsense without brackets").is_empty());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(800);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(1600));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(3200));
    }

    #[test]
    fn rate_limit_statuses_classify_transient() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "u").is_transient());
        assert!(classify_status(StatusCode::FORBIDDEN, "u").is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "u").is_transient());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "u").is_transient());
        assert!(!classify_status(StatusCode::NOT_FOUND, "u").is_transient());
    }
}
