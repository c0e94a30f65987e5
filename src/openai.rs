//! Minimal client for OpenAI-compatible HTTP APIs.
//!
//! Shared by the embedding and generation providers. Every request has a
//! timeout, and transient failures are retried with exponential backoff:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use std::time::Duration;

pub(crate) struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl OpenAiClient {
    /// Build a client for `base_url` (e.g. `https://api.openai.com/v1`).
    ///
    /// The API key comes from `OPENAI_API_KEY`. It is mandatory for the
    /// hosted OpenAI endpoint and optional for self-hosted compatible
    /// servers.
    pub(crate) fn new(base_url: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() && base_url.contains("api.openai.com") {
            bail!("OPENAI_API_KEY environment variable not set");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries,
        })
    }

    /// POST a JSON body to `{base_url}{path}` and return the parsed JSON reply.
    pub(crate) async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(
                    url = %url,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return Ok(json);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!("API error {} from {}: {}", status, url, body_text));
                        continue;
                    }

                    // Client error (not 429), fail fast
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("API error {} from {}: {}", status, url, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!("request to {} failed: {}", url, e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("request to {} failed after retries", url)))
    }
}
