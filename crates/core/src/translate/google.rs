//! Translator backed by the public Google Translate web endpoint.
//! This is the keyless `translate_a/single` API used by browser widgets.

use super::{ProviderError, Translator};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::trace;

/// Host used when no override is given.
pub const DEFAULT_ENDPOINT: &str = "https://translate.googleapis.com";

/// Translator that delegates to the Google web translation endpoint.
pub struct GoogleTranslator {
    client: Client,
    base_url: String,
}

impl GoogleTranslator {
    /// Create a translator talking to [`DEFAULT_ENDPOINT`].
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_base_url(DEFAULT_ENDPOINT)
    }

    /// Create a translator talking to `base_url` instead of the public host.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::transient(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Send the query and return the decoded JSON body.
    async fn get(&self, text: &str, target_language: &str) -> Result<Value, ProviderError> {
        let resp = self
            .client
            .get(format!("{}/translate_a/single", self.base_url))
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target_language),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::transient(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify(status, &body));
        }
        resp.json()
            .await
            .map_err(|e| ProviderError::transient(format!("decoding response: {e}")))
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate_once(
        &self,
        text: &str,
        target_language: &str,
    ) -> Result<String, ProviderError> {
        trace!("translate_once len={} target={}", text.len(), target_language);
        let value = self.get(text, target_language).await?;
        extract_translation(&value)
            .ok_or_else(|| ProviderError::transient("response carried no translated segments"))
    }
}

/// Map an unsuccessful HTTP response to a provider error.
fn classify(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS || body.to_lowercase().contains("rate") {
        ProviderError::rate_limited(message)
    } else {
        ProviderError::transient(message)
    }
}

/// Join the translated part of every segment in `[[["out", "in", ...], ...], ...]`.
fn extract_translation(value: &Value) -> Option<String> {
    let segments = value.get(0)?.as_array()?;
    let mut out = String::new();
    for segment in segments {
        if let Some(part) = segment.get(0).and_then(Value::as_str) {
            out.push_str(part);
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
