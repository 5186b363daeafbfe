use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::provider::{malformed_payload, map_send_error, map_status_error, missing_credential};
use crate::{CompletionRequest, NormalizedReply, Provider, ProviderAdapter};
use parlor_types::ChatError;

const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";
const API_VERSION: &str = "2023-06-01";

// ---------------------------------------------------------------------------
// AnthropicAdapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Option<Duration>,
}

impl AnthropicAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.is_empty()),
            base_url: "https://api.anthropic.com".to_string(),
            timeout: None,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Anthropic accepts temperatures in `[0, 1]`; clients may send up to 2.
pub fn clamp_temperature(temperature: f64) -> f64 {
    temperature.clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// Request translation (Unified → Anthropic JSON)
// ---------------------------------------------------------------------------

fn build_request_body(request: &CompletionRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let mut body = json!({
        "model": request.upstream_model,
        "max_tokens": request.max_output_tokens,
        "messages": messages,
    });

    if let Some(temp) = request.temperature.filter(|t| t.is_finite()) {
        body["temperature"] = json!(clamp_temperature(temp));
    }

    body
}

// ---------------------------------------------------------------------------
// Response translation (Anthropic JSON → NormalizedReply)
// ---------------------------------------------------------------------------

fn parse_response(body: &serde_json::Value) -> Result<NormalizedReply, ChatError> {
    let first = body["content"]
        .as_array()
        .and_then(|blocks| blocks.first())
        .ok_or_else(|| malformed_payload(Provider::Anthropic, "Response contained no content"))?;

    let text = first["text"].as_str().ok_or_else(|| {
        malformed_payload(Provider::Anthropic, "First content block carried no text")
    })?;

    Ok(NormalizedReply::new(text))
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn send(&self, request: &CompletionRequest) -> Result<NormalizedReply, ChatError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| missing_credential(Provider::Anthropic, API_KEY_VAR))?;

        let body = build_request_body(request);

        let mut builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| map_send_error(Provider::Anthropic, e, self.timeout))?;

        let status = resp.status();
        let response_body = resp
            .text()
            .await
            .map_err(|e| map_send_error(Provider::Anthropic, e, self.timeout))?;

        if !status.is_success() {
            tracing::warn!(%status, model = %request.upstream_model, "Anthropic request failed");
            return Err(map_status_error(Provider::Anthropic, status, &response_body));
        }

        let json: serde_json::Value = serde_json::from_str(&response_body).map_err(|e| {
            malformed_payload(Provider::Anthropic, format!("Failed to parse response JSON: {e}"))
        })?;

        parse_response(&json)
    }

    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
