use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use std::sync::OnceLock;
use std::time::Duration;

use crate::provider::{malformed_payload, map_send_error, map_status_error, missing_credential};
use crate::{CompletionRequest, NormalizedReply, Provider, ProviderAdapter};
use parlor_types::ChatError;

/// Upper bound on `max_completion_tokens` for reasoning models.
pub const REASONING_MAX_COMPLETION_TOKENS: u32 = 4096;

const API_KEY_VAR: &str = "OPENAI_API_KEY";

// ---------------------------------------------------------------------------
// OpenAiAdapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    api_key: Option<String>,
    client: reqwest::Client,
    base_url: String,
    timeout: Option<Duration>,
}

impl OpenAiAdapter {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.is_empty()),
            client: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
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

/// Reasoning models (`o1`, `o3-mini`, `o4-mini`, ...) use a distinct
/// request schema: `max_completion_tokens` and no temperature.
pub fn is_reasoning_model(upstream_model: &str) -> bool {
    static MARKER: OnceLock<Regex> = OnceLock::new();
    MARKER
        .get_or_init(|| Regex::new(r"^o\d+(?:-|$)").expect("reasoning marker regex is valid"))
        .is_match(upstream_model)
}

// ---------------------------------------------------------------------------
// Request translation
// ---------------------------------------------------------------------------

fn build_request_body(request: &CompletionRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let mut body = json!({
        "model": request.upstream_model,
        "messages": messages,
    });

    if is_reasoning_model(&request.upstream_model) {
        body["max_completion_tokens"] =
            json!(request.max_output_tokens.min(REASONING_MAX_COMPLETION_TOKENS));
    } else {
        body["max_tokens"] = json!(request.max_output_tokens);
        if let Some(temp) = request.temperature.filter(|t| t.is_finite()) {
            body["temperature"] = json!(temp);
        }
    }

    body
}

// ---------------------------------------------------------------------------
// Response translation
// ---------------------------------------------------------------------------

fn parse_response(body: &serde_json::Value) -> Result<NormalizedReply, ChatError> {
    let choice = body["choices"]
        .as_array()
        .and_then(|choices| choices.first())
        .ok_or_else(|| malformed_payload(Provider::OpenAi, "Response contained no choices"))?;

    let text = choice["message"]["content"].as_str().ok_or_else(|| {
        malformed_payload(Provider::OpenAi, "First choice carried no message content")
    })?;

    Ok(NormalizedReply::new(text))
}

// ---------------------------------------------------------------------------
// ProviderAdapter implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn send(&self, request: &CompletionRequest) -> Result<NormalizedReply, ChatError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| missing_credential(Provider::OpenAi, API_KEY_VAR))?;

        let body = build_request_body(request);

        let mut builder = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| map_send_error(Provider::OpenAi, e, self.timeout))?;

        let status = resp.status();
        let response_body = resp
            .text()
            .await
            .map_err(|e| map_send_error(Provider::OpenAi, e, self.timeout))?;

        if !status.is_success() {
            tracing::warn!(%status, model = %request.upstream_model, "OpenAI request failed");
            return Err(map_status_error(Provider::OpenAi, status, &response_body));
        }

        let json: serde_json::Value = serde_json::from_str(&response_body).map_err(|e| {
            malformed_payload(Provider::OpenAi, format!("Failed to parse response JSON: {e}"))
        })?;

        parse_response(&json)
    }

    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
