use async_trait::async_trait;
use std::time::Duration;

use crate::{CompletionRequest, NormalizedReply, Provider};
use parlor_types::ChatError;

/// Used when the upstream error body carries no readable message.
pub(crate) const FALLBACK_ERROR_MESSAGE: &str = "Could not get a response from the model.";

// ---------------------------------------------------------------------------
// ProviderAdapter
// ---------------------------------------------------------------------------

/// Translates a provider-agnostic request into one upstream's wire format
/// and the upstream response back into a [`NormalizedReply`].
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn send(&self, request: &CompletionRequest) -> Result<NormalizedReply, ChatError>;
    fn provider(&self) -> Provider;
    /// Whether an API key is available for this provider.
    fn is_configured(&self) -> bool;
}

// ---------------------------------------------------------------------------
// DynProvider
// ---------------------------------------------------------------------------

pub struct DynProvider(Box<dyn ProviderAdapter>);

impl DynProvider {
    pub fn new(provider: impl ProviderAdapter + 'static) -> Self {
        Self(Box::new(provider))
    }

    pub async fn send(&self, request: &CompletionRequest) -> Result<NormalizedReply, ChatError> {
        self.0.send(request).await
    }

    pub fn provider(&self) -> Provider {
        self.0.provider()
    }

    pub fn is_configured(&self) -> bool {
        self.0.is_configured()
    }
}

// ---------------------------------------------------------------------------
// Shared error mapping
// ---------------------------------------------------------------------------

pub(crate) fn missing_credential(provider: Provider, env_var: &str) -> ChatError {
    ChatError::Upstream {
        provider: provider.to_string(),
        status: Some(503),
        message: format!("{env_var} is not configured"),
    }
}

pub(crate) fn map_send_error(
    provider: Provider,
    err: reqwest::Error,
    timeout: Option<Duration>,
) -> ChatError {
    if err.is_timeout() {
        return ChatError::Timeout {
            provider: provider.to_string(),
            timeout_ms: timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
        };
    }
    ChatError::Transport {
        provider: provider.to_string(),
        message: err.to_string(),
    }
}

pub(crate) fn map_status_error(provider: Provider, status: reqwest::StatusCode, body: &str) -> ChatError {
    ChatError::Upstream {
        provider: provider.to_string(),
        status: Some(status.as_u16()),
        message: extract_error_message(body),
    }
}

/// Both providers report failures as `{"error": {"message": ...}}`.
pub(crate) fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string())
}

pub(crate) fn malformed_payload(provider: Provider, detail: impl Into<String>) -> ChatError {
    ChatError::Upstream {
        provider: provider.to_string(),
        status: None,
        message: detail.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
