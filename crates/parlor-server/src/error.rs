//! HTTP mapping for [`ChatError`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use parlor_types::ChatError;

pub const GENERIC_FAILURE: &str = "Failed to get response from AI model";

/// Wraps a [`ChatError`] and decides what the client is allowed to see.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Message sent to the client. Internal detail never leaves the server.
    pub fn client_message(&self) -> String {
        match &self.0 {
            ChatError::Validation(msg) | ChatError::Configuration(msg) => msg.clone(),
            ChatError::MissingToken => {
                "Unauthorized: No token provided or malformed token.".to_string()
            }
            ChatError::InvalidToken(_) => "Forbidden: Invalid token.".to_string(),
            ChatError::Upstream { message, .. } => format!("Model Error: {message}"),
            ChatError::Timeout { .. } => {
                "Model Error: The model took too long to respond.".to_string()
            }
            ChatError::Transport { .. } | ChatError::Other(_) => GENERIC_FAILURE.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = status.as_u16();
        if self.0.is_auth() {
            tracing::info!(error = %self.0, status = code, "request refused by auth gate");
        } else if self.0.is_upstream() && status.is_server_error() {
            tracing::error!(error = %self.0, status = code, "upstream provider call failed");
        } else if self.0.is_upstream() {
            tracing::warn!(error = %self.0, status = code, "upstream provider rejected request");
        } else if status.is_server_error() {
            tracing::error!(error = %self.0, status = code, "chat request failed");
        } else {
            tracing::warn!(error = %self.0, status = code, "chat request rejected");
        }
        (status, Json(json!({ "error": self.client_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_is_prefixed() {
        let err = ApiError(ChatError::Upstream {
            provider: "openai".into(),
            status: Some(429),
            message: "Rate limit reached".into(),
        });
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(err.client_message(), "Model Error: Rate limit reached");
    }

    #[test]
    fn internal_detail_is_hidden() {
        let err = ApiError(ChatError::Transport {
            provider: "anthropic".into(),
            message: "dns error: api.anthropic.com: secret-internal-host".into(),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.client_message(), GENERIC_FAILURE);

        let err = ApiError(ChatError::Other("panic in parser at line 3".into()));
        assert_eq!(err.client_message(), GENERIC_FAILURE);
    }

    #[test]
    fn auth_messages() {
        assert_eq!(ApiError(ChatError::MissingToken).status(), StatusCode::UNAUTHORIZED);
        let forbidden = ApiError(ChatError::InvalidToken("ExpiredSignature".into()));
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(forbidden.client_message(), "Forbidden: Invalid token.");
    }

    async fn render(err: ChatError) -> (StatusCode, serde_json::Value) {
        let resp = ApiError(err).into_response();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn into_response_renders_each_error_class() {
        let (status, body) = render(ChatError::MissingToken).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized: No token provided or malformed token.");

        let (status, body) = render(ChatError::Upstream {
            provider: "anthropic".into(),
            status: Some(529),
            message: "Overloaded".into(),
        })
        .await;
        assert_eq!(status.as_u16(), 529);
        assert_eq!(body["error"], "Model Error: Overloaded");

        let (status, body) = render(ChatError::Timeout {
            provider: "openai".into(),
            timeout_ms: 120_000,
        })
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "Model Error: The model took too long to respond.");

        let (status, body) = render(ChatError::Other("reqwest builder failed".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], GENERIC_FAILURE);
    }

    #[test]
    fn validation_message_passes_through() {
        let err = ApiError(ChatError::Validation("Message is required".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.client_message(), "Message is required");
    }
}
