//! `POST /api/chat` and `GET /api/models`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::AppState;
use parlor_llm::{ChatMessage, Provider};
use parlor_types::ChatError;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Request body. `messages` is canonical; the legacy `message` string is
/// accepted as a single user turn. When both are present `messages` wins.
#[derive(Debug, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub model: &'static str,
}

/// A request that passed validation.
#[derive(Debug, PartialEq)]
pub struct ValidatedChat {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn validate(self) -> Result<ValidatedChat, ChatError> {
        let messages = match (self.messages, self.message) {
            (Some(messages), _) if !messages.is_empty() => messages,
            (_, Some(message)) if !message.trim().is_empty() => vec![ChatMessage::user(message)],
            _ => return Err(ChatError::Validation("Message is required".to_string())),
        };

        if let Some(index) = messages.iter().position(|m| m.content.trim().is_empty()) {
            return Err(ChatError::Validation(format!(
                "Message {index} has empty content"
            )));
        }

        Ok(ValidatedChat {
            messages,
            model: self.model.filter(|m| !m.trim().is_empty()),
            temperature: self.temperature,
        })
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn chat(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "chat",
        %request_id,
        subject = %identity.subject,
        model = tracing::field::Empty,
    );

    async move {
        let Json(body) = payload.map_err(|rejection| {
            ChatError::Validation(format!("Invalid request body: {}", rejection.body_text()))
        })?;
        let chat = body.validate()?;

        tracing::debug!(
            requested_model = chat.model.as_deref().unwrap_or("<default>"),
            turns = chat.messages.len(),
            "chat request validated"
        );

        let completion = state
            .llm
            .complete(chat.model.as_deref(), chat.messages, chat.temperature)
            .await?;
        tracing::Span::current().record("model", completion.model.id);

        Ok::<_, ApiError>(Json(ChatResponse {
            reply: completion.reply.text,
            model: completion.model.id,
        }))
    }
    .instrument(span)
    .await
}

#[derive(Debug, Serialize)]
pub struct ModelSummary {
    pub id: &'static str,
    pub provider: Provider,
    pub max_output_tokens: u32,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub default: &'static str,
    pub models: Vec<ModelSummary>,
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let registry = state.llm.registry();
    let models = registry
        .models()
        .iter()
        .map(|m| ModelSummary {
            id: m.id,
            provider: m.provider,
            max_output_tokens: m.max_output_tokens,
            available: state.llm.is_configured(m.provider),
        })
        .collect();

    Json(ModelsResponse {
        default: registry.default_model().id,
        models,
    })
}
