//! Unauthenticated liveness routes.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::AppState;
use parlor_llm::Provider;

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Server is running",
        "timestamp": Utc::now().to_rfc3339(),
        "env": {
            "openai_key_exists": state.llm.is_configured(Provider::OpenAi),
            "anthropic_key_exists": state.llm.is_configured(Provider::Anthropic),
            "auth_configured": state.verifier.is_enabled(),
        }
    }))
}

/// `GET /api/test`
pub async fn api_test(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "API is working",
        "env": { "openai_key_exists": state.llm.is_configured(Provider::OpenAi) }
    }))
}
