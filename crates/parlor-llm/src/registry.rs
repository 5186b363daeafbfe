use serde::Serialize;

use crate::Provider;

// ---------------------------------------------------------------------------
// ModelConfig
// ---------------------------------------------------------------------------

/// A public model id bound to its provider, upstream name, and token ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelConfig {
    pub id: &'static str,
    pub provider: Provider,
    pub upstream_model: &'static str,
    /// Output token ceiling passed to the adapter as a hint.
    pub max_output_tokens: u32,
}

const DEFAULT_MODEL_ID: &str = "gpt-4o-mini";

#[rustfmt::skip]
const MODEL_TABLE: &[ModelConfig] = &[
    // OpenAI
    model("o3",                Provider::OpenAi,    "o3",                         100_000),
    model("o3-mini",           Provider::OpenAi,    "o3-mini",                    65_536),
    model("gpt-4.1",           Provider::OpenAi,    "gpt-4.1",                    32_768),
    model("gpt-4.1-mini",      Provider::OpenAi,    "gpt-4.1-mini",               16_384),
    model("o1",                Provider::OpenAi,    "o1",                         32_768),
    model("o1-mini",           Provider::OpenAi,    "o1-mini",                    16_384),
    model("gpt-4o",            Provider::OpenAi,    "gpt-4o",                     4_096),
    model("gpt-4o-mini",       Provider::OpenAi,    "gpt-4o-mini",                16_384),
    model("gpt-3.5-turbo",     Provider::OpenAi,    "gpt-3.5-turbo",              4_096),
    // Anthropic
    model("claude-4-sonnet",   Provider::Anthropic, "claude-sonnet-4-20250514",   64_000),
    model("claude-4-opus",     Provider::Anthropic, "claude-opus-4-20250514",     32_000),
    model("claude-3.7-sonnet", Provider::Anthropic, "claude-3-7-sonnet-20250219", 64_000),
    model("claude-3-5-sonnet", Provider::Anthropic, "claude-3-5-sonnet-20241022", 4_096),
    model("claude-3-5-haiku",  Provider::Anthropic, "claude-3-5-haiku-20241022",  4_096),
    model("claude-3-opus",     Provider::Anthropic, "claude-3-opus-20240229",     4_096),
];

const fn model(
    id: &'static str,
    provider: Provider,
    upstream_model: &'static str,
    max_output_tokens: u32,
) -> ModelConfig {
    ModelConfig {
        id,
        provider,
        upstream_model,
        max_output_tokens,
    }
}

// ---------------------------------------------------------------------------
// ModelRegistry
// ---------------------------------------------------------------------------

/// Read-only lookup over the compiled-in model table.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: &'static [ModelConfig],
    default_index: usize,
}

impl ModelRegistry {
    pub fn new() -> Self {
        let default_index = MODEL_TABLE
            .iter()
            .position(|m| m.id == DEFAULT_MODEL_ID)
            .unwrap_or(0);
        Self {
            models: MODEL_TABLE,
            default_index,
        }
    }

    /// Resolve a requested model id. Absent or unknown ids fall back to the
    /// default model; resolution never fails.
    pub fn resolve(&self, model_id: Option<&str>) -> &ModelConfig {
        match model_id.and_then(|id| self.lookup(id)) {
            Some(config) => config,
            None => {
                if let Some(id) = model_id {
                    tracing::debug!(requested = id, fallback = DEFAULT_MODEL_ID, "unknown model id");
                }
                self.default_model()
            }
        }
    }

    pub fn lookup(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.id == model_id)
    }

    pub fn default_model(&self) -> &ModelConfig {
        &self.models[self.default_index]
    }

    /// All configured models in table order.
    pub fn models(&self) -> &[ModelConfig] {
        self.models
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
