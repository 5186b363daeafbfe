//! Model registry and provider adapters for the Parlor chat proxy.
//!
//! Provides the `ProviderAdapter` trait, OpenAI-style and Anthropic-style
//! adapters, the static `ModelRegistry`, and `LlmClient` for routing a
//! resolved model to its adapter.

mod anthropic;
mod client;
mod openai;
mod provider;
mod registry;
mod types;

pub use anthropic::{clamp_temperature, AnthropicAdapter};
pub use client::*;
pub use openai::{is_reasoning_model, OpenAiAdapter, REASONING_MAX_COMPLETION_TOKENS};
pub use provider::{DynProvider, ProviderAdapter};
pub use registry::{ModelConfig, ModelRegistry};
pub use types::*;
