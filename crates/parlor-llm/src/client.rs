use std::collections::HashMap;
use std::time::Duration;

use parlor_types::ChatError;

use crate::{
    AnthropicAdapter, ChatMessage, CompletionRequest, DynProvider, ModelConfig, ModelRegistry,
    NormalizedReply, OpenAiAdapter, Provider, ProviderAdapter,
};

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

pub trait Middleware: Send + Sync {
    fn before(&self, _model: &ModelConfig, _request: &mut CompletionRequest) {}
    fn after(&self, _model: &ModelConfig, _reply: &mut NormalizedReply) {}
}

// ---------------------------------------------------------------------------
// Built-in middleware: LoggingMiddleware
// ---------------------------------------------------------------------------

pub struct LoggingMiddleware;

impl Middleware for LoggingMiddleware {
    fn before(&self, model: &ModelConfig, request: &mut CompletionRequest) {
        tracing::info!(
            model = model.id,
            provider = %model.provider,
            upstream = %request.upstream_model,
            messages = request.messages.len(),
            "LLM request"
        );
    }

    fn after(&self, model: &ModelConfig, reply: &mut NormalizedReply) {
        tracing::info!(model = model.id, reply_chars = reply.text.chars().count(), "LLM response");
    }
}

// ---------------------------------------------------------------------------
// ProviderSettings
// ---------------------------------------------------------------------------

/// Credentials and endpoints for the upstream providers, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub anthropic_base_url: Option<String>,
    pub timeout: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// A successful dispatch: the model that served it and the normalized reply.
#[derive(Debug, Clone)]
pub struct Completion {
    pub model: ModelConfig,
    pub reply: NormalizedReply,
}

// ---------------------------------------------------------------------------
// LlmClient
// ---------------------------------------------------------------------------

pub struct LlmClient {
    providers: HashMap<Provider, DynProvider>,
    registry: ModelRegistry,
    middleware: Vec<Box<dyn Middleware>>,
}

impl LlmClient {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            registry: ModelRegistry::new(),
            middleware: Vec::new(),
        }
    }

    /// Register both adapters. Missing keys are allowed; calls to that
    /// provider fail at request time instead.
    pub fn from_settings(settings: ProviderSettings) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("parlor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ChatError::Other(format!("Failed to build HTTP client: {e}")))?;

        let mut openai = OpenAiAdapter::new(settings.openai_api_key).with_http_client(http.clone());
        if let Some(url) = settings.openai_base_url {
            openai = openai.with_base_url(url);
        }

        let mut anthropic =
            AnthropicAdapter::new(settings.anthropic_api_key).with_http_client(http);
        if let Some(url) = settings.anthropic_base_url {
            anthropic = anthropic.with_base_url(url);
        }

        if let Some(timeout) = settings.timeout {
            openai = openai.with_timeout(timeout);
            anthropic = anthropic.with_timeout(timeout);
        }

        let mut client = Self::new();
        client.register_provider(openai);
        client.register_provider(anthropic);
        Ok(client)
    }

    pub fn register_provider(&mut self, provider: impl ProviderAdapter + 'static) {
        let tag = provider.provider();
        self.providers.insert(tag, DynProvider::new(provider));
    }

    pub fn with_middleware(mut self, m: impl Middleware + 'static) -> Self {
        self.middleware.push(Box::new(m));
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Whether a registered adapter for `provider` holds a credential.
    pub fn is_configured(&self, provider: Provider) -> bool {
        self.providers
            .get(&provider)
            .map(|p| p.is_configured())
            .unwrap_or(false)
    }

    /// Resolve `model_id`, dispatch to the matching adapter, and return the
    /// normalized reply. Unknown ids use the default model.
    pub async fn complete(
        &self,
        model_id: Option<&str>,
        messages: Vec<ChatMessage>,
        temperature: Option<f64>,
    ) -> Result<Completion, ChatError> {
        let model = self.registry.resolve(model_id).clone();
        let provider = self.resolve_provider(&model)?;

        let mut request = CompletionRequest {
            upstream_model: model.upstream_model.to_string(),
            messages,
            max_output_tokens: model.max_output_tokens,
            temperature,
        };

        for m in &self.middleware {
            m.before(&model, &mut request);
        }

        let mut reply = provider.send(&request).await?;

        for m in &self.middleware {
            m.after(&model, &mut reply);
        }

        Ok(Completion { model, reply })
    }

    fn resolve_provider(&self, model: &ModelConfig) -> Result<&DynProvider, ChatError> {
        self.providers.get(&model.provider).ok_or_else(|| {
            tracing::error!(model = model.id, provider = %model.provider, "no adapter registered");
            ChatError::Configuration("Invalid model specified".to_string())
        })
    }
}

impl Default for LlmClient {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct RecordingProvider {
        tag: Provider,
        seen: Arc<Mutex<Vec<CompletionRequest>>>,
    }

    impl RecordingProvider {
        fn new(tag: Provider) -> (Self, Arc<Mutex<Vec<CompletionRequest>>>) {
            let seen = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    tag,
                    seen: seen.clone(),
                },
                seen,
            )
        }
    }

    #[async_trait]
    impl ProviderAdapter for RecordingProvider {
        async fn send(&self, request: &CompletionRequest) -> Result<NormalizedReply, ChatError> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(NormalizedReply::new(format!("{} says hi", self.tag)))
        }

        fn provider(&self) -> Provider {
            self.tag
        }

        fn is_configured(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn complete_uses_default_model_when_absent() {
        let (openai, seen) = RecordingProvider::new(Provider::OpenAi);
        let mut client = LlmClient::new();
        client.register_provider(openai);

        let completion = client
            .complete(None, vec![ChatMessage::user("hello")], None)
            .await
            .unwrap();

        assert_eq!(completion.model.id, "gpt-4o-mini");
        assert_eq!(completion.reply.text, "openai says hi");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].upstream_model, "gpt-4o-mini");
        assert_eq!(seen[0].max_output_tokens, 16_384);
    }

    #[tokio::test]
    async fn complete_routes_by_provider_tag() {
        let (openai, openai_seen) = RecordingProvider::new(Provider::OpenAi);
        let (anthropic, anthropic_seen) = RecordingProvider::new(Provider::Anthropic);
        let mut client = LlmClient::new();
        client.register_provider(openai);
        client.register_provider(anthropic);

        let completion = client
            .complete(Some("claude-3-5-haiku"), vec![ChatMessage::user("hi")], Some(1.5))
            .await
            .unwrap();

        assert_eq!(completion.reply.text, "anthropic says hi");
        assert!(openai_seen.lock().unwrap().is_empty());
        let seen = anthropic_seen.lock().unwrap();
        assert_eq!(seen[0].upstream_model, "claude-3-5-haiku-20241022");
        // Clamping is the adapter's job; the client passes temperature through.
        assert_eq!(seen[0].temperature, Some(1.5));
    }

    #[tokio::test]
    async fn complete_without_adapter_is_configuration_error() {
        let (openai, _) = RecordingProvider::new(Provider::OpenAi);
        let mut client = LlmClient::new();
        client.register_provider(openai);

        let err = client
            .complete(Some("claude-4-opus"), vec![ChatMessage::user("hi")], None)
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Configuration(ref m) if m == "Invalid model specified"));
        assert_eq!(err.http_status(), 400);
    }

    #[tokio::test]
    async fn middleware_before_after_called() {
        let before_count = Arc::new(AtomicUsize::new(0));
        let after_count = Arc::new(AtomicUsize::new(0));

        struct CountingMiddleware {
            before_count: Arc<AtomicUsize>,
            after_count: Arc<AtomicUsize>,
        }

        impl Middleware for CountingMiddleware {
            fn before(&self, _model: &ModelConfig, _request: &mut CompletionRequest) {
                self.before_count.fetch_add(1, Ordering::Relaxed);
            }
            fn after(&self, _model: &ModelConfig, _reply: &mut NormalizedReply) {
                self.after_count.fetch_add(1, Ordering::Relaxed);
            }
        }

        let (openai, _) = RecordingProvider::new(Provider::OpenAi);
        let mut client = LlmClient::new()
            .with_middleware(LoggingMiddleware)
            .with_middleware(CountingMiddleware {
                before_count: before_count.clone(),
                after_count: after_count.clone(),
            });
        client.register_provider(openai);

        client
            .complete(Some("gpt-4o"), vec![ChatMessage::user("hi")], None)
            .await
            .unwrap();

        assert_eq!(before_count.load(Ordering::Relaxed), 1);
        assert_eq!(after_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn failed_send_skips_after_middleware() {
        struct FailingProvider;

        #[async_trait]
        impl ProviderAdapter for FailingProvider {
            async fn send(&self, _request: &CompletionRequest) -> Result<NormalizedReply, ChatError> {
                Err(ChatError::Upstream {
                    provider: "openai".into(),
                    status: Some(429),
                    message: "slow down".into(),
                })
            }
            fn provider(&self) -> Provider {
                Provider::OpenAi
            }
            fn is_configured(&self) -> bool {
                true
            }
        }

        struct AfterFlag(Arc<AtomicUsize>);
        impl Middleware for AfterFlag {
            fn after(&self, _model: &ModelConfig, _reply: &mut NormalizedReply) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let after = Arc::new(AtomicUsize::new(0));
        let mut client = LlmClient::new().with_middleware(AfterFlag(after.clone()));
        client.register_provider(FailingProvider);

        let err = client
            .complete(None, vec![ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 429);
        assert_eq!(after.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn from_settings_registers_both_providers() {
        let client = LlmClient::from_settings(ProviderSettings {
            openai_api_key: Some("sk-test".into()),
            anthropic_api_key: None,
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        })
        .unwrap();

        assert!(client.is_configured(Provider::OpenAi));
        assert!(!client.is_configured(Provider::Anthropic));
        assert!(client.providers.contains_key(&Provider::Anthropic));
    }
}
