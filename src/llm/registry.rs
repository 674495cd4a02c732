use async_trait::async_trait;

use crate::config::{VlmConfig, VlmProvider};
use crate::errors::VlmResult;
use crate::llm::provider::{Collaborators, ProviderAdapter};
use crate::llm::providers::anthropic::AnthropicAdapter;
use crate::llm::providers::ollama::OllamaAdapter;
use crate::llm::providers::openai_compatible::{OpenAiChatAdapter, OpenAiSettings};
use crate::llm::providers::openai_responses::OpenAiResponsesAdapter;
use crate::llm::types::{Factors, InvokeOutput, InvokeParams, ProviderKind};

/// The closed set of backends. Exactly one is chosen per configuration.
pub enum Adapter {
    OpenAiChat(OpenAiChatAdapter),
    OpenAiResponses(OpenAiResponsesAdapter),
    Anthropic(AnthropicAdapter),
    Ollama(OllamaAdapter),
}

impl Adapter {
    /// Pick the adapter for `config`.
    ///
    /// `openai` goes to the responses adapter when `use_responses_api` is set,
    /// otherwise to chat completions.
    pub fn from_config(config: &VlmConfig, collaborators: Collaborators) -> Self {
        let adapter = match config.provider {
            VlmProvider::Anthropic => Adapter::Anthropic(AnthropicAdapter::new(config, collaborators)),
            VlmProvider::Ollama => Adapter::Ollama(OllamaAdapter::new(config, collaborators)),
            VlmProvider::OpenAi if config.use_responses_api => Adapter::OpenAiResponses(
                OpenAiResponsesAdapter::new(OpenAiSettings::from_config(config), collaborators),
            ),
            VlmProvider::OpenAi => Adapter::OpenAiChat(OpenAiChatAdapter::new(
                OpenAiSettings::from_config(config),
                collaborators,
            )),
        };
        tracing::info!(
            provider = %config.provider,
            adapter = %adapter.kind(),
            model = %adapter.model_name(),
            "adapter selected"
        );
        adapter
    }

    fn inner(&self) -> &dyn ProviderAdapter {
        match self {
            Adapter::OpenAiChat(a) => a,
            Adapter::OpenAiResponses(a) => a,
            Adapter::Anthropic(a) => a,
            Adapter::Ollama(a) => a,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn ProviderAdapter {
        match self {
            Adapter::OpenAiChat(a) => a,
            Adapter::OpenAiResponses(a) => a,
            Adapter::Anthropic(a) => a,
            Adapter::Ollama(a) => a,
        }
    }
}

#[async_trait]
impl ProviderAdapter for Adapter {
    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }

    fn model_name(&self) -> &str {
        self.inner().model_name()
    }

    fn factors(&self) -> Factors {
        self.inner().factors()
    }

    fn uses_responses_api(&self) -> bool {
        self.inner().uses_responses_api()
    }

    fn supports_vision(&self) -> bool {
        self.inner().supports_vision()
    }

    fn reset(&mut self) {
        self.inner_mut().reset()
    }

    async fn invoke(&mut self, params: InvokeParams) -> VlmResult<InvokeOutput> {
        self.inner_mut().invoke(params).await
    }
}
