use std::sync::Arc;

use crate::config::VlmConfig;
use crate::errors::VlmResult;
use crate::llm::action_parser::ActionParser;
use crate::llm::image::ImageResizer;
use crate::llm::provider::{Collaborators, ProviderAdapter};
use crate::llm::registry::Adapter;
use crate::llm::types::{Factors, InvokeOutput, InvokeParams, ProviderKind};

/// What the agent loop talks to. The backend is fixed at construction.
pub struct VlmModel {
    adapter: Adapter,
}

impl VlmModel {
    /// Build with the default screenshot resizer and action parser.
    pub fn new(config: &VlmConfig) -> Self {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: &VlmConfig, collaborators: Collaborators) -> Self {
        Self {
            adapter: Adapter::from_config(config, collaborators),
        }
    }

    pub fn with_parts(
        config: &VlmConfig,
        resizer: Arc<dyn ImageResizer>,
        parser: Arc<dyn ActionParser>,
    ) -> Self {
        Self::with_collaborators(config, Collaborators::new(resizer, parser))
    }

    pub fn provider(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn use_responses_api(&self) -> bool {
        self.adapter.uses_responses_api()
    }

    /// `[width_factor, height_factor]`
    pub fn factors(&self) -> Factors {
        self.adapter.factors()
    }

    pub fn model_name(&self) -> &str {
        self.adapter.model_name()
    }

    pub fn supports_vision(&self) -> bool {
        self.adapter.supports_vision()
    }

    pub fn reset(&mut self) {
        self.adapter.reset();
    }

    pub async fn invoke(&mut self, params: InvokeParams) -> VlmResult<InvokeOutput> {
        self.adapter.invoke(params).await
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }
}
