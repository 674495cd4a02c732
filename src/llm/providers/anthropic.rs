//! Anthropic Messages API adapter.
//!
//! System turns become the top-level `system` field; each user turn carries at
//! most one screenshot as a base64 image block.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::Instrument;

use crate::config::VlmConfig;
use crate::errors::{VlmError, VlmResult};
use crate::llm::action_parser::finalize;
use crate::llm::normalize::to_anthropic_messages;
use crate::llm::provider::{Collaborators, ProviderAdapter};
use crate::llm::transport::{endpoint, sanitize_for_log, send_json, with_headers};
use crate::llm::types::{
    Factors, InvokeOutput, InvokeParams, ProviderKind, RawPrediction, DEFAULT_FACTORS, MAX_PIXELS,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const DEFAULT_MAX_TOKENS: u32 = 1000;

pub struct AnthropicAdapter {
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    temperature: f64,
    timeout: Duration,
    client: reqwest::Client,
    collaborators: Collaborators,
}

impl std::fmt::Debug for AnthropicAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAdapter")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<REDACTED>")
            .finish()
    }
}

impl AnthropicAdapter {
    pub fn new(config: &VlmConfig, collaborators: Collaborators) -> Self {
        let or_default = |value: &str, default: &str| {
            if value.trim().is_empty() {
                default.to_string()
            } else {
                value.to_string()
            }
        };
        Self {
            base_url: or_default(&config.base_url, ANTHROPIC_API_BASE),
            api_key: config.api_key().map(str::to_string),
            model: or_default(&config.model, DEFAULT_MODEL),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: config.temperature.unwrap_or(0.0),
            timeout: config.timeout(),
            client: reqwest::Client::new(),
            collaborators,
        }
    }

    async fn call_messages_api(
        &self,
        api_key: &str,
        system: Option<String>,
        messages: Vec<Value>,
        params: &InvokeParams,
    ) -> VlmResult<RawPrediction> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        tracing::debug!(
            body = %serde_json::to_string(&sanitize_for_log(&body)).unwrap_or_default(),
            "messages request"
        );

        let request = self
            .client
            .post(endpoint(&self.base_url, "v1/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let request = with_headers(request, params.headers.as_ref());

        let start = Instant::now();
        let json = send_json(self.kind(), request, self.timeout, params.signal.as_ref()).await?;

        let prediction = json["content"][0]["text"].as_str().unwrap_or("");
        if prediction.is_empty() {
            return Err(VlmError::EmptyResponse {
                provider: self.kind(),
                detail: format!("no text content (stop_reason {})", json["stop_reason"]),
            });
        }
        let usage = &json["usage"];
        let cost_tokens = usage["input_tokens"].as_u64().unwrap_or(0)
            + usage["output_tokens"].as_u64().unwrap_or(0);

        Ok(RawPrediction {
            prediction: prediction.to_string(),
            cost_time: start.elapsed().as_millis() as u64,
            cost_tokens,
            response_id: None,
        })
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn factors(&self) -> Factors {
        DEFAULT_FACTORS
    }

    fn uses_responses_api(&self) -> bool {
        false
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn reset(&mut self) {}

    async fn invoke(&mut self, params: InvokeParams) -> VlmResult<InvokeOutput> {
        let span = tracing::info_span!(
            "invoke",
            provider = %self.kind(),
            model = %self.model,
            request_id = %uuid::Uuid::new_v4(),
        );
        async {
            tracing::info!(
                screen_context = ?params.screen_context,
                scale_factor = params.scale_factor,
                "invoke"
            );

            let api_key = self
                .api_key
                .as_deref()
                .ok_or_else(|| VlmError::Config("Anthropic API key is required".into()))?;

            let images = self
                .collaborators
                .prepare_images(self.kind(), self.supports_vision(), &params.images, MAX_PIXELS)
                .await?;
            let (system, messages) = to_anthropic_messages(&params.conversations, &images);

            let raw = self
                .call_messages_api(api_key, system, messages, &params)
                .await
                .inspect_err(|e| tracing::error!(error = %e, "invoke failed"))?;
            tracing::info!(cost_ms = raw.cost_time, "[cost]");

            finalize(
                self.collaborators.parser.as_ref(),
                self.kind(),
                raw,
                self.factors(),
                params.screen_context,
                params.scale_factor,
                params.model_version,
            )
        }
        .instrument(span)
        .await
    }
}
