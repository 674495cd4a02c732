use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::Instrument;

use crate::config::VlmConfig;
use crate::errors::{VlmError, VlmResult};
use crate::llm::action_parser::finalize;
use crate::llm::normalize::to_chat_messages;
use crate::llm::provider::{Collaborators, ProviderAdapter};
use crate::llm::transport::{endpoint, sanitize_for_log, send_json, with_headers};
use crate::llm::types::{
    ChatMessage, Factors, InvokeOutput, InvokeParams, ModelVersion, ProviderKind, RawPrediction,
    DEFAULT_FACTORS,
};

const DEFAULT_TEMPERATURE: f64 = 0.0;
const DEFAULT_TOP_P: f64 = 0.7;

/// Settings shared by both OpenAI-compatible adapters.
#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: f64,
    pub top_p: f64,
    pub timeout: Duration,
}

impl OpenAiSettings {
    pub fn from_config(config: &VlmConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key().map(str::to_string),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: config.top_p.unwrap_or(DEFAULT_TOP_P),
            timeout: config.timeout(),
        }
    }

    pub fn model_name(&self) -> &str {
        if self.model.is_empty() {
            "unknown"
        } else {
            &self.model
        }
    }

    /// Configured ceiling, else the model-version default.
    pub fn max_tokens_for(&self, version: ModelVersion) -> u32 {
        self.max_tokens.unwrap_or_else(|| version.default_max_tokens())
    }

    /// The key, or a configuration error raised before anything is sent.
    pub fn require_api_key(&self, provider: ProviderKind) -> VlmResult<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| VlmError::Config(format!("{provider} API key is required")))
    }
}

/// Chat-completions backend: one non-streaming request per call, no session state.
pub struct OpenAiChatAdapter {
    settings: OpenAiSettings,
    client: reqwest::Client,
    collaborators: Collaborators,
}

impl OpenAiChatAdapter {
    pub fn new(settings: OpenAiSettings, collaborators: Collaborators) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
            collaborators,
        }
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        params: &InvokeParams,
    ) -> VlmResult<RawPrediction> {
        let api_key = self.settings.require_api_key(self.kind())?;
        let body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages,
            "stream": false,
            "seed": null,
            "stop": null,
            "frequency_penalty": null,
            "presence_penalty": null,
            "max_tokens": self.settings.max_tokens_for(params.model_version),
            "temperature": self.settings.temperature,
            "top_p": self.settings.top_p,
            "thinking": { "type": "disabled" },
        });

        tracing::debug!(
            body = %serde_json::to_string(&sanitize_for_log(&body)).unwrap_or_default(),
            "request body (sanitized, base64 omitted)"
        );

        let request = self
            .client
            .post(endpoint(&self.settings.base_url, "chat/completions"))
            .bearer_auth(api_key)
            .json(&body);
        let request = with_headers(request, params.headers.as_ref());

        let start = Instant::now();
        let json = send_json(
            self.kind(),
            request,
            self.settings.timeout,
            params.signal.as_ref(),
        )
        .await?;

        Ok(parse_chat_completion(&json, start.elapsed().as_millis() as u64))
    }
}

/// First choice's text and total usage from a chat-completions body.
pub fn parse_chat_completion(json: &Value, cost_time: u64) -> RawPrediction {
    let prediction = json["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or("")
        .to_string();
    let cost_tokens = json["usage"]["total_tokens"].as_u64().unwrap_or(0);

    tracing::info!(
        content_len = prediction.len(),
        cost_tokens,
        "chat completion received"
    );

    RawPrediction {
        prediction,
        cost_time,
        cost_tokens,
        response_id: None,
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiChatAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiChat
    }

    fn model_name(&self) -> &str {
        self.settings.model_name()
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
            model = %self.model_name(),
            request_id = %uuid::Uuid::new_v4(),
        );
        async {
            tracing::info!(
                screen_context = ?params.screen_context,
                scale_factor = params.scale_factor,
                version = %params.model_version,
                responses_api = false,
                "invoke"
            );

            let images = self
                .collaborators
                .prepare_images(
                    self.kind(),
                    self.supports_vision(),
                    &params.images,
                    params.model_version.max_pixels(),
                )
                .await?;
            let messages = to_chat_messages(&params.conversations, &images);

            let start = Instant::now();
            let raw = self.complete(messages, &params).await;
            tracing::info!(cost_ms = start.elapsed().as_millis() as u64, "[cost]");
            let raw = raw.inspect_err(|e| tracing::error!(error = %e, "invoke failed"))?;

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VlmProvider;

    #[test]
    fn max_tokens_follow_version_unless_configured() {
        let config = VlmConfig::new(VlmProvider::OpenAi, "https://x.test/v1", "ui-tars");
        let mut settings = OpenAiSettings::from_config(&config);
        assert_eq!(settings.max_tokens_for(ModelVersion::V1_5), 65535);
        assert_eq!(settings.max_tokens_for(ModelVersion::V1_0), 1000);
        settings.max_tokens = Some(2048);
        assert_eq!(settings.max_tokens_for(ModelVersion::V1_5), 2048);
        assert_eq!(settings.temperature, 0.0);
        assert_eq!(settings.top_p, 0.7);
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let config = VlmConfig::new(VlmProvider::OpenAi, "https://x.test/v1", "");
        let settings = OpenAiSettings::from_config(&config);
        assert_eq!(settings.model_name(), "unknown");
        assert!(matches!(
            settings.require_api_key(ProviderKind::OpenAiChat),
            Err(VlmError::Config(_))
        ));
    }

    #[test]
    fn completion_body_is_decoded() {
        let json = serde_json::json!({
            "choices": [{ "message": { "content": "Action: wait()" } }],
            "usage": { "total_tokens": 42 }
        });
        let raw = parse_chat_completion(&json, 7);
        assert_eq!(raw.prediction, "Action: wait()");
        assert_eq!(raw.cost_tokens, 42);
        assert_eq!(raw.cost_time, 7);

        assert_eq!(parse_chat_completion(&serde_json::json!({}), 0).prediction, "");
    }
}
