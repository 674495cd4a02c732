use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::Instrument;

use crate::config::VlmConfig;
use crate::errors::{VlmError, VlmResult};
use crate::llm::action_parser::finalize;
use crate::llm::normalize::to_ollama_messages;
use crate::llm::provider::{Collaborators, ProviderAdapter};
use crate::llm::transport::{endpoint, send_json, with_headers};
use crate::llm::types::{
    Factors, InvokeOutput, InvokeParams, ProviderKind, RawPrediction, DEFAULT_FACTORS,
    MAX_PIXELS,
};

const OLLAMA_API_BASE: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "phi3:latest";

/// Local Ollama backend. Text only, no session state.
pub struct OllamaAdapter {
    base_url: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    timeout: Duration,
    client: reqwest::Client,
    collaborators: Collaborators,
}

impl OllamaAdapter {
    pub fn new(config: &VlmConfig, collaborators: Collaborators) -> Self {
        let base_url = if config.base_url.trim().is_empty() {
            OLLAMA_API_BASE.to_string()
        } else {
            config.base_url.clone()
        };
        let model = if config.model.trim().is_empty() {
            DEFAULT_MODEL.to_string()
        } else {
            config.model.clone()
        };
        Self {
            base_url,
            model,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            timeout: config.timeout(),
            client: reqwest::Client::new(),
            collaborators,
        }
    }

    /// Sampling overrides, only the ones that were configured.
    fn options(&self) -> Option<Value> {
        let mut options = serde_json::Map::new();
        if let Some(t) = self.temperature {
            options.insert("temperature".into(), json!(t));
        }
        if let Some(p) = self.top_p {
            options.insert("top_p".into(), json!(p));
        }
        if let Some(n) = self.max_tokens {
            options.insert("num_predict".into(), json!(n));
        }
        (!options.is_empty()).then_some(Value::Object(options))
    }

    async fn call_chat_api(
        &self,
        messages: Vec<Value>,
        params: &InvokeParams,
    ) -> VlmResult<RawPrediction> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(options) = self.options() {
            body["options"] = options;
        }

        let request = self
            .client
            .post(endpoint(&self.base_url, "api/chat"))
            .json(&body);
        let request = with_headers(request, params.headers.as_ref());

        let start = Instant::now();
        let json = send_json(self.kind(), request, self.timeout, params.signal.as_ref()).await?;

        let prediction = json["message"]["content"].as_str().unwrap_or("");
        if prediction.is_empty() {
            return Err(VlmError::EmptyResponse {
                provider: self.kind(),
                detail: format!("no message content (done={})", json["done"]),
            });
        }

        Ok(RawPrediction {
            prediction: prediction.to_string(),
            cost_time: start.elapsed().as_millis() as u64,
            cost_tokens: token_cost(&json, prediction),
            response_id: None,
        })
    }
}

/// Reported eval counts, else roughly four characters per token.
pub fn token_cost(response: &Value, prediction: &str) -> u64 {
    match (
        response["prompt_eval_count"].as_u64(),
        response["eval_count"].as_u64(),
    ) {
        (None, None) => (prediction.chars().count() as u64).div_ceil(4),
        (prompt, eval) => prompt.unwrap_or(0) + eval.unwrap_or(0),
    }
}

#[async_trait]
impl ProviderAdapter for OllamaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
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
        false
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
            self.collaborators
                .prepare_images(self.kind(), self.supports_vision(), &params.images, MAX_PIXELS)
                .await?;

            tracing::info!(
                screen_context = ?params.screen_context,
                scale_factor = params.scale_factor,
                "invoke"
            );

            let messages = to_ollama_messages(&params.conversations);
            let raw = self
                .call_chat_api(messages, &params)
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
