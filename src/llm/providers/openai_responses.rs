//! Responses-API adapter.
//!
//! Only the turns after the last assistant reply are sent; everything before
//! is already held server-side behind the continuation chain. Each input unit
//! is its own request, chained through `previous_response_id`.
//!
//! Continuation ids issued for image-bearing units are remembered together
//! with the index of the conversation's first image turn. When that index
//! moves (the caller's history window dropped the old head screenshot), the
//! oldest remembered id is deleted on the server before new input goes out.

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::Instrument;

use crate::errors::VlmResult;
use crate::llm::action_parser::finalize;
use crate::llm::normalize::{
    head_image_index, input_has_image, last_assistant_index, to_chat_messages, to_responses_input,
};
use crate::llm::provider::{Collaborators, ProviderAdapter};
use crate::llm::providers::openai_compatible::OpenAiSettings;
use crate::llm::session::HeadImageSession;
use crate::llm::transport::{endpoint, sanitize_for_log, send_json, send_status, with_headers};
use crate::llm::types::{
    ChatMessage, Factors, InvokeOutput, InvokeParams, ProviderKind, RawPrediction,
    DEFAULT_FACTORS,
};

pub struct OpenAiResponsesAdapter {
    settings: OpenAiSettings,
    client: reqwest::Client,
    collaborators: Collaborators,
    session: HeadImageSession,
}

impl OpenAiResponsesAdapter {
    pub fn new(settings: OpenAiSettings, collaborators: Collaborators) -> Self {
        Self {
            settings,
            client: reqwest::Client::new(),
            collaborators,
            session: HeadImageSession::new(),
        }
    }

    pub fn session(&self) -> &HeadImageSession {
        &self.session
    }

    async fn release(&self, response_id: &str, params: &InvokeParams) -> VlmResult<()> {
        let api_key = self.settings.require_api_key(self.kind())?;
        let request = self
            .client
            .delete(endpoint(
                &self.settings.base_url,
                &format!("responses/{response_id}"),
            ))
            .bearer_auth(api_key);
        let request = with_headers(request, params.headers.as_ref());
        let deleted = send_status(
            self.kind(),
            request,
            self.settings.timeout,
            params.signal.as_ref(),
        )
        .await?;
        let deleted = deleted.map_or_else(|| "no body".to_string(), |v| v.to_string());
        tracing::info!(response_id, deleted = %deleted, "released stale head-image response");
        Ok(())
    }

    async fn complete(
        &mut self,
        messages: Vec<ChatMessage>,
        params: &InvokeParams,
    ) -> VlmResult<RawPrediction> {
        let api_key = self.settings.require_api_key(self.kind())?.to_string();

        let boundary = last_assistant_index(&messages).map_or(0, |i| i + 1);
        let inputs = to_responses_input(&messages[boundary..]);
        let head_index = head_image_index(&messages);
        tracing::info!(
            boundary,
            units = inputs.len(),
            head_image_index = ?head_index,
            "responses input prepared"
        );

        if let Some(stale) = self.session.take_stale(head_index) {
            tracing::info!(
                response_id = %stale,
                previous_head = ?self.session.image_turn_index(),
                head_image_index = ?head_index,
                "head image slid out of the window"
            );
            self.release(&stale, params).await?;
        }

        let start = Instant::now();
        let max_output_tokens = self.settings.max_tokens_for(params.model_version);
        let mut response_id = params.previous_response_id.clone();
        let mut last: Option<Value> = None;

        for input in inputs {
            let carries_image = input_has_image(&input);
            let mut body = json!({
                "input": [input],
                "model": self.settings.model,
                "temperature": self.settings.temperature,
                "top_p": self.settings.top_p,
                "stream": false,
                "max_output_tokens": max_output_tokens,
                "thinking": { "type": "disabled" },
            });
            if let Some(id) = &response_id {
                body["previous_response_id"] = json!(id);
            }
            tracing::debug!(
                body = %serde_json::to_string(&sanitize_for_log(&body)).unwrap_or_default(),
                previous_response_id = ?response_id,
                "responses request"
            );

            let request = self
                .client
                .post(endpoint(&self.settings.base_url, "responses"))
                .bearer_auth(&api_key)
                .json(&body);
            let request = with_headers(request, params.headers.as_ref());
            let result = send_json(
                self.kind(),
                request,
                self.settings.timeout,
                params.signal.as_ref(),
            )
            .await?;

            response_id = result["id"].as_str().map(str::to_string);
            tracing::info!(response_id = ?response_id, "responses result");

            if let (Some(id), true) = (&response_id, carries_image) {
                self.session.record(head_index, id.clone());
                tracing::debug!(session = ?self.session, "head image session updated");
            }
            last = Some(result);
        }

        let prediction = last.as_ref().map(output_text).unwrap_or_default();
        let cost_tokens = last
            .as_ref()
            .and_then(|r| r["usage"]["total_tokens"].as_u64())
            .unwrap_or(0);

        Ok(RawPrediction {
            prediction,
            cost_time: start.elapsed().as_millis() as u64,
            cost_tokens,
            response_id,
        })
    }
}

/// `output_text` if the backend provides it, otherwise the concatenated
/// `output_text` parts of every output message.
pub fn output_text(response: &Value) -> String {
    if let Some(text) = response["output_text"].as_str() {
        return text.to_string();
    }
    response["output"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["content"].as_array())
                .flatten()
                .filter(|part| part["type"] == "output_text")
                .filter_map(|part| part["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ProviderAdapter for OpenAiResponsesAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAiResponses
    }

    fn model_name(&self) -> &str {
        self.settings.model_name()
    }

    fn factors(&self) -> Factors {
        DEFAULT_FACTORS
    }

    fn uses_responses_api(&self) -> bool {
        true
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn reset(&mut self) {
        tracing::debug!(dropped = self.session.continuation_ids().len(), "session reset");
        self.session.reset();
    }

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
                responses_api = true,
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
