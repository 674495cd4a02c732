#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use vlm_gateway::llm::action_parser::{ActionParser, ParseError, ParseRequest};
use vlm_gateway::llm::image::ImageResizer;
use vlm_gateway::llm::provider::Collaborators;
use vlm_gateway::llm::types::{ImageAttachment, PredictionParsed};
use vlm_gateway::{UiTarsActionParser, VlmResult};
use wiremock::{Request, Respond, ResponseTemplate};

pub const PREDICTION: &str = "Thought: open the menu\nAction: click(start_box='(500,500)')";

pub fn screenshot(tag: &str) -> ImageAttachment {
    ImageAttachment::new(format!("data:image/png;base64,{tag}"))
}

/// Passes images through untouched and records every pixel budget it was given.
#[derive(Default)]
pub struct RecordingResizer {
    pub budgets: Mutex<Vec<u64>>,
}

#[async_trait]
impl ImageResizer for RecordingResizer {
    async fn resize(&self, image: &ImageAttachment, max_pixels: u64) -> VlmResult<ImageAttachment> {
        self.budgets.lock().unwrap().push(max_pixels);
        Ok(image.clone())
    }
}

pub struct FailingParser;

impl ActionParser for FailingParser {
    fn parse(&self, _: ParseRequest<'_>) -> Result<Vec<PredictionParsed>, ParseError> {
        Err(ParseError::InvalidAction("boom".into()))
    }
}

pub fn collaborators(resizer: Arc<RecordingResizer>) -> Collaborators {
    Collaborators::new(resizer, Arc::new(UiTarsActionParser))
}

/// Responses-API stub: every POST gets the next id `resp_1`, `resp_2`, ...
pub struct SequentialResponses {
    counter: AtomicUsize,
}

impl SequentialResponses {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Respond for SequentialResponses {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        ResponseTemplate::new(200).set_body_json(json!({
            "id": format!("resp_{n}"),
            "object": "response",
            "output": [{
                "type": "message",
                "role": "assistant",
                "content": [{ "type": "output_text", "text": format!("Thought: step {n}\nAction: wait()") }]
            }],
            "usage": { "total_tokens": 10 * n }
        }))
    }
}

pub fn body(request: &Request) -> Value {
    request.body_json().expect("request body should be JSON")
}
