use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::VlmError;

/// Marker text for a user turn that exists only to carry a screenshot.
pub const IMAGE_PLACEHOLDER: &str = "<image>";

/// `[width_factor, height_factor]` used when the model does not override it.
pub const DEFAULT_FACTORS: Factors = [1000, 1000];

pub const IMAGE_FACTOR: u64 = 28;
pub const MIN_PIXELS: u64 = 100 * IMAGE_FACTOR * IMAGE_FACTOR;
pub const MAX_PIXELS: u64 = 1350 * IMAGE_FACTOR * IMAGE_FACTOR;
pub const MAX_PIXELS_V1_0: u64 = 1350 * IMAGE_FACTOR * IMAGE_FACTOR;
pub const MAX_PIXELS_V1_5: u64 = 16384 * IMAGE_FACTOR * IMAGE_FACTOR;
pub const MAX_PIXELS_DOUBAO: u64 = 2700 * IMAGE_FACTOR * IMAGE_FACTOR;

pub type Factors = [u32; 2];

/// Backend identity as reported in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiChat,
    OpenAiResponses,
    Anthropic,
    Ollama,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::OpenAiChat => "OpenAI",
            ProviderKind::OpenAiResponses => "OpenAI Responses",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Ollama => "Ollama",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelVersion {
    #[default]
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.5")]
    V1_5,
    #[serde(rename = "doubao-1.5-15B")]
    Doubao15_15B,
    #[serde(rename = "doubao-1.5-20B")]
    Doubao15_20B,
}

impl ModelVersion {
    /// Pixel budget screenshots are resized to before they reach the model.
    pub fn max_pixels(self) -> u64 {
        match self {
            ModelVersion::V1_5 => MAX_PIXELS_V1_5,
            ModelVersion::Doubao15_15B | ModelVersion::Doubao15_20B => MAX_PIXELS_DOUBAO,
            ModelVersion::V1_0 => MAX_PIXELS_V1_0,
        }
    }

    /// Output-token ceiling when the configuration leaves it unset.
    pub fn default_max_tokens(self) -> u32 {
        match self {
            ModelVersion::V1_5 => 65535,
            _ => 1000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModelVersion::V1_0 => "1.0",
            ModelVersion::V1_5 => "1.5",
            ModelVersion::Doubao15_15B => "doubao-1.5-15B",
            ModelVersion::Doubao15_20B => "doubao-1.5-20B",
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelVersion {
    type Err = VlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" | "V1_0" => Ok(ModelVersion::V1_0),
            "1.5" | "V1_5" => Ok(ModelVersion::V1_5),
            "doubao-1.5-15B" => Ok(ModelVersion::Doubao15_15B),
            "doubao-1.5-20B" => Ok(ModelVersion::Doubao15_20B),
            other => Err(VlmError::Config(format!("unknown model version '{other}'"))),
        }
    }
}

// ── Backend-agnostic conversation ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[serde(alias = "user")]
    Human,
    #[serde(alias = "assistant")]
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }

    pub fn is_image_placeholder(&self) -> bool {
        self.role == Role::Human && self.content.trim() == IMAGE_PLACEHOLDER
    }
}

/// Encoded image as a data URI, e.g. `data:image/png;base64,iVBOR...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageAttachment(pub String);

impl ImageAttachment {
    pub fn new(data_uri: impl Into<String>) -> Self {
        Self(data_uri.into())
    }

    /// Wrap raw base64 with its media type.
    pub fn from_base64(media_type: &str, data: &str) -> Self {
        Self(format!("data:{media_type};base64,{data}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_data_uri(&self) -> bool {
        self.0.starts_with("data:image/")
    }

    /// Media type embedded in the data URI header, `image/png` when absent.
    pub fn media_type(&self) -> &str {
        self.0
            .strip_prefix("data:")
            .and_then(|rest| rest.split([';', ',']).next())
            .filter(|m| !m.is_empty())
            .unwrap_or("image/png")
    }

    /// Base64 payload after the first comma; the whole string if there is no header.
    pub fn base64_data(&self) -> &str {
        match self.0.split_once(',') {
            Some((_, data)) => data,
            None => &self.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenContext {
    pub width: u32,
    pub height: u32,
}

/// Everything one `invoke` needs. Built fresh per call.
#[derive(Debug, Clone, Default)]
pub struct InvokeParams {
    pub conversations: Vec<ConversationTurn>,
    pub images: Vec<ImageAttachment>,
    pub screen_context: ScreenContext,
    pub scale_factor: f64,
    pub model_version: ModelVersion,
    pub headers: Option<HashMap<String, String>>,
    pub previous_response_id: Option<String>,
    pub signal: Option<CancellationToken>,
}

/// One structured action recovered from the raw prediction.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PredictionParsed {
    pub reflection: Option<String>,
    pub thought: String,
    pub action_type: String,
    pub action_inputs: ActionInputs,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionInputs {
    /// Normalized `[x1, y1, x2, y2]` ratios of the screen.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_box: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_box: Option<[f64; 4]>,
    /// Center of `start_box` in screen pixels (already multiplied by the scale factor).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_coords: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_coords: Option<[f64; 2]>,
    /// Remaining string arguments, e.g. `content`, `key`, `direction`.
    #[serde(flatten)]
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InvokeOutput {
    pub prediction: String,
    pub parsed_predictions: Vec<PredictionParsed>,
    pub cost_time: u64,
    pub cost_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

/// What an adapter's network stage hands back before action parsing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawPrediction {
    pub prediction: String,
    pub cost_time: u64,
    pub cost_tokens: u64,
    pub response_id: Option<String>,
}

// ── Chat-completions wire shape ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    /// Whether any content part is an image.
    pub fn has_image(&self) -> bool {
        match &self.content {
            MessageContent::Text(_) => false,
            MessageContent::Parts(parts) => parts
                .iter()
                .any(|p| matches!(p, ContentPart::ImageUrl { .. })),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_parts() {
        let img = ImageAttachment::new("data:image/jpeg;base64,AAAA");
        assert!(img.is_data_uri());
        assert_eq!(img.media_type(), "image/jpeg");
        assert_eq!(img.base64_data(), "AAAA");

        let bare = ImageAttachment::new("AAAA");
        assert_eq!(bare.media_type(), "image/png");
        assert_eq!(bare.base64_data(), "AAAA");
    }

    #[test]
    fn version_budgets() {
        assert_eq!(ModelVersion::default(), ModelVersion::V1_0);
        assert_eq!(ModelVersion::V1_0.max_pixels(), 1_058_400);
        assert_eq!(ModelVersion::V1_5.default_max_tokens(), 65535);
        assert_eq!(ModelVersion::Doubao15_20B.default_max_tokens(), 1000);
        assert_eq!("V1_5".parse::<ModelVersion>().unwrap(), ModelVersion::V1_5);
        assert!("2.0".parse::<ModelVersion>().is_err());
    }

    #[test]
    fn role_accepts_chat_aliases() {
        let turn: ConversationTurn =
            serde_json::from_str(r#"{"role":"user","content":"go"}"#).unwrap();
        assert_eq!(turn.role, Role::Human);
        let turn: ConversationTurn =
            serde_json::from_str(r#"{"role":"assistant","content":"ok"}"#).unwrap();
        assert_eq!(turn.role, Role::Ai);
    }
}
