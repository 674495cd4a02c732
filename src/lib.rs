pub mod config;
pub mod errors;
pub mod llm;
pub mod logging;

pub use config::{AppConfig, VlmConfig, VlmProvider};
pub use errors::{VlmError, VlmResult};
pub use llm::action_parser::{ActionParser, ParseError, ParseRequest, UiTarsActionParser};
pub use llm::image::{ImageResizer, PixelBudgetResizer};
pub use llm::model::VlmModel;
pub use llm::provider::{Collaborators, ProviderAdapter};
pub use llm::types::{
    ConversationTurn, ImageAttachment, InvokeOutput, InvokeParams, ModelVersion,
    PredictionParsed, Role, ScreenContext,
};
pub use tokio_util::sync::CancellationToken;
