use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{VlmError, VlmResult};
use crate::llm::action_parser::{ActionParser, UiTarsActionParser};
use crate::llm::image::{resize_all, ImageResizer, PixelBudgetResizer};
use crate::llm::types::{Factors, ImageAttachment, InvokeOutput, InvokeParams, ProviderKind};

/// Unified VLM backend contract. Every adapter implements this trait.
///
/// `invoke` takes `&mut self`: calls against one adapter are serialized by
/// the borrow checker, which is what keeps continuation state consistent.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Model identifier sent to the backend.
    fn model_name(&self) -> &str;

    /// `[width_factor, height_factor]` handed to the action parser.
    fn factors(&self) -> Factors;

    /// Whether the adapter chains requests through server-side continuation ids.
    fn uses_responses_api(&self) -> bool;

    fn supports_vision(&self) -> bool;

    /// Drop all cross-call session state.
    fn reset(&mut self);

    /// One logical inference: history + screenshots in, prediction + actions out.
    async fn invoke(&mut self, params: InvokeParams) -> VlmResult<InvokeOutput>;
}

/// External functions every adapter delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub resizer: Arc<dyn ImageResizer>,
    pub parser: Arc<dyn ActionParser>,
}

impl Collaborators {
    pub fn new(resizer: Arc<dyn ImageResizer>, parser: Arc<dyn ActionParser>) -> Self {
        Self { resizer, parser }
    }

    /// Refuse images on a text-only backend, otherwise resize them all to `max_pixels`.
    pub async fn prepare_images(
        &self,
        provider: ProviderKind,
        supports_vision: bool,
        images: &[ImageAttachment],
        max_pixels: u64,
    ) -> VlmResult<Vec<ImageAttachment>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        if !supports_vision {
            return Err(VlmError::Capability {
                provider,
                message: "images provided but vision is not supported for this model \
                          (switch provider or disable screenshots)"
                    .into(),
            });
        }
        resize_all(self.resizer.as_ref(), images, max_pixels).await
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            resizer: Arc::new(PixelBudgetResizer),
            parser: Arc::new(UiTarsActionParser),
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
