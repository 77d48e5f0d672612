//! The `Provider` capability trait (§4.1, §3).
//!
//! Generalizes this codebase's `ClientWrapper` trait (a single
//! request/response + streaming chat abstraction over one vendor) to the
//! spec's wider `Provider` contract: a provider declares which *services* it
//! supports (`llm`, `vision`, `tts`, `embeddings`, `transcription`,
//! `translation`, `image`) and the core calls only the declared ones. This
//! directly replaces the redesign-flagged `Providers.__getattr__` dynamic
//! dispatch (§9): callers never probe for a method that might not exist,
//! they check [`Provider::services`] up front, and any call to an
//! undeclared capability returns [`ProviderError::Unsupported`] rather than
//! panicking or erroring deep inside a dynamic dispatch path.
//!
//! Concrete provider back-ends (OpenAI-style HTTP clients, local model
//! runners) are explicitly out of core scope (§1); this module only defines
//! the capability surface the rest of the pipeline consumes.

use crate::error::ProviderError;
use async_trait::async_trait;
use futures_util::stream::Stream;
use std::pin::Pin;
use std::time::Duration;

/// The set of capabilities a provider may declare (§2, §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    Llm,
    Vision,
    Tts,
    Embeddings,
    Transcription,
    Translation,
    Image,
}

impl Service {
    /// The agent-settings key that names the preferred provider for this
    /// service, e.g. `vision_provider` for [`Service::Vision`] (§4.1 step 2).
    /// The `llm` service is the odd one out: its setting key is plain
    /// `provider`, not `llm_provider`.
    pub fn settings_key(&self) -> &'static str {
        match self {
            Service::Llm => "provider",
            Service::Vision => "vision_provider",
            Service::Tts => "tts_provider",
            Service::Embeddings => "embeddings_provider",
            Service::Transcription => "transcription_provider",
            Service::Translation => "translation_provider",
            Service::Image => "image_provider",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Llm => "llm",
            Service::Vision => "vision",
            Service::Tts => "tts",
            Service::Embeddings => "embeddings",
            Service::Transcription => "transcription",
            Service::Translation => "translation",
            Service::Image => "image",
        }
    }
}

/// Message role in a prompt sent to a provider's `inference` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Token accounting reported (or estimated) for a single provider call.
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// A single incremental delta from a streaming `inference` call.
#[derive(Debug, Clone)]
pub struct TextDelta {
    pub content: String,
    pub finish_reason: Option<String>,
}

/// Stream of text deltas yielded by a streaming `inference` call.
pub type TextDeltaStream =
    Pin<Box<dyn Stream<Item = Result<TextDelta, ProviderError>> + Send>>;

/// The outcome of an `inference` call: either the full text (non-streaming)
/// or a stream of deltas (§4.1).
pub enum InferenceOutput {
    Text(String),
    Stream(TextDeltaStream),
}

/// Parameters for one `inference` call (§4.1 provider contract).
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub prompt: String,
    pub input_tokens: usize,
    /// Image references/bytes for multimodal prompts; empty when not used.
    pub images: Vec<Vec<u8>>,
    pub stream: bool,
    /// When true and the agent declares a coding/smart model override, the
    /// provider should swap its model parameter accordingly without
    /// changing the provider itself (§4.1 step 3).
    pub use_smartest: bool,
    /// Model override, resolved by `ProviderRouter` from agent settings
    /// (`AI_MODEL`, or the smart override when `use_smartest` is set).
    pub model: Option<String>,
}

/// The capability surface the core consumes from a concrete provider
/// back-end (§4.1).
///
/// All methods besides [`Provider::services`], [`Provider::max_tokens`],
/// and [`Provider::is_configured`] are optional per declared service: the
/// default implementations return [`ProviderError::Unsupported`] so an
/// adapter only needs to override what it actually declares.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name used in routing decisions and error messages.
    fn name(&self) -> &str;

    /// Services this provider instance declares (§3).
    fn services(&self) -> &[Service];

    /// Maximum context window this provider accepts, in tokens.
    fn max_tokens(&self) -> usize;

    /// Whether this provider has everything it needs (API keys, etc.) to be
    /// called. A misconfigured/unconfigured provider is excluded from the
    /// router's candidate set and, if selected anyway, fails fast with
    /// [`ProviderError::Fatal`] rather than at an arbitrary call site (§9).
    fn is_configured(&self) -> bool;

    /// Minimum spacing `ProviderRouter` enforces between dispatches to this
    /// provider on behalf of the same agent (§4.1 step 4). Defaults to no
    /// enforced spacing.
    fn wait_between_requests(&self) -> Duration {
        Duration::ZERO
    }

    /// Backoff slept by `ProviderRouter` after a transient failure before
    /// retrying this provider (§4.1 step 5).
    fn wait_after_failure(&self) -> Duration {
        Duration::ZERO
    }

    /// Number of consecutive transient failures tolerated before the router
    /// rotates to the next candidate (§3, §4.1 step 5).
    fn max_failures(&self) -> u32 {
        3
    }

    /// Run a chat/completion inference call (`llm` service).
    async fn inference(&self, request: InferenceRequest) -> Result<InferenceOutput, ProviderError>;

    /// Compute an embedding vector for `text` (`embeddings` service).
    async fn embeddings(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(self.unsupported(Service::Embeddings))
    }

    /// Synthesize speech audio for `text` (`tts` service).
    async fn text_to_speech(&self, _text: &str) -> Result<Vec<u8>, ProviderError> {
        Err(self.unsupported(Service::Tts))
    }

    /// Transcribe `audio` to text (`transcription` service).
    async fn transcribe(&self, _audio: &[u8]) -> Result<String, ProviderError> {
        Err(self.unsupported(Service::Transcription))
    }

    /// Translate `audio` to text in another language (`translation` service).
    async fn translate(&self, _audio: &[u8]) -> Result<String, ProviderError> {
        Err(self.unsupported(Service::Translation))
    }

    /// Generate an image for `prompt`, returning a URL or raw bytes
    /// (`image` service).
    async fn generate_image(&self, _prompt: &str) -> Result<Vec<u8>, ProviderError> {
        Err(self.unsupported(Service::Image))
    }

    /// Helper for default-method bodies above: builds the
    /// [`ProviderError::Unsupported`] a provider should return when a
    /// capability it did not declare is invoked anyway.
    fn unsupported(&self, service: Service) -> ProviderError {
        ProviderError::Unsupported {
            provider: self.name().to_string(),
            service: service.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_key_matches_spec_table() {
        assert_eq!(Service::Llm.settings_key(), "provider");
        assert_eq!(Service::Vision.settings_key(), "vision_provider");
        assert_eq!(Service::Embeddings.settings_key(), "embeddings_provider");
        assert_eq!(Service::Image.settings_key(), "image_provider");
    }

    #[test]
    fn token_usage_computes_total() {
        let usage = TokenUsage::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
    }
}
