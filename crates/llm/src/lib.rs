use std::sync::Arc;

mod events;
mod model;
mod openai;
mod provider;
mod sse;

pub use events::{ChatCompletionChunk, ChunkChoice, ChunkDelta, StreamEvent};
pub use model::{GptVersion, Model, available_models};
pub use openai::{OPENAI_PROVIDER_ID, OpenAiProvider};
pub use provider::{
    DEFAULT_BASE_URL, LlmProvider, ProviderConfig, ProviderError, ProviderEventStream,
    ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker, Role, StreamRequest,
    make_event_stream,
};
pub use sse::{SseDecoder, SseFrame, StreamAssembler};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.is_empty() {
        config.provider_id = OPENAI_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        OPENAI_PROVIDER_ID => Ok(Arc::new(OpenAiProvider::new(config)?)),
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}
