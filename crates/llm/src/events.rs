use serde::Deserialize;

/// Provider-agnostic stream payload handed to the chat layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One incremental piece of generated text.
    Fragment(String),
    /// Terminal signal; the response is complete.
    Done { finish_reason: Option<String> },
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error(_))
    }
}

/// One `data:` payload of a streamed chat completion.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default, alias = "finishReason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// Maps the first choice into events: text first, then the finish signal.
    ///
    /// Empty deltas (the role-only opener, keep-alives) produce nothing.
    pub fn into_events(self) -> Vec<StreamEvent> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Vec::new();
        };

        let mut events = Vec::with_capacity(2);
        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            events.push(StreamEvent::Fragment(content));
        }
        if let Some(finish_reason) = choice.finish_reason {
            events.push(StreamEvent::Done {
                finish_reason: Some(finish_reason),
            });
        }
        events
    }
}
