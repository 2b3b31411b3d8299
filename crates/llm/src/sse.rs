use super::events::{ChatCompletionChunk, StreamEvent};

const DONE_SENTINEL: &str = "[DONE]";

/// One decoded `data:` field from an event-stream body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    Done,
}

/// Splits a chunked `text/event-stream` body into frames.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters
/// split across network chunks decode intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let line = self.buffer.drain(..=newline).collect::<Vec<_>>();
            if let Some(frame) = decode_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes a trailing line that arrived without a newline.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest).into_iter().collect()
    }
}

fn decode_line(raw: &[u8]) -> Option<SseFrame> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    let data = line.strip_prefix("data:")?.trim();

    if data.is_empty() {
        return None;
    }
    if data == DONE_SENTINEL {
        return Some(SseFrame::Done);
    }
    Some(SseFrame::Data(data.to_string()))
}

/// Turns raw body bytes into [`StreamEvent`]s with exactly one terminal event.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    decoder: SseDecoder,
    finished: bool,
}

impl StreamAssembler {
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let frames = self.decoder.push(bytes);
        self.map_frames(frames)
    }

    /// Called once the body is exhausted; closes the stream if nothing else did.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let frames = self.decoder.finish();
        let mut events = self.map_frames(frames);
        if !self.finished {
            self.finished = true;
            events.push(StreamEvent::Done {
                finish_reason: None,
            });
        }
        events
    }

    fn map_frames(&mut self, frames: Vec<SseFrame>) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        for frame in frames {
            if self.finished {
                break;
            }

            let mapped = match frame {
                SseFrame::Done => vec![StreamEvent::Done {
                    finish_reason: None,
                }],
                SseFrame::Data(payload) => {
                    match serde_json::from_str::<ChatCompletionChunk>(&payload) {
                        Ok(chunk) => chunk.into_events(),
                        Err(error) => {
                            tracing::warn!(error = %error, "failed to decode completion chunk");
                            vec![StreamEvent::Error(format!(
                                "failed to decode completion chunk: {error}"
                            ))]
                        }
                    }
                }
            };

            for event in mapped {
                if self.finished {
                    break;
                }
                self.finished = event.is_terminal();
                events.push(event);
            }
        }

        events
    }
}
