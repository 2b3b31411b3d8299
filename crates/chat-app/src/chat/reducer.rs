use parley_llm::StreamEvent;

use super::message::Message;

/// What the owner of the message list has to do after one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reduction {
    /// Keep reading the stream.
    Continue,
    /// The stream completed; store the last message's final content.
    Persist { content: String },
    /// The stream completed over an empty list; nothing to store.
    Finished,
    /// The stream failed; show the message and store nothing.
    Failed { message: String },
}

/// Folds one stream event into the message list.
///
/// Only the last message is ever touched. Events must arrive in delivery
/// order; nothing here reorders them.
pub fn apply_event(messages: &mut [Message], event: StreamEvent) -> Reduction {
    match event {
        StreamEvent::Fragment(fragment) => {
            match messages.last_mut() {
                Some(last) => last.content.push_str(&fragment),
                None => tracing::debug!(
                    fragment_len = fragment.len(),
                    "dropping fragment for empty message list"
                ),
            }
            Reduction::Continue
        }
        StreamEvent::Done { finish_reason } => {
            tracing::debug!(finish_reason = ?finish_reason, "stream finished");
            match messages.last() {
                Some(last) => Reduction::Persist {
                    content: last.content.clone(),
                },
                None => Reduction::Finished,
            }
        }
        StreamEvent::Error(message) => Reduction::Failed { message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::message::Role;

    fn fragment(text: &str) -> StreamEvent {
        StreamEvent::Fragment(text.to_string())
    }

    fn done() -> StreamEvent {
        StreamEvent::Done {
            finish_reason: Some("stop".to_string()),
        }
    }

    fn run(messages: &mut Vec<Message>, fragments: &[&str]) -> Reduction {
        for text in fragments {
            assert_eq!(apply_event(messages, fragment(text)), Reduction::Continue);
        }
        apply_event(messages, done())
    }

    #[test]
    fn persisted_content_is_the_concatenated_fragments() {
        let sequences: &[&[&str]] = &[
            &[],
            &["Hello"],
            &["Hel", "lo", ", ", "world"],
            &["", "a", "", "b"],
            &["héllo ", "🌍", "\n", "line two"],
        ];

        for fragments in sequences {
            let mut messages = vec![Message::user("hi"), Message::bot_placeholder()];
            let reduction = run(&mut messages, fragments);
            assert_eq!(
                reduction,
                Reduction::Persist {
                    content: fragments.concat()
                }
            );
        }
    }

    #[test]
    fn only_the_last_message_changes() {
        let mut messages = vec![
            Message::user("first"),
            Message::new(Role::Bot, "answer"),
            Message::user("second"),
            Message::bot_placeholder(),
        ];
        let before = messages[..3].to_vec();

        run(&mut messages, &["new ", "reply"]);

        assert_eq!(messages[..3], before[..]);
        assert_eq!(messages[3].content, "new reply");
    }

    #[test]
    fn fragments_over_an_empty_list_are_dropped() {
        let mut messages: Vec<Message> = Vec::new();
        assert_eq!(apply_event(&mut messages, fragment("lost")), Reduction::Continue);
        assert_eq!(apply_event(&mut messages, done()), Reduction::Finished);
        assert!(messages.is_empty());
    }

    #[test]
    fn error_fails_without_persisting() {
        let mut messages = vec![Message::user("hi"), Message::bot_placeholder()];
        apply_event(&mut messages, fragment("partial"));

        let reduction = apply_event(&mut messages, StreamEvent::Error("boom".to_string()));

        assert_eq!(
            reduction,
            Reduction::Failed {
                message: "boom".to_string()
            }
        );
        assert_eq!(messages[1].content, "partial");
    }
}
