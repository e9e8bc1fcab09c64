//! Stream delta types and the buffer that accumulates them

use crate::types::{Author, Kind, Message, Status, Usage, attachment_id, reference_id, thinking_id};
use serde::{Deserialize, Serialize};

/// What a delta fragment contributes to the message being streamed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeltaKind {
    #[default]
    Text,
    Thinking,
    Reference,
    TokenUsage,
}

/// One decoded record of a live event stream.
///
/// `slot` names the conversation (or workflow node) the record belongs to.
/// A segment of deltas with the same role ends with a `terminal` delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub slot: String,
    pub role: Author,
    #[serde(default)]
    pub kind: DeltaKind,
    #[serde(default)]
    pub fragment: String,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    /// Server-assigned id of the message being streamed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// Explicit parent, used for edits and regenerations of earlier turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Delta {
    fn new(slot: impl Into<String>, role: Author, kind: DeltaKind, fragment: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            role,
            kind,
            fragment: fragment.into(),
            terminal: false,
            status: None,
            message_id: None,
            parent_id: None,
            usage: None,
        }
    }

    /// Create an assistant delta
    pub fn assistant(slot: impl Into<String>, kind: DeltaKind, fragment: impl Into<String>) -> Self {
        Self::new(slot, Author::Assistant, kind, fragment)
    }

    /// Create a user text delta
    pub fn user(slot: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::new(slot, Author::User, DeltaKind::Text, fragment)
    }

    /// Create a token usage delta
    pub fn usage(slot: impl Into<String>, usage: Usage) -> Self {
        let mut delta = Self::new(slot, Author::Assistant, DeltaKind::TokenUsage, "");
        delta.usage = Some(usage);
        delta
    }

    /// Mark this delta as the end of its segment
    pub fn terminal(mut self, status: Status) -> Self {
        self.terminal = true;
        self.status = Some(status);
        self
    }

    /// Set the server-assigned message id
    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Set an explicit parent message id
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Terminal status, treating a terminal delta without status as completed
    pub fn terminal_status(&self) -> Option<Status> {
        self.terminal.then(|| self.status.unwrap_or_default())
    }
}

/// Accumulates the deltas of one segment into message content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamBuffer {
    message_id: Option<String>,
    text: String,
    thinking: String,
    references: Vec<String>,
    usage: Option<Usage>,
    deltas: usize,
}

impl StreamBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a delta into the buffer
    pub fn process_delta(&mut self, delta: &Delta) {
        self.deltas += 1;
        if self.message_id.is_none() {
            self.message_id.clone_from(&delta.message_id);
        }
        match delta.kind {
            DeltaKind::Text => self.text.push_str(&delta.fragment),
            DeltaKind::Thinking => self.thinking.push_str(&delta.fragment),
            DeltaKind::Reference => {
                if !delta.fragment.is_empty() {
                    self.references.push(delta.fragment.clone());
                }
            }
            DeltaKind::TokenUsage => {
                if let Some(usage) = &delta.usage {
                    self.usage.get_or_insert_with(Usage::default).accumulate(usage);
                }
            }
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn references(&self) -> &[String] {
        &self.references
    }

    pub fn usage(&self) -> Option<&Usage> {
        self.usage.as_ref()
    }

    /// Number of deltas folded so far
    pub fn delta_count(&self) -> usize {
        self.deltas
    }

    /// Render the buffer as log records.
    ///
    /// Assistant segments produce `thinking`, `text`, then `reference`
    /// records; user segments produce `attachment` records then `text`.
    /// The text record always exists and carries `anchor` as its id.
    pub fn to_messages(
        &self,
        author: Author,
        anchor: &str,
        parent_id: Option<&str>,
        first_seq: u64,
        status: Status,
    ) -> Vec<Message> {
        let mut seq = first_seq;
        let mut next_seq = || {
            let current = seq;
            seq += 1;
            current
        };
        let mut messages = Vec::new();

        match author {
            Author::Assistant => {
                if !self.thinking.is_empty() {
                    messages.push(
                        Message::new(thinking_id(anchor), parent_id, author, &self.thinking, next_seq())
                            .with_kind(Kind::Thinking)
                            .with_status(status),
                    );
                }
                let mut text = Message::new(anchor, parent_id, author, &self.text, next_seq())
                    .with_status(status);
                text.usage = self.usage;
                messages.push(text);
                for (n, reference) in self.references.iter().enumerate() {
                    messages.push(
                        Message::new(reference_id(anchor, n), parent_id, author, reference, next_seq())
                            .with_kind(Kind::Reference)
                            .with_status(status),
                    );
                }
            }
            Author::User => {
                for (n, attachment) in self.references.iter().enumerate() {
                    messages.push(
                        Message::new(attachment_id(anchor, n), parent_id, author, attachment, next_seq())
                            .with_kind(Kind::Attachment),
                    );
                }
                messages.push(Message::new(anchor, parent_id, author, &self.text, next_seq()));
            }
        }

        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_accumulates_fragments() {
        let mut buffer = StreamBuffer::new();
        buffer.process_delta(&Delta::assistant("s1", DeltaKind::Thinking, "hmm ").with_message_id("a1"));
        buffer.process_delta(&Delta::assistant("s1", DeltaKind::Text, "Hel"));
        buffer.process_delta(&Delta::assistant("s1", DeltaKind::Text, "lo"));
        buffer.process_delta(&Delta::assistant("s1", DeltaKind::Reference, "doc.pdf"));

        assert_eq!(buffer.text(), "Hello");
        assert_eq!(buffer.thinking(), "hmm ");
        assert_eq!(buffer.references(), ["doc.pdf".to_string()]);
        assert_eq!(buffer.message_id(), Some("a1"));
        assert_eq!(buffer.delta_count(), 4);
    }

    #[test]
    fn test_first_message_id_wins() {
        let mut buffer = StreamBuffer::new();
        buffer.process_delta(&Delta::assistant("s1", DeltaKind::Text, "a").with_message_id("first"));
        buffer.process_delta(&Delta::assistant("s1", DeltaKind::Text, "b").with_message_id("second"));
        assert_eq!(buffer.message_id(), Some("first"));
    }

    #[test]
    fn test_usage_deltas_are_summed() {
        let mut buffer = StreamBuffer::new();
        let usage = Usage {
            prompt_tokens: 3,
            completion_tokens: 4,
            total_tokens: 7,
        };
        buffer.process_delta(&Delta::usage("s1", usage));
        buffer.process_delta(&Delta::usage("s1", usage));
        assert_eq!(buffer.usage().map(|u| u.total_tokens), Some(14));
    }

    #[test]
    fn test_assistant_messages_order_and_ids() {
        let mut buffer = StreamBuffer::new();
        buffer.process_delta(&Delta::assistant("s1", DeltaKind::Thinking, "plan"));
        buffer.process_delta(&Delta::assistant("s1", DeltaKind::Text, "answer"));
        buffer.process_delta(&Delta::assistant("s1", DeltaKind::Reference, "kb/1"));

        let messages = buffer.to_messages(Author::Assistant, "a1", Some("u1"), 10, Status::Failed);
        let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a1.thinking", "a1", "a1.ref0"]);
        assert_eq!(messages[0].kind, Kind::Thinking);
        assert_eq!(messages[2].kind, Kind::Reference);
        assert!(messages.iter().all(|m| m.status == Status::Failed));
        assert_eq!(
            messages.iter().map(|m| m.created_at).collect::<Vec<_>>(),
            [10, 11, 12]
        );
    }

    #[test]
    fn test_empty_assistant_buffer_still_yields_text() {
        let messages = StreamBuffer::new().to_messages(Author::Assistant, "a1", Some("u1"), 1, Status::Canceled);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, Status::Canceled);
        assert!(messages[0].content.is_empty());
    }

    #[test]
    fn test_user_attachments_precede_text() {
        let mut buffer = StreamBuffer::new();
        buffer.process_delta(&Delta {
            kind: DeltaKind::Reference,
            ..Delta::user("s1", "image.png")
        });
        buffer.process_delta(&Delta::user("s1", "what is this?"));

        let messages = buffer.to_messages(Author::User, "u2", Some("a1"), 5, Status::Completed);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "u2.att0");
        assert_eq!(messages[0].kind, Kind::Attachment);
        assert_eq!(messages[1].id, "u2");
        assert_eq!(messages[1].content, "what is this?");
    }

    #[test]
    fn test_delta_json_kind_names() {
        let json = r#"{"slot":"n1","role":"assistant","kind":"token-usage","usage":{"total_tokens":9}}"#;
        let delta: Delta = serde_json::from_str(json).unwrap();
        assert_eq!(delta.kind, DeltaKind::TokenUsage);
        assert_eq!(delta.usage.map(|u| u.total_tokens), Some(9));
        assert!(!delta.terminal);
        assert_eq!(delta.terminal_status(), None);
    }

    #[test]
    fn test_terminal_without_status_is_completed() {
        let mut delta = Delta::assistant("s1", DeltaKind::Text, "");
        delta.terminal = true;
        assert_eq!(delta.terminal_status(), Some(Status::Completed));
    }
}
