//! Core types for the conversation message log

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
}

impl Author {
    /// Get the author as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Author::User => "user",
            Author::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Plain text (the user's question or the assistant's answer)
    #[default]
    Text,
    /// Thinking/reasoning content
    Thinking,
    /// An uploaded file or image
    Attachment,
    /// A knowledge-base reference cited by the assistant
    Reference,
}

impl Kind {
    /// Check if this is text content
    pub fn is_text(&self) -> bool {
        matches!(self, Kind::Text)
    }
}

/// How a generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Completed,
    Failed,
    Canceled,
}

impl Status {
    /// Check if this is the normal completed status
    pub fn is_completed(&self) -> bool {
        matches!(self, Status::Completed)
    }

    /// Get the status as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Canceled => "canceled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token usage reported for a generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Add another usage report to this one
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

/// A single record of the conversation log.
///
/// `parent_id` of `None` means the message hangs off the conversation root.
/// `created_at` is a monotonic sequence number, not a wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub author: Author,
    #[serde(default)]
    pub kind: Kind,
    #[serde(default)]
    pub content: String,
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Status::is_completed")]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    /// Create a message with default kind, status and usage
    pub fn new(
        id: impl Into<String>,
        parent_id: Option<&str>,
        author: Author,
        content: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            id: id.into(),
            parent_id: parent_id.map(str::to_string),
            author,
            kind: Kind::Text,
            content: content.into(),
            created_at,
            status: Status::Completed,
            usage: None,
        }
    }

    /// Create a user text message
    pub fn user(
        id: impl Into<String>,
        parent_id: Option<&str>,
        content: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self::new(id, parent_id, Author::User, content, created_at)
    }

    /// Create an assistant text message
    pub fn assistant(
        id: impl Into<String>,
        parent_id: Option<&str>,
        content: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self::new(id, parent_id, Author::Assistant, content, created_at)
    }

    /// Set the kind
    pub fn with_kind(mut self, kind: Kind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    /// Set the token usage
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Check if a user wrote this message
    pub fn is_user(&self) -> bool {
        self.author == Author::User
    }

    /// Check if the assistant wrote this message
    pub fn is_assistant(&self) -> bool {
        self.author == Author::Assistant
    }

    /// User-authored non-text records are folded into the next user turn
    pub fn is_user_attachment(&self) -> bool {
        self.is_user() && !self.kind.is_text()
    }
}

/// Id of the thinking record committed alongside an assistant text message
pub fn thinking_id(anchor: &str) -> String {
    format!("{anchor}.thinking")
}

/// Id of the n-th reference record committed alongside an assistant text message
pub fn reference_id(anchor: &str, n: usize) -> String {
    format!("{anchor}.ref{n}")
}

/// Id of the n-th attachment record committed alongside a user text message
pub fn attachment_id(anchor: &str, n: usize) -> String {
    format!("{anchor}.att{n}")
}
