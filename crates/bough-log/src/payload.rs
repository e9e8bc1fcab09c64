//! Decoding of recorded server payload records into stream deltas
//!
//! The chat endpoint emits one JSON record per event:
//! `{"type": "text" | "thinking" | "file_used" | "token", ...}`.
//! The workflow endpoint wraps the same records in an envelope keyed by
//! node id: `{"event": "ai_chunk", "ai_chunk": {"id": ..., "result": "<json>"}}`.

use crate::error::{Error, Result};
use crate::stream::{Delta, DeltaKind};
use crate::types::{Status, Usage};
use serde::Deserialize;
use serde_json::Value;

const KNOWN_TYPES: &[&str] = &["text", "thinking", "file_used", "token"];

/// A single chat payload record
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    Text {
        #[serde(default)]
        data: String,
        #[serde(default)]
        message_id: Option<Value>,
    },
    Thinking {
        #[serde(default)]
        data: String,
        #[serde(default)]
        message_id: Option<Value>,
    },
    FileUsed {
        #[serde(default)]
        data: Vec<Value>,
        #[serde(default)]
        message_id: Option<Value>,
    },
    Token {
        #[serde(default)]
        total_token: u32,
        #[serde(default)]
        completion_tokens: u32,
        #[serde(default)]
        prompt_tokens: u32,
    },
}

/// Result of decoding a workflow envelope
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Deltas for the node named in the envelope
    Deltas(Vec<Delta>),
    /// The whole workflow run ended
    Finished(Status),
    /// Node status and other events that carry no conversation content
    Ignored,
}

impl Payload {
    /// Parse a payload from an already decoded JSON value
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Malformed("missing type".to_string()))?;
        if !KNOWN_TYPES.contains(&kind) {
            return Err(Error::UnknownPayload(kind.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Convert into deltas for `slot`.
    ///
    /// Text from tool-call (`mcp`) events is shown as thinking.
    pub fn into_deltas(self, slot: &str, from_tool_call: bool) -> Vec<Delta> {
        match self {
            Payload::Text { data, message_id } => {
                let kind = if from_tool_call {
                    DeltaKind::Thinking
                } else {
                    DeltaKind::Text
                };
                vec![with_id(Delta::assistant(slot, kind, data), message_id)]
            }
            Payload::Thinking { data, message_id } => {
                vec![with_id(
                    Delta::assistant(slot, DeltaKind::Thinking, data),
                    message_id,
                )]
            }
            Payload::FileUsed { .. } if from_tool_call => Vec::new(),
            Payload::FileUsed { data, message_id } => data
                .iter()
                .map(|file| {
                    with_id(
                        Delta::assistant(slot, DeltaKind::Reference, reference_label(file)),
                        message_id.clone(),
                    )
                })
                .collect(),
            Payload::Token {
                total_token,
                completion_tokens,
                prompt_tokens,
            } => vec![Delta::usage(
                slot,
                Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: total_token,
                },
            )],
        }
    }
}

/// Decode one chat payload record for `slot`
pub fn decode_chat(slot: &str, record: &str) -> Result<Vec<Delta>> {
    let value: Value = serde_json::from_str(record)?;
    Ok(Payload::from_value(value)?.into_deltas(slot, false))
}

/// Decode one workflow envelope
pub fn decode_workflow(record: &str) -> Result<Decoded> {
    let value: Value = serde_json::from_str(record)?;
    let event = value
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Malformed("missing event".to_string()))?;

    match event {
        "ai_chunk" | "mcp" => {
            let slot = value
                .pointer("/ai_chunk/id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Malformed("missing ai_chunk.id".to_string()))?;
            let result = value
                .pointer("/ai_chunk/result")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Malformed("missing ai_chunk.result".to_string()))?;
            let inner: Value = serde_json::from_str(result)?;
            if inner.as_str().is_some_and(str::is_empty) {
                return Ok(Decoded::Ignored);
            }
            let deltas = Payload::from_value(inner)?.into_deltas(slot, event == "mcp");
            Ok(Decoded::Deltas(deltas))
        }
        "workflow" => {
            let status = value
                .pointer("/workflow/status")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(match status {
                "completed" => Decoded::Finished(Status::Completed),
                "failed" => Decoded::Finished(Status::Failed),
                "canceled" => Decoded::Finished(Status::Canceled),
                _ => Decoded::Ignored,
            })
        }
        other => {
            tracing::trace!("ignoring workflow event '{}'", other);
            Ok(Decoded::Ignored)
        }
    }
}

fn with_id(mut delta: Delta, message_id: Option<Value>) -> Delta {
    delta.message_id = message_id.and_then(|id| match id {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    delta
}

fn reference_label(file: &Value) -> String {
    file.get("file_name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| file.to_string())
}
