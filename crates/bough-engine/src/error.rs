//! Error types for bough-engine

use bough_log::Author;
use thiserror::Error;

/// Result type alias using bough-engine ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Stream deltas that break the reconciliation protocol.
///
/// The offending delta is dropped and the conversation state is left
/// untouched, so callers may log and keep consuming the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Two segments of the same role closed back to back on one slot
    #[error("slot {slot}: consecutive {role} turns")]
    ConsecutiveRole { slot: String, role: Author },

    /// A delta of one role arrived while a segment of the other is still open
    #[error("slot {slot}: {role} delta during an open {open} segment")]
    Interleaved {
        slot: String,
        role: Author,
        open: Author,
    },

    /// A delta named a slot that is not open
    #[error("unknown slot: {0}")]
    UnknownSlot(String),

    /// An assistant delta arrived with no user turn to answer
    #[error("slot {0}: no open turn for the response")]
    NoOpenTurn(String),

    /// A delta named a parent message that is not in the tree
    #[error("slot {slot}: unknown parent message {parent}")]
    UnknownParent { slot: String, parent: String },
}

impl ProtocolError {
    /// Slot the rejected delta belonged to
    pub fn slot(&self) -> &str {
        match self {
            ProtocolError::ConsecutiveRole { slot, .. }
            | ProtocolError::Interleaved { slot, .. }
            | ProtocolError::UnknownParent { slot, .. } => slot,
            ProtocolError::UnknownSlot(slot) | ProtocolError::NoOpenTurn(slot) => slot,
        }
    }

    /// Check if the delta violated strict user/assistant alternation
    pub fn is_alternation(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConsecutiveRole { .. } | ProtocolError::Interleaved { .. }
        )
    }
}
