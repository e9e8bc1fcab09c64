//! Reconciliation event types

use bough_log::Status;
use serde::{Deserialize, Serialize};

/// What applying a delta did to a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconcileEvent {
    /// A provisional response was opened.
    ///
    /// `depth` is where it was patched into the visible path, if it is visible.
    Started { anchor: String, depth: Option<usize> },

    /// The last turn of the path was replaced with fresher content
    Patched { depth: usize },

    /// The delta was folded into a segment that is not visible yet
    Buffered,

    /// A segment was committed to the log and the tree rebuilt
    Committed { ids: Vec<String>, status: Status },
}

impl ReconcileEvent {
    /// Check if this event ended a segment
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReconcileEvent::Committed { .. })
    }

    /// Depth of the path element this event touched, if any
    pub fn depth(&self) -> Option<usize> {
        match self {
            ReconcileEvent::Started { depth, .. } => *depth,
            ReconcileEvent::Patched { depth } => Some(*depth),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(
            ReconcileEvent::Committed {
                ids: vec!["a1".into()],
                status: Status::Completed,
            }
            .is_terminal()
        );
        assert!(!ReconcileEvent::Buffered.is_terminal());
        assert!(!ReconcileEvent::Patched { depth: 2 }.is_terminal());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&ReconcileEvent::Patched { depth: 1 }).unwrap();
        assert_eq!(json, r#"{"type":"patched","depth":1}"#);

        let event: ReconcileEvent =
            serde_json::from_str(r#"{"type":"committed","ids":["x"],"status":"canceled"}"#).unwrap();
        assert_eq!(
            event,
            ReconcileEvent::Committed {
                ids: vec!["x".into()],
                status: Status::Canceled,
            }
        );
    }

    #[test]
    fn test_depth() {
        let started = ReconcileEvent::Started {
            anchor: "a".into(),
            depth: Some(3),
        };
        assert_eq!(started.depth(), Some(3));
        assert_eq!(ReconcileEvent::Buffered.depth(), None);
    }
}
