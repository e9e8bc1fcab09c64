//! Single-chat session: one active conversation at a time

use crate::conversation::{Conversation, ConversationConfig};
use crate::error::{ProtocolError, Result};
use crate::events::ReconcileEvent;
use crate::selection::BranchPointId;
use bough_log::{Delta, Message};

/// Holds the conversation currently on screen.
///
/// Switching conversations discards the previous one, including a reply
/// still in flight; its late deltas are rejected as unknown.
#[derive(Debug, Clone, Default)]
pub struct Session {
    active: Option<Conversation>,
    config: ConversationConfig,
}

impl Session {
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            active: None,
            config,
        }
    }

    /// Switch to conversation `id`, showing the latest branches of `log`
    pub fn open(&mut self, id: impl Into<String>, log: &[Message]) -> &Conversation {
        self.discard();
        self.active
            .insert(Conversation::open(id, log, self.config))
    }

    /// Switch to a new empty conversation
    pub fn new_chat(&mut self, id: impl Into<String>) -> &Conversation {
        self.open(id, &[])
    }

    /// Close the active conversation
    pub fn close(&mut self) {
        self.discard();
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Conversation> {
        self.active.as_mut()
    }

    /// Apply a delta to the active conversation
    pub fn apply_delta(&mut self, delta: &Delta) -> Result<ReconcileEvent> {
        let result = match self.active.as_mut() {
            Some(conversation) if conversation.id() == delta.slot => conversation.apply_delta(delta),
            _ => Err(ProtocolError::UnknownSlot(delta.slot.clone())),
        };
        if let Err(e) = &result {
            tracing::warn!("dropping delta: {}", e);
        }
        result
    }

    /// Navigate the active conversation. Returns whether the path changed.
    pub fn navigate(&mut self, point: &BranchPointId, index: i64) -> bool {
        self.active
            .as_mut()
            .is_some_and(|c| c.navigate(point, index))
    }

    /// Cancel the reply in flight, if any
    pub fn cancel(&mut self) -> Option<ReconcileEvent> {
        self.active.as_mut()?.cancel()
    }

    /// Replace the active conversation's log after a history re-fetch
    pub fn reload(&mut self, log: &[Message]) {
        if let Some(conversation) = self.active.as_mut() {
            conversation.reload(log);
        }
    }

    fn discard(&mut self) {
        if let Some(previous) = self.active.take() {
            if previous.is_streaming() {
                tracing::debug!("abandoning in-flight segment of {}", previous.id());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bough_log::{DeltaKind, Status};

    fn history() -> Vec<Message> {
        vec![
            Message::user("u1", None, "q", 1),
            Message::assistant("a1", Some("u1"), "one", 2),
            Message::assistant("a2", Some("u1"), "two", 3),
        ]
    }

    #[test]
    fn test_open_applies_default_selection() {
        let mut session = Session::default();
        let conversation = session.open("c1", &history());
        assert_eq!(conversation.path().turns()[0].branch_index(), 1);
    }

    #[test]
    fn test_switch_drops_old_stream() {
        let mut session = Session::default();
        session.open("c1", &history());
        session
            .apply_delta(&Delta::assistant("c1", DeltaKind::Text, "partial"))
            .unwrap();

        session.new_chat("c2");
        let late = Delta::assistant("c1", DeltaKind::Text, "late").terminal(Status::Completed);
        assert_eq!(
            session.apply_delta(&late),
            Err(ProtocolError::UnknownSlot("c1".into()))
        );
        let active = session.active().unwrap();
        assert_eq!(active.id(), "c2");
        assert!(active.path().is_empty());
        assert!(!active.is_streaming());
    }

    #[test]
    fn test_selection_reset_on_switch() {
        let mut session = Session::default();
        session.open("c1", &history());
        assert!(session.navigate(&BranchPointId::Assistant("u1".into()), 0));

        session.open("c1", &history());
        assert_eq!(
            session.active().unwrap().selection().get(&BranchPointId::Assistant("u1".into())),
            Some(1)
        );
    }

    #[test]
    fn test_closed_session() {
        let mut session = Session::default();
        session.open("c1", &history());
        session.close();
        assert!(session.active().is_none());
        assert!(!session.navigate(&BranchPointId::Root, 0));
        assert!(session.cancel().is_none());
        assert!(session.apply_delta(&Delta::user("c1", "hi")).is_err());
    }

    #[test]
    fn test_cancel_through_session() {
        let mut session = Session::default();
        session.open("c1", &history());
        session
            .apply_delta(&Delta::assistant("c1", DeltaKind::Text, "abc"))
            .unwrap();
        let event = session.cancel().unwrap();
        assert!(event.is_terminal());
        assert_eq!(session.active().unwrap().path().turns()[0].branch_count(), 3);
    }

    #[test]
    fn test_reload_rebuilds_active() {
        let mut session = Session::default();
        session.open("c1", &history());
        let mut log = history();
        log.push(Message::user("u2", Some("a2"), "more", 4));
        session.reload(&log);
        assert_eq!(session.active().unwrap().path().len(), 2);
    }
}
