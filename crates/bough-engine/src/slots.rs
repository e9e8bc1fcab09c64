//! Multi-slot dispatch: independent conversations sharing one event stream
//!
//! A workflow run interleaves several node-level conversations over a single
//! stream. Each slot gets its own [`Conversation`] with strict user/assistant
//! alternation; a protocol error on one slot never touches the others.

use crate::conversation::{Conversation, ConversationConfig};
use crate::error::{ProtocolError, Result};
use crate::events::ReconcileEvent;
use crate::selection::BranchPointId;
use bough_log::{Delta, Message, Status};
use std::collections::BTreeMap;

/// Routes deltas to per-slot conversations
#[derive(Debug, Clone)]
pub struct SlotDispatcher {
    slots: BTreeMap<String, Conversation>,
    config: ConversationConfig,
    auto_open: bool,
}

impl Default for SlotDispatcher {
    fn default() -> Self {
        Self::new(ConversationConfig::default())
    }
}

impl SlotDispatcher {
    /// Create a dispatcher. Alternation is always enforced per slot.
    pub fn new(config: ConversationConfig) -> Self {
        Self {
            slots: BTreeMap::new(),
            config: ConversationConfig {
                enforce_alternation: true,
                ..config
            },
            auto_open: false,
        }
    }

    /// Open an empty slot on the first delta that names it
    pub fn with_auto_open(mut self, auto_open: bool) -> Self {
        self.auto_open = auto_open;
        self
    }

    /// Open (or reopen) `slot` from its log
    pub fn open_slot(&mut self, slot: impl Into<String>, log: &[Message]) -> &Conversation {
        let slot = slot.into();
        let conversation = Conversation::open(slot.clone(), log, self.config);
        let previous = self.slots.insert(slot.clone(), conversation);
        if previous.is_some_and(|c| c.is_streaming()) {
            tracing::debug!("slot {}: reopened with a segment in flight", slot);
        }
        &self.slots[&slot]
    }

    /// Close `slot`; later deltas for it are rejected
    pub fn close_slot(&mut self, slot: &str) -> Option<Conversation> {
        self.slots.remove(slot)
    }

    pub fn slot(&self, slot: &str) -> Option<&Conversation> {
        self.slots.get(slot)
    }

    pub fn slot_mut(&mut self, slot: &str) -> Option<&mut Conversation> {
        self.slots.get_mut(slot)
    }

    pub fn slots(&self) -> impl Iterator<Item = &Conversation> {
        self.slots.values()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ids of slots with a segment in flight
    pub fn streaming_slots(&self) -> Vec<&str> {
        self.slots
            .values()
            .filter(|c| c.is_streaming())
            .map(Conversation::id)
            .collect()
    }

    /// Apply a delta to the slot it names
    pub fn dispatch(&mut self, delta: &Delta) -> Result<ReconcileEvent> {
        if self.auto_open && !self.slots.contains_key(&delta.slot) {
            tracing::debug!("slot {}: opened by first delta", delta.slot);
            self.slots.insert(
                delta.slot.clone(),
                Conversation::new(delta.slot.clone(), self.config),
            );
        }
        let conversation = self
            .slots
            .get_mut(&delta.slot)
            .ok_or_else(|| ProtocolError::UnknownSlot(delta.slot.clone()));
        let result = conversation.and_then(|c| c.apply_delta(delta));
        if let Err(e) = &result {
            tracing::warn!("dropping delta: {}", e);
        }
        result
    }

    /// Navigate within one slot
    pub fn navigate(&mut self, slot: &str, point: &BranchPointId, index: i64) -> Result<bool> {
        self.slots
            .get_mut(slot)
            .map(|c| c.navigate(point, index))
            .ok_or_else(|| ProtocolError::UnknownSlot(slot.to_string()))
    }

    /// Close every open segment with `status`
    pub fn finish_all(&mut self, status: Status) -> Vec<(String, ReconcileEvent)> {
        self.slots
            .iter_mut()
            .filter_map(|(id, c)| c.finalize(status).map(|event| (id.clone(), event)))
            .collect()
    }

    /// Cancel every open segment
    pub fn cancel_all(&mut self) -> Vec<(String, ReconcileEvent)> {
        self.finish_all(Status::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bough_log::DeltaKind;

    fn text(slot: &str, fragment: &str) -> Delta {
        Delta::assistant(slot, DeltaKind::Text, fragment)
    }

    fn question(slot: &str, fragment: &str) -> Delta {
        Delta::user(slot, fragment).terminal(Status::Completed)
    }

    #[test]
    fn test_interleaved_slots_are_independent() {
        let mut slots = SlotDispatcher::default().with_auto_open(true);
        slots.dispatch(&question("n1", "q1")).unwrap();
        slots.dispatch(&question("n2", "q2")).unwrap();
        slots.dispatch(&text("n1", "A")).unwrap();
        slots.dispatch(&text("n2", "X")).unwrap();
        slots.dispatch(&text("n1", "B")).unwrap();
        slots
            .dispatch(&text("n2", "Y").terminal(Status::Completed))
            .unwrap();
        slots
            .dispatch(&text("n1", "C").terminal(Status::Completed))
            .unwrap();

        let reply = |slot: &str| {
            slots.slot(slot).unwrap().path().turns()[0]
                .alternative
                .as_ref()
                .and_then(|a| a.text())
                .map(|m| m.content.clone())
        };
        assert_eq!(reply("n1").as_deref(), Some("ABC"));
        assert_eq!(reply("n2").as_deref(), Some("XY"));
    }

    #[test]
    fn test_consecutive_assistant_turns_rejected() {
        let mut slots = SlotDispatcher::default().with_auto_open(true);
        slots.dispatch(&question("n1", "q")).unwrap();
        slots
            .dispatch(&text("n1", "one").terminal(Status::Completed))
            .unwrap();
        let err = slots.dispatch(&text("n1", "two")).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::ConsecutiveRole {
                slot: "n1".into(),
                role: bough_log::Author::Assistant,
            }
        );

        slots.dispatch(&question("n2", "other")).unwrap();
        assert!(slots.dispatch(&text("n2", "fine")).is_ok());
        assert_eq!(slots.slot("n1").unwrap().log().len(), 2);
    }

    #[test]
    fn test_consecutive_user_turns_rejected() {
        let mut slots = SlotDispatcher::default().with_auto_open(true);
        slots.dispatch(&question("n1", "q1")).unwrap();
        assert!(matches!(
            slots.dispatch(&question("n1", "q2")),
            Err(ProtocolError::ConsecutiveRole { .. })
        ));
    }

    #[test]
    fn test_opened_slot_remembers_last_role() {
        let mut slots = SlotDispatcher::default();
        slots.open_slot(
            "n1",
            &[
                Message::user("u1", None, "q", 1),
                Message::assistant("a1", Some("u1"), "one", 2),
            ],
        );
        assert_eq!(
            slots.dispatch(&text("n1", "two").terminal(Status::Completed)),
            Err(ProtocolError::ConsecutiveRole {
                slot: "n1".into(),
                role: bough_log::Author::Assistant,
            })
        );
        assert_eq!(slots.slot("n1").unwrap().log().len(), 2);
        assert!(slots.dispatch(&question("n1", "follow-up")).is_ok());
    }

    #[test]
    fn test_unknown_slot_without_auto_open() {
        let mut slots = SlotDispatcher::default();
        assert_eq!(
            slots.dispatch(&question("ghost", "q")),
            Err(ProtocolError::UnknownSlot("ghost".into()))
        );
        assert!(slots.is_empty());
    }

    #[test]
    fn test_closed_slot_rejects_late_deltas() {
        let mut slots = SlotDispatcher::default();
        slots.open_slot("n1", &[Message::user("u1", None, "q", 1)]);
        slots.dispatch(&text("n1", "partial")).unwrap();
        assert!(slots.close_slot("n1").is_some());
        assert!(matches!(
            slots.dispatch(&text("n1", "late")),
            Err(ProtocolError::UnknownSlot(_))
        ));
    }

    #[test]
    fn test_cancel_all_leaves_nothing_streaming() {
        let mut slots = SlotDispatcher::default().with_auto_open(true);
        for slot in ["a", "b", "c"] {
            slots.dispatch(&question(slot, "q")).unwrap();
        }
        slots.dispatch(&text("a", "1")).unwrap();
        slots.dispatch(&text("b", "2")).unwrap();
        assert_eq!(slots.streaming_slots(), ["a", "b"]);

        let events = slots.cancel_all();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|(_, e)| matches!(
            e,
            ReconcileEvent::Committed {
                status: Status::Canceled,
                ..
            }
        )));
        assert!(slots.streaming_slots().is_empty());
    }

    #[test]
    fn test_navigate_slot() {
        let mut slots = SlotDispatcher::default();
        slots.open_slot(
            "n1",
            &[
                Message::user("u1", None, "q", 1),
                Message::assistant("a1", Some("u1"), "one", 2),
                Message::assistant("a2", Some("u1"), "two", 3),
            ],
        );
        let point = BranchPointId::Assistant("u1".into());
        assert_eq!(slots.navigate("n1", &point, 0), Ok(true));
        assert_eq!(slots.navigate("n1", &point, 0), Ok(false));
        assert!(slots.navigate("n9", &point, 0).is_err());
    }
}
