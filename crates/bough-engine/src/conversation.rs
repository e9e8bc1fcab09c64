//! Conversation state: tree, selection, visible path and the segment in flight.
//!
//! Streaming deltas never rebuild the tree. The first assistant delta of a
//! segment opens a provisional alternative and patches it into the visible
//! path; later deltas replace only the last path element. The terminal delta
//! commits the segment to the log, rebuilds the tree once and points the
//! branch points that grew at their new sibling.

use crate::error::{ProtocolError, Result};
use crate::events::ReconcileEvent;
use crate::path::{Path, Turn, resolve, resolve_reusing};
use crate::selection::{self, BranchPointId, Selection, default_selection, grown_points};
use crate::tree::{BuildOptions, ConversationTree, Provisional, TurnIdx};
use bough_log::{Author, Delta, Message, Status, StreamBuffer};
use serde::{Deserialize, Serialize};

/// Behaviour switches for a [`Conversation`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub build: BuildOptions,
    /// Reject two closed segments of the same role in a row
    pub enforce_alternation: bool,
}

#[derive(Debug, Clone, Default)]
enum StreamState {
    #[default]
    Idle,
    Assistant {
        turn: TurnIdx,
        alt: usize,
        /// False once the user navigated this turn's replies mid-stream
        follow: bool,
    },
    User {
        parent_id: Option<String>,
        buffer: StreamBuffer,
    },
}

/// One conversation and everything needed to display it
#[derive(Debug, Clone)]
pub struct Conversation {
    id: String,
    config: ConversationConfig,
    tree: ConversationTree,
    selection: Selection,
    path: Path,
    state: StreamState,
    last_closed: Option<Author>,
    rebuilds: usize,
}

impl Conversation {
    /// Create an empty conversation
    pub fn new(id: impl Into<String>, config: ConversationConfig) -> Self {
        Self::open(id, &[], config)
    }

    /// Open a conversation from its log, showing the latest branches
    pub fn open(id: impl Into<String>, log: &[Message], config: ConversationConfig) -> Self {
        let tree = ConversationTree::build_with(log, config.build);
        let selection = default_selection(&tree);
        let path = resolve(&tree, &selection);
        let last_closed = tail_role(&path);
        Self {
            id: id.into(),
            config,
            tree,
            selection,
            path,
            state: StreamState::Idle,
            last_closed,
            rebuilds: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> ConversationConfig {
        self.config
    }

    pub fn tree(&self) -> &ConversationTree {
        &self.tree
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Normalized log including every committed segment
    pub fn log(&self) -> &[Message] {
        self.tree.log()
    }

    pub fn is_streaming(&self) -> bool {
        !matches!(self.state, StreamState::Idle)
    }

    /// Role of the open segment, if any
    pub fn streaming_role(&self) -> Option<Author> {
        match self.state {
            StreamState::Idle => None,
            StreamState::Assistant { .. } => Some(Author::Assistant),
            StreamState::User { .. } => Some(Author::User),
        }
    }

    /// Number of full tree rebuilds since the conversation was opened
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    /// Fold one delta into the conversation.
    ///
    /// A rejected delta leaves the conversation unchanged.
    pub fn apply_delta(&mut self, delta: &Delta) -> Result<ReconcileEvent> {
        if delta.slot != self.id {
            return Err(ProtocolError::UnknownSlot(delta.slot.clone()));
        }
        self.check_alternation(delta.role)?;

        let event = match delta.role {
            Author::Assistant => self.apply_assistant(delta)?,
            Author::User => self.apply_user(delta)?,
        };

        match delta.terminal_status() {
            Some(status) => Ok(self.finalize(status).unwrap_or(event)),
            None => Ok(event),
        }
    }

    /// Close the open segment with `status` and commit it to the log.
    ///
    /// Returns `None` when nothing was streaming.
    pub fn finalize(&mut self, status: Status) -> Option<ReconcileEvent> {
        match std::mem::take(&mut self.state) {
            StreamState::Idle => None,
            StreamState::Assistant { turn, alt, .. } => {
                let Some(provisional) = self.tree.take_provisional(turn, alt) else {
                    tracing::warn!("slot {}: streaming reply vanished before commit", self.id);
                    return None;
                };
                let messages = provisional.buffer.to_messages(
                    Author::Assistant,
                    &provisional.anchor,
                    provisional.parent_id.as_deref(),
                    self.tree.next_seq(),
                    status,
                );
                self.last_closed = Some(Author::Assistant);
                Some(self.commit(messages, status))
            }
            StreamState::User { parent_id, buffer } => {
                let anchor = buffer
                    .message_id()
                    .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
                let messages = buffer.to_messages(
                    Author::User,
                    &anchor,
                    parent_id.as_deref(),
                    self.tree.next_seq(),
                    status,
                );
                self.last_closed = Some(Author::User);
                Some(self.commit(messages, status))
            }
        }
    }

    /// Stop the open segment, keeping what arrived so far
    pub fn cancel(&mut self) -> Option<ReconcileEvent> {
        self.finalize(Status::Canceled)
    }

    /// Move `point` to sibling `index`. Returns whether the path changed.
    pub fn navigate(&mut self, point: &BranchPointId, index: i64) -> bool {
        let next = selection::navigate(&self.selection, &self.tree, point, index);
        if let StreamState::Assistant { turn, alt, follow } = &mut self.state {
            let streaming_point = self.tree.turn(*turn).assistant_point();
            if self.tree.canonical(point).as_ref() == Some(&streaming_point) {
                *follow = next.get(&streaming_point) == Some(*alt);
            }
        }
        self.selection = next;
        let before = self.path.clone();
        self.path = resolve_reusing(&self.tree, &self.display_selection(), &before);
        self.path != before
    }

    /// Replace the log, keeping the selection and any reply in flight
    pub fn reload(&mut self, log: &[Message]) {
        let provisional = match self.state {
            StreamState::Assistant { turn, alt, .. } => self.tree.take_provisional(turn, alt),
            _ => None,
        };

        self.tree = ConversationTree::build_with(log, self.config.build);
        self.selection.reconcile(&self.tree);
        self.rebuilds += 1;

        if let Some(provisional) = provisional {
            let owner = provisional
                .parent_id
                .as_deref()
                .and_then(|id| self.tree.user_turn(id));
            match owner {
                Some(turn) => {
                    let alt = self.tree.begin_provisional(turn, provisional);
                    if let StreamState::Assistant { turn: t, alt: a, .. } = &mut self.state {
                        *t = turn;
                        *a = alt;
                    }
                }
                None => {
                    tracing::warn!("slot {}: dropping reply whose turn vanished on reload", self.id);
                    self.state = StreamState::Idle;
                }
            }
        }

        self.path = resolve_reusing(&self.tree, &self.display_selection(), &self.path);
        self.last_closed = tail_role(&self.path);
    }

    /// Forget everything, including a segment in flight
    pub fn clear(&mut self) {
        if self.is_streaming() {
            tracing::debug!("slot {}: clearing with a segment in flight", self.id);
        }
        self.tree = ConversationTree::build_with(&[], self.config.build);
        self.selection = Selection::new();
        self.path = Path::default();
        self.state = StreamState::Idle;
        self.last_closed = None;
    }

    fn check_alternation(&self, role: Author) -> Result<()> {
        let open = self.streaming_role();
        match open {
            Some(open) if open != role => Err(ProtocolError::Interleaved {
                slot: self.id.clone(),
                role,
                open,
            }),
            None if self.config.enforce_alternation && self.last_closed == Some(role) => {
                Err(ProtocolError::ConsecutiveRole {
                    slot: self.id.clone(),
                    role,
                })
            }
            _ => Ok(()),
        }
    }

    fn apply_assistant(&mut self, delta: &Delta) -> Result<ReconcileEvent> {
        if let StreamState::Assistant { turn, alt, .. } = self.state {
            let Some(provisional) = self.tree.provisional_mut(turn, alt) else {
                return Err(ProtocolError::NoOpenTurn(self.id.clone()));
            };
            provisional.buffer.process_delta(delta);
            return Ok(match self.patch_streaming_turn() {
                Some(depth) => ReconcileEvent::Patched { depth },
                None => ReconcileEvent::Buffered,
            });
        }

        let turn = self.reply_target(delta)?;
        let anchor = delta
            .message_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let parent_id = self.tree.turn(turn).user().map(|u| u.id.clone());
        let mut buffer = StreamBuffer::new();
        buffer.process_delta(delta);

        let alt = self
            .tree
            .begin_provisional(turn, Provisional::new(anchor.clone(), parent_id, buffer));
        self.state = StreamState::Assistant {
            turn,
            alt,
            follow: true,
        };

        let depth = self.path.depth_of_node(turn);
        if let Some(depth) = depth {
            let user_branch = self.path.turns()[depth].user_branch.clone();
            self.path
                .splice(depth, Turn::view(&self.tree, turn, user_branch, Some(alt)));
        }
        tracing::debug!("slot {}: reply {} started on turn {}", self.id, anchor, turn);
        Ok(ReconcileEvent::Started { anchor, depth })
    }

    /// User turn the reply answers: the explicit parent, else the last visible turn
    fn reply_target(&self, delta: &Delta) -> Result<TurnIdx> {
        if let Some(parent) = delta.parent_id.as_deref() {
            return self
                .tree
                .user_turn(parent)
                .ok_or_else(|| ProtocolError::UnknownParent {
                    slot: self.id.clone(),
                    parent: parent.to_string(),
                });
        }
        self.path
            .last()
            .filter(|turn| turn.user.is_some())
            .map(|turn| turn.node)
            .ok_or_else(|| ProtocolError::NoOpenTurn(self.id.clone()))
    }

    /// Replace the last path element if it shows the streaming reply
    fn patch_streaming_turn(&mut self) -> Option<usize> {
        let StreamState::Assistant { turn, alt, .. } = self.state else {
            return None;
        };
        let last = self.path.last()?;
        if last.node != turn || last.branch_index() != alt || !last.is_streaming() {
            return None;
        }
        let depth = self.path.len() - 1;
        let user_branch = last.user_branch.clone();
        self.path
            .splice(depth, Turn::view(&self.tree, turn, user_branch, Some(alt)));
        Some(depth)
    }

    fn apply_user(&mut self, delta: &Delta) -> Result<ReconcileEvent> {
        if let StreamState::User { buffer, .. } = &mut self.state {
            buffer.process_delta(delta);
            return Ok(ReconcileEvent::Buffered);
        }

        let parent_id = match delta.parent_id.as_deref() {
            Some(parent) => {
                if self.tree.alternative_of(parent).is_none() {
                    return Err(ProtocolError::UnknownParent {
                        slot: self.id.clone(),
                        parent: parent.to_string(),
                    });
                }
                Some(parent.to_string())
            }
            None => self.default_user_parent(),
        };
        let mut buffer = StreamBuffer::new();
        buffer.process_delta(delta);
        self.state = StreamState::User { parent_id, buffer };
        Ok(ReconcileEvent::Buffered)
    }

    /// The visible leaf reply, or the leaf's own parent when it has no reply yet
    fn default_user_parent(&self) -> Option<String> {
        let last = self.path.last()?;
        match &last.alternative {
            Some(alt) => Some(alt.id().to_string()),
            None => last.parent_id().map(str::to_string),
        }
    }

    fn commit(&mut self, messages: Vec<Message>, status: Status) -> ReconcileEvent {
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let mut log = self.tree.log().to_vec();
        log.extend(messages);

        let tree = ConversationTree::build_with(&log, self.config.build);
        let grown = grown_points(&self.tree, &tree);
        self.selection.reconcile(&tree);
        self.selection.select_latest(&tree, grown);
        self.path = resolve_reusing(&tree, &self.selection, &self.path);
        self.tree = tree;
        self.rebuilds += 1;

        tracing::debug!("slot {}: committed {:?} ({})", self.id, ids, status);
        ReconcileEvent::Committed { ids, status }
    }

    /// Selection used for display: follows a streaming reply unless navigated away
    fn display_selection(&self) -> Selection {
        let mut display = self.selection.clone();
        if let StreamState::Assistant {
            turn,
            alt,
            follow: true,
        } = self.state
        {
            display.set(self.tree.turn(turn).assistant_point(), alt);
        }
        display
    }
}

/// Role of the last message on `path`: its leaf reply, else its leaf question
fn tail_role(path: &Path) -> Option<Author> {
    let turn = path.last()?;
    if turn.alternative.is_some() {
        Some(Author::Assistant)
    } else if turn.user.is_some() {
        Some(Author::User)
    } else {
        None
    }
}
