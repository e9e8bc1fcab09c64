//! Turn tree built from a flat message log
//!
//! A turn is one user message (with its attachments) plus every assistant
//! alternative generated in reply to it. Editing a user message creates a
//! sibling turn under the same parent alternative; regenerating a reply adds
//! another alternative to the same turn. The tree is rebuilt from scratch
//! whenever the log changes, so it never holds derived state that can drift.

use crate::selection::BranchPointId;
use bough_log::{Author, Kind, Message, Status, StreamBuffer, Usage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Index of a turn node inside a [`ConversationTree`]
pub type TurnIdx = usize;

/// Which user turn claims a user attachment with no text message of its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentPolicy {
    /// The next user text message with the same parent
    #[default]
    Leading,
    /// Fall back to the closest earlier user text message with the same parent
    Nearest,
}

/// Options for [`ConversationTree::build_with`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    pub attachments: AttachmentPolicy,
}

/// One assistant reply: a text message with its thinking and references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    messages: Vec<Arc<Message>>,
    provisional: bool,
}

impl Alternative {
    pub(crate) fn finalized(messages: Vec<Arc<Message>>) -> Self {
        Self {
            messages,
            provisional: false,
        }
    }

    /// Id of the text message, or of the first member when there is none
    pub fn id(&self) -> &str {
        self.text()
            .or_else(|| self.messages.first().map(Arc::as_ref))
            .map(|m| m.id.as_str())
            .unwrap_or_default()
    }

    /// Members in creation order
    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn text(&self) -> Option<&Message> {
        self.first_of(Kind::Text)
    }

    pub fn thinking(&self) -> Option<&Message> {
        self.first_of(Kind::Thinking)
    }

    pub fn references(&self) -> impl Iterator<Item = &Message> {
        self.messages
            .iter()
            .map(Arc::as_ref)
            .filter(|m| m.kind == Kind::Reference)
    }

    /// First non-completed member status, or completed
    pub fn status(&self) -> Status {
        self.messages
            .iter()
            .map(|m| m.status)
            .find(|s| !s.is_completed())
            .unwrap_or_default()
    }

    /// Token usage summed over all members
    pub fn usage(&self) -> Option<Usage> {
        self.messages
            .iter()
            .filter_map(|m| m.usage.as_ref())
            .fold(None, |total: Option<Usage>, usage| {
                let mut total = total.unwrap_or_default();
                total.accumulate(usage);
                Some(total)
            })
    }

    /// Check if this reply is still being streamed
    pub fn is_provisional(&self) -> bool {
        self.provisional
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    fn first_of(&self, kind: Kind) -> Option<&Message> {
        self.messages.iter().map(Arc::as_ref).find(|m| m.kind == kind)
    }
}

/// A reply that is still streaming
#[derive(Debug, Clone, PartialEq)]
pub struct Provisional {
    /// Id the reply's text message will be committed under
    pub anchor: String,
    /// The user message being answered
    pub parent_id: Option<String>,
    pub buffer: StreamBuffer,
    seq: u64,
}

impl Provisional {
    pub fn new(anchor: impl Into<String>, parent_id: Option<String>, buffer: StreamBuffer) -> Self {
        Self {
            anchor: anchor.into(),
            parent_id,
            buffer,
            seq: 0,
        }
    }

    /// Render the buffered content as an alternative
    pub fn snapshot(&self) -> Alternative {
        let messages = self.buffer.to_messages(
            Author::Assistant,
            &self.anchor,
            self.parent_id.as_deref(),
            self.seq,
            Status::Completed,
        );
        Alternative {
            messages: messages.into_iter().map(Arc::new).collect(),
            provisional: true,
        }
    }
}

/// Content of an alternative slot
#[derive(Debug, Clone)]
pub enum AltNode {
    Finalized(Arc<Alternative>),
    Provisional(Provisional),
}

impl AltNode {
    pub fn id(&self) -> &str {
        match self {
            AltNode::Finalized(alt) => alt.id(),
            AltNode::Provisional(p) => &p.anchor,
        }
    }

    /// Shared view of the alternative
    pub fn view(&self) -> Arc<Alternative> {
        match self {
            AltNode::Finalized(alt) => Arc::clone(alt),
            AltNode::Provisional(p) => Arc::new(p.snapshot()),
        }
    }

    pub fn is_provisional(&self) -> bool {
        matches!(self, AltNode::Provisional(_))
    }
}

#[derive(Debug, Clone)]
struct AltSlot {
    node: AltNode,
    children: Vec<TurnIdx>,
}

/// Where a turn hangs in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParentRef {
    Root,
    Alt(TurnIdx, usize),
}

/// A user message and the alternatives replying to it
#[derive(Debug, Clone)]
pub struct TurnNode {
    parent: ParentRef,
    attachments: Vec<Arc<Message>>,
    user: Option<Arc<Message>>,
    /// User message id, or the missing parent id of orphaned replies
    reply_key: String,
    alternatives: Vec<AltSlot>,
}

impl TurnNode {
    pub fn user(&self) -> Option<&Arc<Message>> {
        self.user.as_ref()
    }

    pub fn attachments(&self) -> &[Arc<Message>] {
        &self.attachments
    }

    pub fn alternative_count(&self) -> usize {
        self.alternatives.len()
    }

    pub fn alternative(&self, index: usize) -> Option<&AltNode> {
        self.alternatives.get(index).map(|slot| &slot.node)
    }

    /// User turns replying to the alternative at `index`
    pub fn children(&self, index: usize) -> &[TurnIdx] {
        self.alternatives
            .get(index)
            .map(|slot| slot.children.as_slice())
            .unwrap_or_default()
    }

    /// Branch point grouping this turn's alternatives
    pub fn assistant_point(&self) -> BranchPointId {
        match self.user {
            Some(_) => BranchPointId::Assistant(self.reply_key.clone()),
            None => BranchPointId::Orphan(self.reply_key.clone()),
        }
    }

    /// Check if this turn holds replies whose user message is missing
    pub fn is_orphan(&self) -> bool {
        self.user.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    User(TurnIdx),
    Assistant(TurnIdx, usize),
}

enum Siblings<'a> {
    Turns(&'a [TurnIdx]),
    Alternatives(TurnIdx),
}

/// Branching tree of turns built from a message log
#[derive(Debug, Clone, Default)]
pub struct ConversationTree {
    log: Vec<Message>,
    options: BuildOptions,
    turns: Vec<TurnNode>,
    roots: Vec<TurnIdx>,
    locations: HashMap<String, Location>,
    orphans: HashMap<String, TurnIdx>,
    pending: Vec<Arc<Message>>,
}

/// Build a tree with default options
pub fn build(log: &[Message]) -> ConversationTree {
    ConversationTree::build(log)
}

impl ConversationTree {
    /// Build a tree with default options
    pub fn build(log: &[Message]) -> Self {
        Self::build_with(log, BuildOptions::default())
    }

    /// Build a tree from `log`.
    ///
    /// Messages are ordered by `created_at` (ties keep log order) and a
    /// duplicated id keeps its latest record. A message can only attach to a
    /// parent created before it; anything else is promoted to the root, which
    /// also breaks parent cycles.
    pub fn build_with(log: &[Message], options: BuildOptions) -> Self {
        let log = normalize(log);
        let mut builder = Builder::new(options);
        for message in &log {
            builder.push(Arc::new(message.clone()));
        }
        builder.finish(log)
    }

    /// Normalized log the tree was built from
    pub fn log(&self) -> &[Message] {
        &self.log
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of turn nodes
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn roots(&self) -> &[TurnIdx] {
        &self.roots
    }

    pub fn turn(&self, idx: TurnIdx) -> &TurnNode {
        &self.turns[idx]
    }

    pub fn turns(&self) -> impl Iterator<Item = (TurnIdx, &TurnNode)> {
        self.turns.iter().enumerate()
    }

    /// User attachments no user text message claimed
    pub fn pending_attachments(&self) -> &[Arc<Message>] {
        &self.pending
    }

    /// Sequence number for the next message appended to the log
    pub fn next_seq(&self) -> u64 {
        self.log.last().map_or(1, |m| m.created_at + 1)
    }

    /// Branch point the turn is a sibling under
    pub fn user_point(&self, idx: TurnIdx) -> BranchPointId {
        match self.turns[idx].parent {
            ParentRef::Root => BranchPointId::Root,
            ParentRef::Alt(t, a) => BranchPointId::User(self.turns[t].alternatives[a].node.id().to_string()),
        }
    }

    /// Turn whose user message (or attachment) has this id
    pub fn user_turn(&self, id: &str) -> Option<TurnIdx> {
        match self.locations.get(id) {
            Some(&Location::User(t)) => Some(t),
            _ => None,
        }
    }

    /// Turn and alternative index holding an assistant message with this id
    pub fn alternative_of(&self, id: &str) -> Option<(TurnIdx, usize)> {
        match self.locations.get(id) {
            Some(&Location::Assistant(t, a)) => Some((t, a)),
            _ => self.turns.iter().enumerate().find_map(|(t, node)| {
                node.alternatives
                    .iter()
                    .position(|slot| slot.node.is_provisional() && slot.node.id() == id)
                    .map(|a| (t, a))
            }),
        }
    }

    /// Number of siblings under `point`, or `None` if it has none
    pub fn sibling_count(&self, point: &BranchPointId) -> Option<usize> {
        let count = match self.siblings(point)? {
            Siblings::Turns(turns) => turns.len(),
            Siblings::Alternatives(t) => self.turns[t].alternatives.len(),
        };
        (count > 0).then_some(count)
    }

    /// Normal form of a branch point that may name any member message
    pub fn canonical(&self, point: &BranchPointId) -> Option<BranchPointId> {
        match self.siblings(point)? {
            Siblings::Turns(_) => match point {
                BranchPointId::Root => Some(BranchPointId::Root),
                _ => {
                    let (t, a) = self.alternative_of(point.message_id()?)?;
                    Some(BranchPointId::User(self.turns[t].alternatives[a].node.id().to_string()))
                }
            },
            Siblings::Alternatives(t) => Some(self.turns[t].assistant_point()),
        }
    }

    /// Every branch point with at least one sibling, with its sibling count
    pub fn branch_points(&self) -> Vec<(BranchPointId, usize)> {
        let mut points = Vec::new();
        if !self.roots.is_empty() {
            points.push((BranchPointId::Root, self.roots.len()));
        }
        for node in &self.turns {
            if node.alternatives.is_empty() {
                continue;
            }
            points.push((node.assistant_point(), node.alternatives.len()));
            for slot in &node.alternatives {
                if !slot.children.is_empty() {
                    points.push((
                        BranchPointId::User(slot.node.id().to_string()),
                        slot.children.len(),
                    ));
                }
            }
        }
        points
    }

    /// Append a streaming reply to turn `idx`, returning its alternative index
    pub(crate) fn begin_provisional(&mut self, idx: TurnIdx, mut provisional: Provisional) -> usize {
        provisional.seq = self.next_seq();
        let node = &mut self.turns[idx];
        node.alternatives.push(AltSlot {
            node: AltNode::Provisional(provisional),
            children: Vec::new(),
        });
        node.alternatives.len() - 1
    }

    pub(crate) fn provisional_mut(&mut self, idx: TurnIdx, alt: usize) -> Option<&mut Provisional> {
        match self.turns.get_mut(idx)?.alternatives.get_mut(alt) {
            Some(AltSlot {
                node: AltNode::Provisional(p),
                ..
            }) => Some(p),
            _ => None,
        }
    }

    /// Detach the streaming reply at `alt` from turn `idx`
    pub(crate) fn take_provisional(&mut self, idx: TurnIdx, alt: usize) -> Option<Provisional> {
        let node = self.turns.get_mut(idx)?;
        if alt + 1 != node.alternatives.len() || !node.alternatives[alt].node.is_provisional() {
            return None;
        }
        match node.alternatives.pop()?.node {
            AltNode::Provisional(p) => Some(p),
            AltNode::Finalized(_) => None,
        }
    }

    fn siblings(&self, point: &BranchPointId) -> Option<Siblings<'_>> {
        match point {
            BranchPointId::Root => Some(Siblings::Turns(&self.roots)),
            BranchPointId::User(id) => {
                let (t, a) = self.alternative_of(id)?;
                Some(Siblings::Turns(&self.turns[t].alternatives[a].children))
            }
            BranchPointId::Assistant(id) => self.user_turn(id).map(Siblings::Alternatives),
            BranchPointId::Orphan(id) => self.orphans.get(id).copied().map(Siblings::Alternatives),
        }
    }
}

/// Stable sort by creation order, keeping the last record of a duplicated id
fn normalize(log: &[Message]) -> Vec<Message> {
    let mut order: Vec<usize> = (0..log.len()).collect();
    order.sort_by_key(|&i| log[i].created_at);

    let mut latest: HashMap<&str, usize> = HashMap::new();
    for &i in &order {
        if let Some(prev) = latest.insert(log[i].id.as_str(), i) {
            tracing::debug!("message {} appears more than once, keeping the latest", log[prev].id);
        }
    }

    order
        .into_iter()
        .filter(|&i| latest.get(log[i].id.as_str()) == Some(&i))
        .map(|i| log[i].clone())
        .collect()
}

#[derive(Default)]
struct DraftTurn {
    parent: Option<ParentRef>,
    attachments: Vec<Arc<Message>>,
    user: Option<Arc<Message>>,
    reply_key: String,
    alternatives: Vec<DraftAlt>,
}

#[derive(Default)]
struct DraftAlt {
    messages: Vec<Arc<Message>>,
    children: Vec<TurnIdx>,
}

impl DraftAlt {
    fn has(&self, kind: Kind) -> bool {
        self.messages.iter().any(|m| m.kind == kind)
    }

    /// Whether `message` continues this reply rather than starting a new one
    fn accepts(&self, message: &Message) -> bool {
        match message.kind {
            Kind::Thinking => !self.has(Kind::Text) && !self.has(Kind::Thinking),
            Kind::Text => !self.has(Kind::Text),
            Kind::Reference | Kind::Attachment => true,
        }
    }
}

struct Builder {
    options: BuildOptions,
    turns: Vec<DraftTurn>,
    roots: Vec<TurnIdx>,
    locations: HashMap<String, Location>,
    orphans: HashMap<String, TurnIdx>,
    pending: Vec<Arc<Message>>,
}

impl Builder {
    fn new(options: BuildOptions) -> Self {
        Self {
            options,
            turns: Vec::new(),
            roots: Vec::new(),
            locations: HashMap::new(),
            orphans: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn push(&mut self, message: Arc<Message>) {
        match message.author {
            Author::User if message.kind.is_text() => self.push_user(message),
            Author::User => self.pending.push(message),
            Author::Assistant => self.push_assistant(message),
        }
    }

    fn push_user(&mut self, message: Arc<Message>) {
        let parent = match message.parent_id.as_deref() {
            None => ParentRef::Root,
            Some(parent) => match self.locations.get(parent) {
                Some(&Location::Assistant(t, a)) => ParentRef::Alt(t, a),
                _ => {
                    tracing::debug!(
                        "user message {} has no earlier assistant parent {}, promoting to root",
                        message.id,
                        parent
                    );
                    ParentRef::Root
                }
            },
        };

        let idx = self.turns.len();
        let (attachments, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|a| a.parent_id == message.parent_id);
        self.pending = rest;
        for attachment in &attachments {
            self.locations.insert(attachment.id.clone(), Location::User(idx));
        }
        self.locations.insert(message.id.clone(), Location::User(idx));

        self.turns.push(DraftTurn {
            parent: Some(parent),
            attachments,
            reply_key: message.id.clone(),
            user: Some(message),
            alternatives: Vec::new(),
        });
        self.attach(idx, parent);
    }

    fn push_assistant(&mut self, message: Arc<Message>) {
        let idx = match message.parent_id.as_deref().map(|p| self.locations.get(p)) {
            Some(Some(&Location::User(t))) => t,
            _ => self.orphan_turn(&message),
        };

        let alternatives = &mut self.turns[idx].alternatives;
        if !alternatives.last().is_some_and(|alt| alt.accepts(&message)) {
            alternatives.push(DraftAlt::default());
        }
        let a = alternatives.len() - 1;
        self.locations.insert(message.id.clone(), Location::Assistant(idx, a));
        alternatives[a].messages.push(message);
    }

    /// Turn collecting replies whose user message is unknown
    fn orphan_turn(&mut self, message: &Message) -> TurnIdx {
        let key = message.parent_id.clone().unwrap_or_default();
        if let Some(&idx) = self.orphans.get(&key) {
            return idx;
        }
        tracing::debug!(
            "assistant message {} has no earlier user parent, promoting to root",
            message.id
        );
        let idx = self.turns.len();
        self.turns.push(DraftTurn {
            parent: Some(ParentRef::Root),
            reply_key: key.clone(),
            ..DraftTurn::default()
        });
        self.attach(idx, ParentRef::Root);
        self.orphans.insert(key, idx);
        idx
    }

    fn attach(&mut self, idx: TurnIdx, parent: ParentRef) {
        match parent {
            ParentRef::Root => self.roots.push(idx),
            ParentRef::Alt(t, a) => self.turns[t].alternatives[a].children.push(idx),
        }
    }

    /// Claim leftover attachments for the closest earlier turn with the same parent
    fn claim_nearest(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for attachment in pending {
            let owner = self.turns.iter().rposition(|turn| {
                turn.user
                    .as_ref()
                    .is_some_and(|u| u.parent_id == attachment.parent_id && u.created_at <= attachment.created_at)
            });
            match owner {
                Some(idx) => {
                    self.locations.insert(attachment.id.clone(), Location::User(idx));
                    self.turns[idx].attachments.push(attachment);
                }
                None => self.pending.push(attachment),
            }
        }
    }

    fn finish(mut self, log: Vec<Message>) -> ConversationTree {
        if self.options.attachments == AttachmentPolicy::Nearest {
            self.claim_nearest();
        }
        if !self.pending.is_empty() {
            tracing::debug!("{} user attachments left unclaimed", self.pending.len());
        }

        let turns = self
            .turns
            .into_iter()
            .map(|draft| TurnNode {
                parent: draft.parent.unwrap_or(ParentRef::Root),
                attachments: draft.attachments,
                user: draft.user,
                reply_key: draft.reply_key,
                alternatives: draft
                    .alternatives
                    .into_iter()
                    .map(|alt| AltSlot {
                        node: AltNode::Finalized(Arc::new(Alternative::finalized(alt.messages))),
                        children: alt.children,
                    })
                    .collect(),
            })
            .collect();

        ConversationTree {
            log,
            options: self.options,
            turns,
            roots: self.roots,
            locations: self.locations,
            orphans: self.orphans,
            pending: self.pending,
        }
    }
}
