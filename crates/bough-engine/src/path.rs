//! The visible path: one turn per depth, following the selection

use crate::selection::{BranchPointId, Selection};
use crate::tree::{Alternative, ConversationTree, TurnIdx};
use bough_log::Message;
use serde::Serialize;
use std::sync::Arc;

/// Position of a path element among its siblings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub point: BranchPointId,
    pub index: usize,
    pub count: usize,
}

impl BranchInfo {
    pub fn has_siblings(&self) -> bool {
        self.count > 1
    }

    pub fn has_prev(&self) -> bool {
        self.index > 0
    }

    pub fn has_next(&self) -> bool {
        self.index + 1 < self.count
    }
}

/// One element of the visible path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub node: TurnIdx,
    pub attachments: Vec<Arc<Message>>,
    pub user: Option<Arc<Message>>,
    /// Selected reply, `None` while the turn has no replies
    pub alternative: Option<Arc<Alternative>>,
    pub user_branch: BranchInfo,
    pub assistant_branch: Option<BranchInfo>,
}

impl Turn {
    /// Build the view of turn `node` showing alternative `alt`
    pub(crate) fn view(tree: &ConversationTree, node: TurnIdx, user_branch: BranchInfo, alt: Option<usize>) -> Self {
        let turn = tree.turn(node);
        let count = turn.alternative_count();
        let alt = alt.filter(|&a| a < count);
        Self {
            node,
            attachments: turn.attachments().to_vec(),
            user: turn.user().cloned(),
            alternative: alt.and_then(|a| turn.alternative(a)).map(|slot| slot.view()),
            user_branch,
            assistant_branch: alt.map(|index| BranchInfo {
                point: turn.assistant_point(),
                index,
                count,
            }),
        }
    }

    /// Index of the shown reply among its siblings
    pub fn branch_index(&self) -> usize {
        self.assistant_branch.as_ref().map_or(0, |b| b.index)
    }

    /// Number of replies to this turn's user message
    pub fn branch_count(&self) -> usize {
        self.assistant_branch.as_ref().map_or(0, |b| b.count)
    }

    /// Parent of the user message
    pub fn parent_id(&self) -> Option<&str> {
        self.user.as_ref().and_then(|u| u.parent_id.as_deref())
    }

    pub fn is_streaming(&self) -> bool {
        self.alternative.as_ref().is_some_and(|a| a.is_provisional())
    }
}

/// Turns from the root to a leaf
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path {
    turns: Vec<Arc<Turn>>,
}

impl Path {
    pub fn turns(&self) -> &[Arc<Turn>] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn get(&self, depth: usize) -> Option<&Arc<Turn>> {
        self.turns.get(depth)
    }

    pub fn last(&self) -> Option<&Arc<Turn>> {
        self.turns.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Turn>> {
        self.turns.iter()
    }

    /// Depth of the element that sits under `point`
    pub fn depth_of(&self, point: &BranchPointId) -> Option<usize> {
        self.turns.iter().position(|turn| {
            &turn.user_branch.point == point
                || turn.assistant_branch.as_ref().is_some_and(|b| &b.point == point)
        })
    }

    /// Depth showing turn `node`
    pub fn depth_of_node(&self, node: TurnIdx) -> Option<usize> {
        self.turns.iter().position(|turn| turn.node == node)
    }

    /// Replace the element at `depth`, dropping everything below it
    pub(crate) fn splice(&mut self, depth: usize, turn: Turn) {
        self.turns.truncate(depth);
        self.turns.push(Arc::new(turn));
    }
}

/// Resolve the path `selection` picks through `tree`
pub fn resolve(tree: &ConversationTree, selection: &Selection) -> Path {
    resolve_reusing(tree, selection, &Path::default())
}

/// Resolve like [`resolve`], reusing elements of `previous` that did not change.
///
/// Unchanged turns keep their `Arc`, so renderers can skip them by pointer.
pub fn resolve_reusing(tree: &ConversationTree, selection: &Selection, previous: &Path) -> Path {
    let mut turns = Vec::new();
    let mut point = BranchPointId::Root;
    let mut siblings: &[TurnIdx] = tree.roots();

    while !siblings.is_empty() {
        let index = selection.pick(&point, siblings.len());
        let node = siblings[index];
        let turn = tree.turn(node);
        let user_branch = BranchInfo {
            point,
            index,
            count: siblings.len(),
        };

        let alt = (turn.alternative_count() > 0)
            .then(|| selection.pick(&turn.assistant_point(), turn.alternative_count()));
        let view = Turn::view(tree, node, user_branch, alt);

        match previous.get(turns.len()) {
            Some(prev) if **prev == view => turns.push(Arc::clone(prev)),
            _ => turns.push(Arc::new(view)),
        }

        let Some(alt) = alt else { break };
        siblings = turn.children(alt);
        point = match turn.alternative(alt) {
            Some(slot) => BranchPointId::User(slot.id().to_string()),
            None => break,
        };
    }

    Path { turns }
}
