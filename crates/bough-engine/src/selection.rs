//! Branch points and the user's choice at each of them

use crate::tree::ConversationTree;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identifies a set of siblings by the parent they share.
///
/// The textual form is `root`, `user:<assistant id>`, `assistant:<user id>`
/// or `orphan:<missing parent id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BranchPointId {
    /// User turns with no parent
    Root,
    /// User turns (edits) replying to this assistant reply
    User(String),
    /// Assistant replies (regenerations) to this user message
    Assistant(String),
    /// Replies whose user message was never seen before them, keyed by the
    /// parent id they name
    Orphan(String),
}

impl BranchPointId {
    /// Parent message id, `None` for the root
    pub fn message_id(&self) -> Option<&str> {
        match self {
            BranchPointId::Root => None,
            BranchPointId::User(id) | BranchPointId::Assistant(id) | BranchPointId::Orphan(id) => {
                Some(id)
            }
        }
    }
}

impl fmt::Display for BranchPointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchPointId::Root => f.write_str("root"),
            BranchPointId::User(id) => write!(f, "user:{id}"),
            BranchPointId::Assistant(id) => write!(f, "assistant:{id}"),
            BranchPointId::Orphan(id) => write!(f, "orphan:{id}"),
        }
    }
}

impl FromStr for BranchPointId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "root" {
            return Ok(BranchPointId::Root);
        }
        match s.split_once(':') {
            Some(("user", id)) => Ok(BranchPointId::User(id.to_string())),
            Some(("assistant", id)) => Ok(BranchPointId::Assistant(id.to_string())),
            Some(("orphan", id)) => Ok(BranchPointId::Orphan(id.to_string())),
            _ => Err(format!(
                "invalid branch point '{s}' (expected root, user:<id>, assistant:<id> or orphan:<id>)"
            )),
        }
    }
}

impl Serialize for BranchPointId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BranchPointId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Chosen sibling index per branch point.
///
/// A missing entry means "the most recent sibling".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Selection(BTreeMap<BranchPointId, usize>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, point: &BranchPointId) -> Option<usize> {
        self.0.get(point).copied()
    }

    pub fn set(&mut self, point: BranchPointId, index: usize) {
        self.0.insert(point, index);
    }

    pub fn remove(&mut self, point: &BranchPointId) -> Option<usize> {
        self.0.remove(point)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BranchPointId, usize)> {
        self.0.iter().map(|(point, &index)| (point, index))
    }

    /// Index to show among `count` siblings, defaulting to the last.
    ///
    /// `count` must be non-zero.
    pub fn pick(&self, point: &BranchPointId, count: usize) -> usize {
        let last = count.saturating_sub(1);
        self.get(point).map_or(last, |index| index.min(last))
    }

    /// Clamp entries to the tree and drop those it no longer has
    pub fn reconcile(&mut self, tree: &ConversationTree) {
        self.0.retain(|point, index| match tree.sibling_count(point) {
            Some(count) => {
                *index = (*index).min(count - 1);
                true
            }
            None => {
                tracing::trace!("dropping selection for vanished branch point {}", point);
                false
            }
        });
    }

    /// Point every listed branch point at its most recent sibling
    pub fn select_latest<I>(&mut self, tree: &ConversationTree, points: I)
    where
        I: IntoIterator<Item = BranchPointId>,
    {
        for point in points {
            if let Some(count) = tree.sibling_count(&point) {
                self.set(point, count - 1);
            }
        }
    }
}

impl FromIterator<(BranchPointId, usize)> for Selection {
    fn from_iter<T: IntoIterator<Item = (BranchPointId, usize)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Select the most recent sibling at every branch point of `tree`
pub fn default_selection(tree: &ConversationTree) -> Selection {
    tree.branch_points()
        .into_iter()
        .map(|(point, count)| (point, count - 1))
        .collect()
}

/// Copy of `selection` with `point` moved to `index`, clamped to its siblings.
///
/// A branch point the tree does not have leaves the selection unchanged.
pub fn navigate(
    selection: &Selection,
    tree: &ConversationTree,
    point: &BranchPointId,
    index: i64,
) -> Selection {
    let mut next = selection.clone();
    let (Some(point), Some(count)) = (tree.canonical(point), tree.sibling_count(point)) else {
        tracing::debug!("ignoring navigation to unknown branch point {}", point);
        return next;
    };
    let index = usize::try_from(index.max(0)).unwrap_or(usize::MAX).min(count - 1);
    next.set(point, index);
    next
}

/// Branch points of `after` that have more siblings than in `before`
pub fn grown_points(before: &ConversationTree, after: &ConversationTree) -> Vec<BranchPointId> {
    after
        .branch_points()
        .into_iter()
        .filter(|(point, count)| before.sibling_count(point).unwrap_or(0) < *count)
        .map(|(point, _)| point)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::{assistant, branched_log, user};

    #[test]
    fn test_branch_point_text_form() {
        for text in ["root", "user:a1", "assistant:u1", "assistant:", "orphan:u9"] {
            let point: BranchPointId = text.parse().unwrap();
            assert_eq!(point.to_string(), text);
        }
        assert_eq!(
            "user:a:b".parse::<BranchPointId>().unwrap(),
            BranchPointId::User("a:b".into())
        );
        assert!("turn:1".parse::<BranchPointId>().is_err());
        assert!("".parse::<BranchPointId>().is_err());
    }

    #[test]
    fn test_selection_json_uses_text_keys() {
        let mut selection = Selection::new();
        selection.set(BranchPointId::Assistant("u1".into()), 1);
        selection.set(BranchPointId::Root, 0);
        let json = serde_json::to_string(&selection).unwrap();
        assert_eq!(json, r#"{"root":0,"assistant:u1":1}"#);
        let back: Selection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, selection);
    }

    #[test]
    fn test_default_selection_picks_latest() {
        let tree = crate::tree::build(&branched_log());
        let selection = default_selection(&tree);
        assert_eq!(selection.get(&BranchPointId::Root), Some(0));
        assert_eq!(selection.get(&BranchPointId::Assistant("u1".into())), Some(1));
        assert_eq!(selection.get(&BranchPointId::User("a1".into())), Some(1));
        assert_eq!(selection.get(&BranchPointId::Assistant("u2".into())), Some(0));
    }

    #[test]
    fn test_default_selection_of_empty_tree() {
        assert!(default_selection(&crate::tree::build(&[])).is_empty());
    }

    #[test]
    fn test_pick_defaults_and_clamps() {
        let mut selection = Selection::new();
        let point = BranchPointId::Assistant("u1".into());
        assert_eq!(selection.pick(&point, 3), 2);
        selection.set(point.clone(), 7);
        assert_eq!(selection.pick(&point, 3), 2);
        selection.set(point.clone(), 0);
        assert_eq!(selection.pick(&point, 3), 0);
    }

    #[test]
    fn test_navigate_clamps_both_ends() {
        let tree = crate::tree::build(&branched_log());
        let point = BranchPointId::Assistant("u1".into());
        let selection = default_selection(&tree);

        let low = navigate(&selection, &tree, &point, -5);
        assert_eq!(low.get(&point), Some(0));
        let high = navigate(&selection, &tree, &point, 99);
        assert_eq!(high.get(&point), Some(1));
        assert_eq!(selection.get(&point), Some(1));
    }

    #[test]
    fn test_navigate_unknown_point_is_noop() {
        let tree = crate::tree::build(&branched_log());
        let selection = default_selection(&tree);
        let next = navigate(&selection, &tree, &BranchPointId::User("nope".into()), 0);
        assert_eq!(next, selection);
    }

    #[test]
    fn test_navigate_canonicalizes_member_ids() {
        let tree = crate::tree::build(&[
            user("u1", None, 1),
            bough_log::Message::assistant("a1.thinking", Some("u1"), "..", 2)
                .with_kind(bough_log::Kind::Thinking),
            assistant("a1", "u1", 3),
            user("u2", Some("a1"), 4),
            user("u2b", Some("a1"), 5),
        ]);
        let next = navigate(
            &Selection::new(),
            &tree,
            &BranchPointId::User("a1.thinking".into()),
            0,
        );
        assert_eq!(next.get(&BranchPointId::User("a1".into())), Some(0));
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn test_reconcile_clamps_and_drops() {
        let tree = crate::tree::build(&branched_log());
        let mut selection = Selection::new();
        selection.set(BranchPointId::Assistant("u1".into()), 5);
        selection.set(BranchPointId::Assistant("deleted".into()), 0);
        selection.reconcile(&tree);
        assert_eq!(selection.get(&BranchPointId::Assistant("u1".into())), Some(1));
        assert_eq!(selection.get(&BranchPointId::Assistant("deleted".into())), None);
    }

    #[test]
    fn test_grown_points() {
        let mut log = branched_log();
        let before = crate::tree::build(&log);
        log.push(assistant("a2b", "u2", 7));
        log.push(user("u3", Some("a2"), 8));
        let after = crate::tree::build(&log);
        let grown = grown_points(&before, &after);
        assert_eq!(
            grown,
            [
                BranchPointId::Assistant("u2".into()),
                BranchPointId::User("a2".into()),
            ]
        );
    }
}
