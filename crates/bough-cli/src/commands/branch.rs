//! /branches, /select, /next, /prev - navigate between alternatives

use super::CommandResult;
use bough_engine::{BranchInfo, BranchPointId, Conversation};

pub struct BranchCommand;

impl BranchCommand {
    /// List every branch point on the visible path that has siblings
    pub fn list(conversation: &Conversation) -> String {
        let mut lines = Vec::new();
        for (depth, turn) in conversation.path().iter().enumerate() {
            let branches = std::iter::once(&turn.user_branch).chain(turn.assistant_branch.as_ref());
            for branch in branches.filter(|b| b.has_siblings()) {
                lines.push(format!(
                    "  {:>3}  {:<32} {}/{}",
                    depth,
                    branch.point.to_string(),
                    branch.index + 1,
                    branch.count
                ));
            }
        }
        if lines.is_empty() {
            return "No branches on the visible path.".to_string();
        }
        format!("Branch points (depth, point, shown/total):\n{}", lines.join("\n"))
    }

    /// Execute /select <bp> <index>, with a 1-based index
    pub fn select(args: &str, conversation: &mut Conversation) -> CommandResult {
        let mut parts = args.split_whitespace();
        let (Some(point), Some(index), None) = (parts.next(), parts.next(), parts.next()) else {
            return CommandResult::Message("Usage: /select <branch point> <index>".to_string());
        };
        let point = match point.parse::<BranchPointId>() {
            Ok(point) => point,
            Err(e) => return CommandResult::Message(e),
        };
        let index = match index.parse::<i64>() {
            Ok(index) => index,
            Err(_) => {
                return CommandResult::Message(format!(
                    "Invalid index '{}'. Use a number starting at 1.",
                    index
                ));
            }
        };
        Self::go(conversation, &point, index - 1)
    }

    /// Execute /next or /prev, moving `delta` siblings
    pub fn step(args: &str, conversation: &mut Conversation, delta: i64) -> CommandResult {
        let branch = if args.is_empty() {
            Self::last_branch(conversation)
        } else {
            match args.parse::<BranchPointId>() {
                Ok(point) => Self::shown(conversation, &point),
                Err(e) => return CommandResult::Message(e),
            }
        };
        let Some(branch) = branch else {
            return CommandResult::Message("Nothing to navigate there.".to_string());
        };
        let target = i64::try_from(branch.index).unwrap_or(i64::MAX).saturating_add(delta);
        Self::go(conversation, &branch.point, target)
    }

    fn go(conversation: &mut Conversation, point: &BranchPointId, index: i64) -> CommandResult {
        if conversation.tree().sibling_count(point).is_none() {
            return CommandResult::Message(format!("Unknown branch point: {}", point));
        }
        if conversation.navigate(point, index) {
            CommandResult::Render
        } else {
            CommandResult::Message("Already showing that branch.".to_string())
        }
    }

    /// Branch info for `point` as currently shown
    fn shown(conversation: &Conversation, point: &BranchPointId) -> Option<BranchInfo> {
        let canonical = conversation.tree().canonical(point)?;
        let path = conversation.path();
        if let Some(depth) = path.depth_of(&canonical) {
            let turn = &path.turns()[depth];
            return std::iter::once(&turn.user_branch)
                .chain(turn.assistant_branch.as_ref())
                .find(|b| b.point == canonical)
                .cloned();
        }
        let count = conversation.tree().sibling_count(&canonical)?;
        let index = conversation.selection().pick(&canonical, count);
        Some(BranchInfo {
            point: canonical,
            index,
            count,
        })
    }

    /// Replies of the last turn, or its user variants if it has no reply yet
    fn last_branch(conversation: &Conversation) -> Option<BranchInfo> {
        let turn = conversation.path().last()?;
        turn.assistant_branch
            .clone()
            .or_else(|| Some(turn.user_branch.clone()))
    }
}
