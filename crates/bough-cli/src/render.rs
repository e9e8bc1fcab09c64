//! Text and JSON rendering of the visible path

use bough_engine::{BranchInfo, Conversation, Turn};
use bough_log::{Message, Status};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// What to include besides user and assistant text
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub show_thinking: bool,
    pub show_references: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            show_thinking: true,
            show_references: true,
        }
    }
}

/// Render the conversation's path as indented text.
///
/// Turns with siblings carry a `< i/n >` marker and the branch point to
/// pass to `/select`.
pub fn render_path(conversation: &Conversation, options: RenderOptions) -> String {
    RenderedPath {
        conversation,
        options,
    }
    .to_string()
}

struct RenderedPath<'a> {
    conversation: &'a Conversation,
    options: RenderOptions,
}

impl fmt::Display for RenderedPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "== {} ==", self.conversation.id())?;
        if self.conversation.path().is_empty() {
            writeln!(f, "(empty conversation)")?;
        }
        for turn in self.conversation.path().iter() {
            render_turn(f, turn, self.options)?;
        }
        if self.conversation.is_streaming() {
            writeln!(f, "... streaming")?;
        }
        Ok(())
    }
}

fn render_turn(f: &mut fmt::Formatter<'_>, turn: &Turn, options: RenderOptions) -> fmt::Result {
    match &turn.user {
        Some(user) => {
            writeln!(f, "user {}{}", user.id, marker(&turn.user_branch))?;
            for attachment in &turn.attachments {
                writeln!(f, "  [attachment] {}", attachment.content)?;
            }
            write_body(f, &user.content)?;
        }
        None => writeln!(f, "(missing user message){}", marker(&turn.user_branch))?,
    }

    let (Some(alt), Some(branch)) = (&turn.alternative, &turn.assistant_branch) else {
        return Ok(());
    };
    let status = match alt.status() {
        Status::Completed => String::new(),
        other => format!("  ({other})"),
    };
    let streaming = if alt.is_provisional() { "  ..." } else { "" };
    writeln!(f, "assistant {}{}{}{}", alt.id(), marker(branch), status, streaming)?;

    if options.show_thinking {
        if let Some(thinking) = alt.thinking() {
            for line in thinking.content.lines() {
                writeln!(f, "  | {line}")?;
            }
        }
    }
    if let Some(text) = alt.text() {
        write_body(f, &text.content)?;
    }
    if options.show_references {
        for reference in alt.references() {
            writeln!(f, "  [ref] {}", reference.content)?;
        }
    }
    if let Some(usage) = alt.usage() {
        writeln!(
            f,
            "  [tokens] {} prompt / {} completion / {} total",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        )?;
    }
    Ok(())
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &str) -> fmt::Result {
    for line in body.lines() {
        writeln!(f, "  {line}")?;
    }
    Ok(())
}

fn marker(branch: &BranchInfo) -> String {
    if branch.has_siblings() {
        format!("  < {}/{} >  [{}]", branch.index + 1, branch.count, branch.point)
    } else {
        String::new()
    }
}

#[derive(Serialize)]
struct PathView<'a> {
    conversation: &'a str,
    streaming: bool,
    turns: Vec<TurnView<'a>>,
}

#[derive(Serialize)]
struct TurnView<'a> {
    user: Option<&'a Message>,
    attachments: Vec<&'a Message>,
    user_branch: &'a BranchInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant_branch: Option<&'a BranchInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alternative: Option<AlternativeView<'a>>,
}

#[derive(Serialize)]
struct AlternativeView<'a> {
    id: &'a str,
    status: Status,
    provisional: bool,
    messages: Vec<&'a Message>,
}

/// Render the conversation's path as a JSON document
pub fn path_json(conversation: &Conversation) -> serde_json::Result<String> {
    let turns = conversation
        .path()
        .iter()
        .map(|turn| TurnView {
            user: turn.user.as_deref(),
            attachments: turn.attachments.iter().map(Arc::as_ref).collect(),
            user_branch: &turn.user_branch,
            assistant_branch: turn.assistant_branch.as_ref(),
            alternative: turn.alternative.as_deref().map(|alt| AlternativeView {
                id: alt.id(),
                status: alt.status(),
                provisional: alt.is_provisional(),
                messages: alt.messages().iter().map(Arc::as_ref).collect(),
            }),
        })
        .collect();
    serde_json::to_string_pretty(&PathView {
        conversation: conversation.id(),
        streaming: conversation.is_streaming(),
        turns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bough_engine::ConversationConfig;
    use bough_log::Kind;

    fn conversation() -> Conversation {
        Conversation::open(
            "c1",
            &[
                Message::user("f1", None, "photo.png", 1).with_kind(Kind::Attachment),
                Message::user("u1", None, "What is this?", 2),
                Message::assistant("a1.thinking", Some("u1"), "look closely", 3)
                    .with_kind(Kind::Thinking),
                Message::assistant("a1", Some("u1"), "A cat.", 4),
                Message::assistant("a1.ref0", Some("u1"), "cats.pdf", 5).with_kind(Kind::Reference),
                Message::assistant("a2", Some("u1"), "A dog?", 6).with_status(Status::Canceled),
            ],
            ConversationConfig::default(),
        )
    }

    #[test]
    fn test_render_marks_branches_and_status() {
        let text = render_path(&conversation(), RenderOptions::default());
        assert!(text.contains("user u1\n"));
        assert!(text.contains("  [attachment] photo.png"));
        assert!(text.contains("assistant a2  < 2/2 >  [assistant:u1]  (canceled)"));
        assert!(text.contains("  A dog?"));
    }

    #[test]
    fn test_render_hides_thinking_and_references() {
        let mut conversation = conversation();
        conversation.navigate(&"assistant:u1".parse().unwrap(), 0);
        let options = RenderOptions {
            show_thinking: false,
            show_references: false,
        };
        let text = render_path(&conversation, options);
        assert!(text.contains("assistant a1  < 1/2 >"));
        assert!(!text.contains("look closely"));
        assert!(!text.contains("cats.pdf"));

        let full = render_path(&conversation, RenderOptions::default());
        assert!(full.contains("  | look closely"));
        assert!(full.contains("  [ref] cats.pdf"));
    }

    #[test]
    fn test_render_empty() {
        let empty = Conversation::new("c0", ConversationConfig::default());
        assert_eq!(render_path(&empty, RenderOptions::default()), "== c0 ==\n(empty conversation)\n");
    }

    #[test]
    fn test_render_orphan_with_usage() {
        let usage = bough_log::Usage {
            prompt_tokens: 7,
            completion_tokens: 3,
            total_tokens: 10,
        };
        let orphan = Conversation::open(
            "c2",
            &[Message::assistant("a9", Some("gone"), "line one\nline two", 1).with_usage(usage)],
            ConversationConfig::default(),
        );
        assert_eq!(
            render_path(&orphan, RenderOptions::default()),
            "== c2 ==\n\
             (missing user message)\n\
             assistant a9\n  line one\n  line two\n\
             \x20 [tokens] 7 prompt / 3 completion / 10 total\n"
        );
    }

    #[test]
    fn test_path_json() {
        let json = path_json(&conversation()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["conversation"], "c1");
        let turn = &value["turns"][0];
        assert_eq!(turn["user"]["id"], "u1");
        assert_eq!(turn["attachments"][0]["id"], "f1");
        assert_eq!(turn["assistant_branch"]["point"], "assistant:u1");
        assert_eq!(turn["assistant_branch"]["count"], 2);
        assert_eq!(turn["alternative"]["status"], "canceled");
        assert_eq!(turn["user_branch"]["point"], "root");
    }
}
