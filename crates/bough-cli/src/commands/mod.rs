//! Slash commands for interactive mode

mod branch;

pub use branch::BranchCommand;

use bough_engine::Conversation;

/// Result of executing a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Print the current path
    Render,
    /// Show a message to the user
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, conversation: &mut Conversation) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "quit" | "exit" | "q" => CommandResult::Exit,

        "path" | "p" => CommandResult::Render,

        "branches" | "b" => CommandResult::Message(BranchCommand::list(conversation)),

        "select" | "s" => BranchCommand::select(args, conversation),

        "next" | "n" => BranchCommand::step(args, conversation, 1),

        "prev" => BranchCommand::step(args, conversation, -1),

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?          Show this help message
  /path, /p              Print the visible path
  /branches, /b          List branch points on the visible path
  /select, /s <bp> <i>   Show sibling i (1-based) at branch point bp
  /next, /n [bp]         Show the next sibling (default: last reply)
  /prev [bp]             Show the previous sibling (default: last reply)
  /quit, /exit, /q       Exit bough

Branch points are written root, user:<assistant id>, assistant:<user id>
or orphan:<missing parent id>.

Examples:
  /select assistant:u1 1   Show the first reply to message u1
  /next user:a3            Show the next edit of the question after a3
  /prev                    Show the previous reply to the last question"#
        .to_string()
}
