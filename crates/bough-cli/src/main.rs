//! bough - replay, inspect and navigate branching conversation logs

mod commands;
mod config;
mod render;
mod replay;
mod session;

use anyhow::Context;
use bough_engine::{AttachmentPolicy, BranchPointId, Conversation, Session, SlotDispatcher};
use clap::Parser;
use render::RenderOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// bough - conversation branch engine
#[derive(Parser, Debug)]
#[command(name = "bough")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// History file (JSONL) or saved session id to open
    #[arg(short, long)]
    log: Option<String>,

    /// Stream fixture (JSONL deltas, chat payloads or workflow events) to replay
    #[arg(short, long)]
    deltas: Option<String>,

    /// Treat the stream as a multi-slot workflow run
    #[arg(long)]
    slots: bool,

    /// Show sibling IDX (1-based) at a branch point: [SLOT@]BP=IDX
    #[arg(short, long = "select", value_parser = parse_select)]
    selects: Vec<SelectArg>,

    /// Cancel the replay after this many deltas
    #[arg(long)]
    cancel_after: Option<usize>,

    /// Where dangling user attachments go (leading, nearest)
    #[arg(long, value_parser = parse_attachments)]
    attachments: Option<AttachmentPolicy>,

    /// Print the path as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Save the resulting log to a .jsonl path or session id
    #[arg(long)]
    save: Option<String>,

    /// Navigate interactively after replay
    #[arg(short, long)]
    interactive: bool,

    /// Slot to navigate in interactive mode (default: the first)
    #[arg(long)]
    slot: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// List saved sessions
    #[arg(long)]
    sessions: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

/// A `--select` argument
#[derive(Debug, Clone, PartialEq, Eq)]
struct SelectArg {
    slot: Option<String>,
    point: BranchPointId,
    index: i64,
}

fn parse_select(s: &str) -> Result<SelectArg, String> {
    let (target, index) = s
        .rsplit_once('=')
        .ok_or_else(|| format!("expected [SLOT@]BP=IDX, got '{}'", s))?;
    let index: i64 = index
        .parse()
        .map_err(|_| format!("invalid index '{}'", index))?;
    let (slot, point) = match target.split_once('@') {
        Some((slot, point)) => (Some(slot.to_string()), point),
        None => (None, target),
    };
    Ok(SelectArg {
        slot,
        point: point.parse()?,
        index: index - 1,
    })
}

fn parse_attachments(s: &str) -> Result<AttachmentPolicy, String> {
    match s.to_lowercase().as_str() {
        "leading" => Ok(AttachmentPolicy::Leading),
        "nearest" => Ok(AttachmentPolicy::Nearest),
        _ => Err(format!("unknown attachment policy '{}' (leading, nearest)", s)),
    }
}

/// Single-chat session or multi-slot workflow run
enum Engine {
    Single(Session),
    Slots(SlotDispatcher),
}

impl Engine {
    fn conversations(&self) -> Vec<&Conversation> {
        match self {
            Engine::Single(session) => session.active().into_iter().collect(),
            Engine::Slots(dispatcher) => dispatcher.slots().collect(),
        }
    }

    fn conversation_mut(&mut self, slot: Option<&str>) -> Option<&mut Conversation> {
        match self {
            Engine::Single(session) => session.active_mut(),
            Engine::Slots(dispatcher) => {
                let slot = match slot {
                    Some(slot) => slot.to_string(),
                    None => dispatcher.slots().next()?.id().to_string(),
                };
                dispatcher.slot_mut(&slot)
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the rendered path
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("bough=debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .init();
    }

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // List sessions and exit
    if args.sessions {
        return list_sessions();
    }

    let cfg = config::Config::load();
    let conversation_config = cfg.conversation_config(args.attachments);
    let render_options = cfg.render_options();

    let log = match &args.log {
        Some(arg) => session::load(&session::resolve_path(arg))?,
        None => session::SessionLog {
            id: uuid::Uuid::new_v4().to_string(),
            messages: Vec::new(),
        },
    };
    tracing::debug!("opening {} ({} messages)", log.id, log.messages.len());

    let mut engine = if args.slots {
        let mut dispatcher = SlotDispatcher::new(conversation_config)
            .with_auto_open(cfg.auto_open_slots.unwrap_or(true));
        if !log.messages.is_empty() {
            dispatcher.open_slot(log.id.clone(), &log.messages);
        }
        Engine::Slots(dispatcher)
    } else {
        let mut session = Session::new(conversation_config);
        session.open(log.id.clone(), &log.messages);
        Engine::Single(session)
    };

    if let Some(fixture) = &args.deltas {
        let token = CancellationToken::new();
        let ctrl_c = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                ctrl_c.cancel();
            }
        });

        let rx = replay::spawn_reader(fixture.into(), log.id.clone(), token.clone())
            .await
            .context("starting replay")?;
        let stats = match &mut engine {
            Engine::Single(session) => replay::run(session, rx, token, args.cancel_after).await,
            Engine::Slots(dispatcher) => {
                replay::run(dispatcher, rx, token, args.cancel_after).await
            }
        };
        if stats.rejected > 0 {
            eprintln!("{} deltas rejected (run with -v for details)", stats.rejected);
        }
        tracing::info!(
            "replayed {} deltas, {} commits{}",
            stats.deltas,
            stats.committed,
            if stats.canceled { " (canceled)" } else { "" }
        );
    }

    for select in &args.selects {
        let Some(conversation) = engine.conversation_mut(select.slot.as_deref()) else {
            eprintln!("No conversation for --select {}", select.point);
            continue;
        };
        if conversation.tree().sibling_count(&select.point).is_none() {
            eprintln!("Unknown branch point: {}", select.point);
            continue;
        }
        conversation.navigate(&select.point, select.index);
    }

    for conversation in engine.conversations() {
        if args.json {
            println!("{}", render::path_json(conversation)?);
        } else {
            print!("{}", render::render_path(conversation, render_options));
        }
    }

    if let Some(target) = &args.save {
        save(&engine, target)?;
    }

    if args.interactive {
        let Some(conversation) = engine.conversation_mut(args.slot.as_deref()) else {
            anyhow::bail!("nothing to navigate");
        };
        run_interactive(conversation, render_options)?;
    }

    Ok(())
}

/// Save each conversation's log; extra slots get `-<slot>` appended
fn save(engine: &Engine, target: &str) -> anyhow::Result<()> {
    let conversations = engine.conversations();
    let several = conversations.len() > 1;
    for conversation in conversations {
        let path = if several {
            let stem = target.strip_suffix(".jsonl").unwrap_or(target);
            session::save_path(&format!("{}-{}.jsonl", stem, conversation.id()))
        } else {
            session::save_path(target)
        };
        session::save(&path, conversation.id(), conversation.log())?;
        eprintln!("Saved {} to {}", conversation.id(), path.display());
    }
    Ok(())
}

fn run_interactive(conversation: &mut Conversation, options: RenderOptions) -> anyhow::Result<()> {
    use std::io::{self, Write};

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("bough ({}) - /help for commands", conversation.id());
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match commands::execute_command(input, conversation) {
            Some(commands::CommandResult::Render) => {
                print!("{}", render::render_path(conversation, options));
            }
            Some(commands::CommandResult::Message(msg)) => {
                println!("{}", msg);
            }
            Some(commands::CommandResult::Exit) => break,
            Some(commands::CommandResult::Unknown(cmd)) => {
                println!("Unknown command: /{}", cmd);
                println!("Type /help for available commands.");
            }
            None => {
                println!("Commands start with '/'. Type /help for available commands.");
            }
        }
    }

    Ok(())
}

fn list_sessions() -> anyhow::Result<()> {
    match session::list_sessions() {
        Ok(sessions) => {
            if sessions.is_empty() {
                println!("No saved sessions found.");
                println!("Sessions are stored in: {}", session::sessions_dir().display());
            } else {
                println!("Saved sessions:\n");
                println!("{:<38} {:<20} Msgs", "ID", "Created");
                println!("{}", "-".repeat(66));
                for s in sessions {
                    println!(
                        "{:<38} {:<20} {}",
                        s.id,
                        s.created_at_display(),
                        s.message_count
                    );
                }
                println!("\nOpen with: bough --log <session-id>");
            }
        }
        Err(e) => {
            eprintln!("Error listing sessions: {}", e);
        }
    }
    Ok(())
}
