//! Conversation history files (JSONL)
//!
//! A session file starts with a metadata entry followed by one entry per
//! message. Bare message lines (a plain exported log) are accepted too.

use anyhow::{Context, Result};
use bough_log::Message;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Session entry types for JSONL format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEntry {
    /// Session metadata
    Metadata { id: String, created_at: i64 },
    /// A message in the conversation
    Message { message: Message, timestamp: i64 },
}

/// A loaded history file
#[derive(Debug, Clone, PartialEq)]
pub struct SessionLog {
    pub id: String,
    pub messages: Vec<Message>,
}

/// Get the sessions directory
pub fn sessions_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bough")
        .join("sessions")
}

/// Path for `arg`: an existing file, or the id of a saved session
pub fn resolve_path(arg: &str) -> PathBuf {
    let path = PathBuf::from(arg);
    if path.exists() {
        return path;
    }
    sessions_dir().join(format!("{}.jsonl", arg))
}

/// Where `--save <arg>` writes: a `.jsonl` path as given, else a session id
pub fn save_path(arg: &str) -> PathBuf {
    if arg.ends_with(".jsonl") {
        return PathBuf::from(arg);
    }
    sessions_dir().join(format!("{}.jsonl", arg))
}

/// Load a history file
pub fn load(path: &Path) -> Result<SessionLog> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut id = None;
    let mut messages = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SessionEntry>(&line) {
            Ok(SessionEntry::Metadata { id: session_id, .. }) => id = Some(session_id),
            Ok(SessionEntry::Message { message, .. }) => messages.push(message),
            Err(_) => {
                let message: Message = serde_json::from_str(&line)
                    .with_context(|| format!("{}:{}: not a message", path.display(), n + 1))?;
                messages.push(message);
            }
        }
    }

    let id = id
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "default".to_string());
    tracing::debug!("loaded {} messages for {}", messages.len(), id);
    Ok(SessionLog { id, messages })
}

/// Write `messages` as a session file, replacing any existing one
pub fn save(path: &Path, id: &str, messages: &[Message]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    let now = chrono::Utc::now().timestamp_millis();
    let metadata = SessionEntry::Metadata {
        id: id.to_string(),
        created_at: now,
    };
    writeln!(writer, "{}", serde_json::to_string(&metadata)?)?;
    for message in messages {
        let entry = SessionEntry::Message {
            message: message.clone(),
            timestamp: now,
        };
        writeln!(writer, "{}", serde_json::to_string(&entry)?)?;
    }
    writer.flush()?;
    Ok(())
}

/// Information about a saved session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: i64,
    pub message_count: usize,
}

impl SessionInfo {
    /// Format the created_at timestamp for display
    pub fn created_at_display(&self) -> String {
        use chrono::{TimeZone, Utc};
        Utc.timestamp_millis_opt(self.created_at)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// List saved sessions, newest first
pub fn list_sessions() -> std::io::Result<Vec<SessionInfo>> {
    let dir = sessions_dir();
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut sessions = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            if let Some(info) = read_session_info(&path) {
                sessions.push(info);
            }
        }
    }

    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(sessions)
}

fn read_session_info(path: &Path) -> Option<SessionInfo> {
    let file = File::open(path).ok()?;
    let mut lines = BufReader::new(file).lines().map_while(|l| l.ok());
    let SessionEntry::Metadata { id, created_at } = serde_json::from_str::<SessionEntry>(&lines.next()?).ok()? else {
        return None;
    };
    let message_count = lines
        .filter(|l| l.contains("\"type\":\"message\""))
        .count();
    Some(SessionInfo {
        id,
        created_at,
        message_count,
    })
}
