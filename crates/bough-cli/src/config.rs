//! Configuration file support

use crate::render::RenderOptions;
use bough_engine::{AttachmentPolicy, BuildOptions, ConversationConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for bough
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where dangling user attachments go (leading, nearest)
    pub attachment_policy: Option<AttachmentPolicy>,
    /// Reject consecutive same-role turns outside multi-slot mode too
    pub enforce_alternation: Option<bool>,
    /// Show thinking content in rendered output
    pub show_thinking: Option<bool>,
    /// Show cited references in rendered output
    pub show_references: Option<bool>,
    /// Open a slot on the first delta that names it
    pub auto_open_slots: Option<bool>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bough")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("BOUGH_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Self {
        match toml::from_str(content) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            attachment_policy: Some(AttachmentPolicy::Leading),
            enforce_alternation: Some(false),
            show_thinking: Some(true),
            show_references: Some(true),
            auto_open_slots: Some(true),
        };

        default_config.save()?;
        Ok(path)
    }

    /// Engine settings, with `attachments` from the command line taking precedence
    pub fn conversation_config(&self, attachments: Option<AttachmentPolicy>) -> ConversationConfig {
        ConversationConfig {
            build: BuildOptions {
                attachments: attachments
                    .or(self.attachment_policy)
                    .unwrap_or_default(),
            },
            enforce_alternation: self.enforce_alternation.unwrap_or(false),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        let defaults = RenderOptions::default();
        RenderOptions {
            show_thinking: self.show_thinking.unwrap_or(defaults.show_thinking),
            show_references: self.show_references.unwrap_or(defaults.show_references),
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# bough configuration file
# Place at ~/.config/bough/config.toml (Linux) or set BOUGH_CONFIG_PATH

# Which user turn claims a user attachment logged without its own text
# message: "leading" (the next one with the same parent) or "nearest"
# (also fall back to the closest earlier one)
attachment_policy = "leading"

# Reject two consecutive user or assistant turns in single-chat mode.
# Multi-slot replay (--slots) always enforces alternation.
enforce_alternation = false

# Rendering
show_thinking = true
show_references = true

# Open workflow slots on their first delta instead of rejecting them
auto_open_slots = true
"#
}
