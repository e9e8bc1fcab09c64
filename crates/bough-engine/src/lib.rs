//! bough-engine: Conversation branch engine
//!
//! This crate turns an append-only message log with edited and regenerated
//! alternatives into a navigable turn tree, resolves the path the user sees,
//! and keeps that path consistent while replies stream in.

pub mod conversation;
pub mod error;
pub mod events;
pub mod path;
pub mod selection;
pub mod session;
pub mod slots;
pub mod tree;

pub use conversation::{Conversation, ConversationConfig};
pub use error::{ProtocolError, Result};
pub use events::ReconcileEvent;
pub use path::{BranchInfo, Path, Turn, resolve, resolve_reusing};
pub use selection::{BranchPointId, Selection, default_selection, navigate};
pub use session::Session;
pub use slots::SlotDispatcher;
pub use tree::{Alternative, AltNode, AttachmentPolicy, BuildOptions, ConversationTree, TurnIdx, build};
