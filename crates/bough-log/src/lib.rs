//! bough-log: Message log and stream delta types
//!
//! This crate defines the records the branch engine consumes: finalized log
//! messages, live stream deltas, and decoding of recorded server payloads.

pub mod error;
pub mod payload;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use payload::{Decoded, Payload};
pub use stream::{Delta, DeltaKind, StreamBuffer};
pub use types::*;
