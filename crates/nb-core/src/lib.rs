//! nb-core: Shared types and errors for the NBAudio fast path
//!
//! Foundational vocabulary used by the pipe and mixer crates: stream
//! formats, frame arithmetic, and the common error type.

mod error;
mod format;

pub use error::*;
pub use format::*;
