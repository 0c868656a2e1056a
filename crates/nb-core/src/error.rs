//! Error types for NBAudio

use thiserror::Error;

/// Unified error type for pipe and mixer control operations.
///
/// Data-path calls never return these; underruns and overruns on the hot
/// path are reported through counters instead so the fast thread stays
/// allocation- and branch-cheap.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NbError {
    #[error("No offered format accepted by this endpoint")]
    Negotiate,

    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error("Invalid format: {0}")]
    InvalidFormat(&'static str),

    #[error("Track slot {slot} out of range (max {max})")]
    InvalidSlot { slot: usize, max: usize },
}

/// Result type alias
pub type NbResult<T> = Result<T, NbError>;
