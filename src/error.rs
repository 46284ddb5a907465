//! Crate-level errors.
//!
//! Four error kinds cover the whole system:
//!
//! - [`Error::Validation`]: rejected input (unknown store, duplicate
//!   registration, invalid category). Reported to the caller as a
//!   negative reply, never propagated as a failure.
//! - [`Error::Transport`]: an RPC timed out or the connection failed.
//!   Counted as a negative ack and flips the peer's liveness; never
//!   fatal to the process.
//! - [`Error::Quorum`]: W was not met on a write, or R / agreement was
//!   not met on a read.
//! - [`Error::Config`]: missing CSV, malformed row, bind failure.
//!   Fatal at startup; the process exits non-zero.

use std::{io, result};
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Errors produced by any dealcast component.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// Rejected input. Surfaces to the remote caller as ok=false.
    #[error("validation failed: {0}")]
    Validation(String),

    /// RPC timeout or connection failure.
    #[error("transport error: {0:?}")]
    Transport(io::ErrorKind),

    /// A quorum policy was not satisfied.
    #[error("quorum not reached: {0}")]
    Quorum(String),

    /// Startup-time configuration problem.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True if this error should be treated as a negative ack rather
    /// than an operational failure.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::Validation(a), Error::Validation(b)) => a == b,
            (Error::Transport(a), Error::Transport(b)) => a == b,
            (Error::Quorum(a), Error::Quorum(b)) => a == b,
            (Error::Config(a), Error::Config(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Transport(e.kind())
    }
}
