//! # Error Types
//!
//! Purpose: One error enum shared by the buffer, the reactor and the client so
//! every fallible operation returns the same `Result` type.
//!
//! ## Design Principles
//! 1. **Typed Results**: Failures travel as values; nothing unwinds.
//! 2. **Cheap Classification**: `ErrorKind` is `Copy` so callers can match on
//!    the category without holding the payload.
//! 3. **Diagnostics on the Side**: `LastError` keeps a rendered copy of the
//!    most recent failure on long-lived objects for logging only.

use std::fmt;
use std::io;

use thiserror::Error;

/// Result type used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the buffer, the event loop and the client.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket-level failure other than `WouldBlock`/`Interrupted`.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// The peer closed the connection.
    #[error("server closed the connection")]
    Eof,
    /// Malformed RESP framing.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A buffer could not grow.
    #[error("out of memory")]
    OutOfMemory,
    /// Malformed command template or argument mismatch.
    #[error("format error: {0}")]
    Format(String),
    /// Descriptor does not fit the event loop's slot table.
    #[error("descriptor {fd} out of range (setsize {setsize})")]
    OutOfRange { fd: i32, setsize: usize },
    /// The readiness backend rejected a registration or failed to wait.
    #[error("event backend error: {0}")]
    Backend(io::Error),
    /// `exec` was called with nothing queued.
    #[error("no pending commands to execute")]
    NoPendingCommands,
    /// The server rejected the configured password.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// A configuration document could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Error category without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Eof,
    Protocol,
    OutOfMemory,
    Format,
    OutOfRange,
    Backend,
    NoPendingCommands,
    Auth,
    Config,
}

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Eof => ErrorKind::Eof,
            Error::Protocol(_) => ErrorKind::Protocol,
            Error::OutOfMemory => ErrorKind::OutOfMemory,
            Error::Format(_) => ErrorKind::Format,
            Error::OutOfRange { .. } => ErrorKind::OutOfRange,
            Error::Backend(_) => ErrorKind::Backend,
            Error::NoPendingCommands => ErrorKind::NoPendingCommands,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns true when the error means the connection is unusable.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self.kind(), ErrorKind::Io | ErrorKind::Eof)
    }

    /// Shorthand for a `Protocol` error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }
}

/// Sticky diagnostic copy of the most recent failure on an object.
///
/// Stored by `Connection` and `ReplyReader`; cleared when the next cycle
/// starts. Control flow always uses the returned `Result`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

impl LastError {
    pub fn new(err: &Error) -> Self {
        LastError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl From<&Error> for LastError {
    fn from(err: &Error) -> Self {
        LastError::new(err)
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
