//! Error types for pyshell
//!
//! Construction failures ([`ShellError::InvalidArgument`],
//! [`ShellError::Spawn`]) are returned before any session exists.
//! Termination failures are a [`ProcessError`], delivered through the
//! completion callback and/or the `error` event. A line that a decode function
//! rejects becomes [`ShellError::Decode`] at the moment it arrives and never
//! affects how the session terminates.

use pyshell_transport::{DecodeError, TransportError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for pyshell operations
pub type Result<T> = std::result::Result<T, ShellError>;

/// The interpreter exited with a non-zero code
///
/// The message is the diagnostic text the process wrote to stderr, or a
/// generic `process exited with code N` when it wrote none.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessError {
    /// Human-readable failure description
    pub message: String,
    /// Everything the process wrote to stderr, if anything
    pub traceback: Option<String>,
    /// Interpreter executable that was run
    pub executable: PathBuf,
    /// Interpreter-level options, `None` when there were none
    pub options: Option<Vec<String>>,
    /// Script path as passed to the interpreter
    pub script: PathBuf,
    /// Script arguments, `None` when there were none
    pub args: Option<Vec<String>>,
    /// Exit code of the process
    pub exit_code: i32,
}

/// Errors that can occur when driving an interpreter session
#[derive(Debug, Error)]
pub enum ShellError {
    /// A caller-supplied argument was rejected before anything was spawned
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The interpreter could not be started
    #[error("Failed to spawn {}: {source}", .executable.display())]
    Spawn {
        /// Executable that failed to start
        executable: PathBuf,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// The interpreter exited with a non-zero code
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// A decode function rejected an incoming line
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// An outgoing message could not be encoded
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// An outgoing message could not be converted to a JSON value
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Write attempted after `end` or `terminate`
    #[error("stdin is closed: the session was ended or terminated")]
    StdinClosed,

    /// `py_compile` rejected the checked code
    #[error("Syntax check failed: {stderr}")]
    Syntax {
        /// Compiler diagnostics
        stderr: String,
    },

    /// A helper command exited unsuccessfully
    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed {
        /// Command line that was run
        command: String,
        /// What it wrote to stderr
        stderr: String,
    },

    /// Transport-level failure
    #[error("Transport error: {0}")]
    Transport(TransportError),

    /// Filesystem or pipe I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShellError {
    /// Create a new `InvalidArgument` error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// The process failure, if this is one
    pub fn as_process_error(&self) -> Option<&ProcessError> {
        match self {
            Self::Process(err) => Some(err),
            _ => None,
        }
    }

    /// Exit code carried by a process failure
    pub fn exit_code(&self) -> Option<i32> {
        self.as_process_error().map(|err| err.exit_code)
    }
}

impl From<TransportError> for ShellError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidArgument(msg) => Self::InvalidArgument(msg),
            TransportError::Codec(msg) => Self::Encode(msg),
            TransportError::Io(err) => Self::Io(err),
            other => Self::Transport(other),
        }
    }
}
