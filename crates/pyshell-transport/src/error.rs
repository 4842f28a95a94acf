//! Transport error types

use std::fmt;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors that can occur while framing, encoding or talking to a subprocess
#[derive(Debug)]
pub enum TransportError {
    /// I/O error
    Io(std::io::Error),

    /// Serialization error
    Serialization(String),

    /// Encode or decode function rejected its input
    Codec(String),

    /// Process error (spawn, signal, missing pipe)
    Process(String),

    /// Invalid argument (unknown mode, encoding or signal name)
    InvalidArgument(String),

    /// Generic transport error
    Other(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {}", err),
            Self::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Self::Codec(msg) => write!(f, "Codec error: {}", msg),
            Self::Process(msg) => write!(f, "Process error: {}", msg),
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
