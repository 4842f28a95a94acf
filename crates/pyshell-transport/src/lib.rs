//! Transport layer for pyshell
//!
//! The pieces needed to talk to an interpreter over its standard streams,
//! without any session bookkeeping:
//!
//! - **Framing**: [`framing::LineFramer`] turns byte chunks into complete lines
//! - **Codecs**: [`codec::ResolvedCodec`] encodes outgoing values and decodes
//!   incoming lines, with built-in `text` and `json` strategies
//! - **Subprocess**: [`subprocess::ProcessHandle`] spawns the child with its
//!   pipes split out, [`subprocess::KillSignal`] signals it
//! - **Error handling**: [`TransportError`] shared by all of the above

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod framing;
pub mod subprocess;

// Re-export commonly used types
pub use codec::{
    DecodeError, DecodeFn, Decoder, EncodeFn, Encoder, Mode, ResolvedCodec, StreamKind,
    TextEncoding,
};
pub use error::{Result, TransportError};
pub use framing::{DEFAULT_DELIMITER, LineFramer, Lines};
pub use subprocess::{ExitInfo, KillSignal, ProcessConfig, ProcessHandle};
