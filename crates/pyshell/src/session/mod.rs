//! Interpreter sessions
//!
//! A [`Session`] wraps one interpreter process. Its streams are driven by a
//! background task; the [`TerminationArbiter`] decides when the session is
//! over and what it reports.

pub mod arbiter;
mod core;
mod driver;
pub mod state;

pub use arbiter::{
    Completion, InvocationContext, TerminationArbiter, TerminationOutcome, UNKNOWN_EXIT_CODE,
    raises_error_event,
};
pub use self::core::{Session, SessionBuilder};
pub use state::{CompletionCallback, SessionPhase};
