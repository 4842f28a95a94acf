//! Subprocess plumbing for the interpreter
//!
//! Spawns the interpreter with all three standard streams piped and
//! translates exit statuses and signal names into portable values.

pub mod process;

pub use process::{DEFAULT_SIGNAL, ExitInfo, KillSignal, ProcessConfig, ProcessHandle};
