//! # pyshell
//!
//! Run Python scripts as child processes and exchange messages with them over
//! their standard streams.
//!
//! A [`Session`] spawns the interpreter, writes encoded messages to its stdin
//! and emits every decoded stdout and stderr line as an event. It finishes once
//! stdout and stderr have closed and the process has exited, reporting a
//! [`Completion`] to the callback given to [`Session::end`].
//!
//! ## Quick start
//!
//! ```no_run
//! use pyshell::{Mode, Session, ShellConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ShellConfig::from_env()?;
//!     let mut session = Session::builder("worker.py")
//!         .options(config.options().with_mode(Mode::Json))
//!         .on_message(|msg| println!("reply: {}", msg.value))
//!         .on_stderr(|line| eprintln!("worker: {}", line.raw))
//!         .spawn(&config)?;
//!
//!     session.send(serde_json::json!({"command": "do_stuff"}))?;
//!     let completion = session.end_and_wait().await?;
//!     if let Some(err) = completion.error {
//!         eprintln!("worker failed ({}): {}", err.exit_code, err);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! For one-shot use see [`run`], [`run_string`] and [`check_syntax`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod runner;
pub mod session;

pub use config::{DEFAULT_INTERPRETER, INTERPRETER_ENV, SessionOptions, ShellConfig};
pub use error::{ProcessError, Result, ShellError};
pub use events::{Listeners, Message, RawChunk, SessionEvents};
pub use runner::{check_syntax, check_syntax_file, run, run_string, version_sync};
pub use session::{
    Completion, CompletionCallback, InvocationContext, Session, SessionBuilder, SessionPhase,
    TerminationArbiter, TerminationOutcome,
};

pub use pyshell_transport::{
    DecodeError, Decoder, Encoder, ExitInfo, LineFramer, Mode, StreamKind, TextEncoding,
    TransportError,
};
