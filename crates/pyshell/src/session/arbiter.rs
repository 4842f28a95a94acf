//! Termination arbiter
//!
//! A session is over only when three things have happened, in any order:
//! stdout reached end-of-stream, stderr reached end-of-stream, and the
//! process exited. The arbiter latches each signal and produces the
//! [`Completion`] exactly once, when the last of the three arrives.

use crate::error::ProcessError;
use pyshell_transport::{ExitInfo, TextEncoding};
use std::io;
use std::path::PathBuf;

/// Exit code reported when the exit status could not be observed
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// What was run, attached to a [`ProcessError`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationContext {
    /// Interpreter executable
    pub executable: PathBuf,
    /// Options placed before the script path
    pub interpreter_options: Vec<String>,
    /// Script path as passed to the interpreter
    pub script: PathBuf,
    /// Arguments placed after the script path
    pub args: Vec<String>,
    /// Encoding used to turn collected stderr bytes into text
    pub encoding: TextEncoding,
}

/// Final result of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Exit code zero, or ended by a signal
    Success,
    /// Non-zero exit code
    ProcessError(ProcessError),
}

/// What the completion callback receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// Set when the process exited with a non-zero code
    pub error: Option<ProcessError>,
    /// Exit code, when the process exited normally
    pub exit_code: Option<i32>,
    /// Signal name, when the process was killed
    pub exit_signal: Option<String>,
}

impl Completion {
    #[cfg(test)]
    pub(crate) fn success(exit: ExitInfo) -> Self {
        Self {
            error: None,
            exit_code: exit.code,
            exit_signal: exit.signal,
        }
    }

    /// Whether no process error occurred
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The outcome without the exit details
    pub fn outcome(&self) -> TerminationOutcome {
        match &self.error {
            Some(err) => TerminationOutcome::ProcessError(err.clone()),
            None => TerminationOutcome::Success,
        }
    }

    /// `Ok(self)` on success, the process error otherwise
    pub fn into_result(self) -> Result<Self, ProcessError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

/// Whether a termination error is raised as an `error` event
///
/// Callers who registered a completion callback and no error listener get the
/// error through the callback only. Anyone explicitly listening always sees
/// it, and without a callback the event is the only place it can go.
pub fn raises_error_event(has_callback: bool, has_error_listeners: bool) -> bool {
    has_error_listeners || !has_callback
}

/// Joins the three terminal signals of a session
#[derive(Debug)]
pub struct TerminationArbiter {
    context: InvocationContext,
    output_ended: bool,
    diagnostic_ended: bool,
    exit: Option<ExitInfo>,
    wait_error: Option<String>,
    diagnostics: Vec<u8>,
    finalized: bool,
}

impl TerminationArbiter {
    /// Create an arbiter with no latch set
    pub fn new(context: InvocationContext) -> Self {
        Self {
            context,
            output_ended: false,
            diagnostic_ended: false,
            exit: None,
            wait_error: None,
            diagnostics: Vec::new(),
            finalized: false,
        }
    }

    /// Append raw stderr bytes to the diagnostic text
    pub fn record_diagnostic(&mut self, chunk: &[u8]) {
        self.diagnostics.extend_from_slice(chunk);
    }

    /// Latch stdout end-of-stream
    pub fn output_ended(&mut self) -> Option<Completion> {
        tracing::debug!("stdout ended");
        self.output_ended = true;
        self.try_finalize()
    }

    /// Latch stderr end-of-stream
    pub fn diagnostic_ended(&mut self) -> Option<Completion> {
        tracing::debug!("stderr ended");
        self.diagnostic_ended = true;
        self.try_finalize()
    }

    /// Latch the process exit
    pub fn process_exited(&mut self, exit: ExitInfo) -> Option<Completion> {
        tracing::debug!(code = exit.code, signal = exit.signal.as_deref(), "process exited");
        self.exit = Some(exit);
        self.try_finalize()
    }

    /// Latch an exit whose status could not be observed
    ///
    /// The session then fails with [`UNKNOWN_EXIT_CODE`] and a message naming
    /// the wait error.
    pub fn exit_unknown(&mut self, error: &io::Error) -> Option<Completion> {
        tracing::debug!(error = %error, "exit status unavailable");
        self.wait_error = Some(error.to_string());
        self.exit = Some(ExitInfo::code(UNKNOWN_EXIT_CODE));
        self.try_finalize()
    }

    /// Whether stdout has ended
    pub fn is_output_ended(&self) -> bool {
        self.output_ended
    }

    /// Whether stderr has ended
    pub fn is_diagnostic_ended(&self) -> bool {
        self.diagnostic_ended
    }

    /// Whether the exit has been observed
    pub fn has_exited(&self) -> bool {
        self.exit.is_some()
    }

    /// Whether the completion has been produced
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn try_finalize(&mut self) -> Option<Completion> {
        if self.finalized || !self.output_ended || !self.diagnostic_ended {
            return None;
        }
        let exit = self.exit.clone()?;
        self.finalized = true;

        let error = match exit.code {
            Some(code) if code != 0 => Some(self.process_error(code)),
            _ => None,
        };

        Some(Completion {
            error,
            exit_code: exit.code,
            exit_signal: exit.signal,
        })
    }

    fn process_error(&self, exit_code: i32) -> ProcessError {
        let traceback = if self.diagnostics.is_empty() {
            None
        } else {
            Some(self.context.encoding.decode(&self.diagnostics))
        };
        let message = match (&self.wait_error, &traceback) {
            (Some(error), _) => format!("failed to wait for process: {}", error),
            (None, Some(text)) => text.clone(),
            (None, None) => format!("process exited with code {}", exit_code),
        };

        ProcessError {
            message,
            traceback,
            executable: self.context.executable.clone(),
            options: non_empty(&self.context.interpreter_options),
            script: self.context.script.clone(),
            args: non_empty(&self.context.args),
            exit_code,
        }
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}
