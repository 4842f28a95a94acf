//! Core session management
//!
//! Provides the [`Session`] handle and the [`SessionBuilder`] used to
//! register listeners before the interpreter starts.

use crate::config::{SessionOptions, ShellConfig};
use crate::error::{Result, ShellError};
use crate::events::{Message, RawChunk, SessionEvents};
use crate::session::arbiter::{Completion, InvocationContext, TerminationArbiter};
use crate::session::driver::{Control, Driver, DriverCore, pump_stdin};
use crate::session::state::{SessionPhase, SessionState};
use pyshell_transport::{
    KillSignal, LineFramer, Mode, ProcessConfig, ProcessHandle, ResolvedCodec, TextEncoding,
    TransportError,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Configures a session before its interpreter is spawned
///
/// Listeners registered here are in place before the child produces any
/// output, so no early line can be missed.
#[derive(Debug)]
pub struct SessionBuilder {
    script_path: String,
    options: Option<SessionOptions>,
    events: SessionEvents,
}

impl SessionBuilder {
    fn new(script_path: impl Into<String>) -> Self {
        Self {
            script_path: script_path.into(),
            options: None,
            events: SessionEvents::new(),
        }
    }

    /// Use these options instead of the config's defaults
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Listen for decoded stdout lines
    pub fn on_message<F>(self, listener: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.events.on_message(listener);
        self
    }

    /// Listen for decoded stderr lines
    pub fn on_stderr<F>(self, listener: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.events.on_stderr(listener);
        self
    }

    /// Listen for raw chunks (binary mode)
    pub fn on_data<F>(self, listener: F) -> Self
    where
        F: Fn(&RawChunk) + Send + Sync + 'static,
    {
        self.events.on_data(listener);
        self
    }

    /// Listen for errors
    pub fn on_error<F>(self, listener: F) -> Self
    where
        F: Fn(&ShellError) + Send + Sync + 'static,
    {
        self.events.on_error(listener);
        self
    }

    /// Listen for the session closing
    pub fn on_close<F>(self, listener: F) -> Self
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.events.on_close(listener);
        self
    }

    /// A builder has not spawned anything yet
    pub fn phase(&self) -> SessionPhase {
        SessionPhase::NotStarted
    }

    /// Spawn the interpreter
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ShellError::InvalidArgument`] if the script path is empty or only
    ///   whitespace, or the delimiter is empty; nothing is spawned
    /// - [`ShellError::Spawn`] if the interpreter could not be started
    pub fn spawn(self, config: &ShellConfig) -> Result<Session> {
        if self.script_path.trim().is_empty() {
            return Err(ShellError::invalid_argument(
                "script path cannot be empty; a script to run is required",
            ));
        }

        let options = self.options.unwrap_or_else(|| config.options());
        let executable = options
            .interpreter_path
            .clone()
            .unwrap_or_else(|| config.interpreter_path().to_path_buf());
        let script_path = options.resolve_script_path(&self.script_path);

        let mut command = options.interpreter_options.clone();
        command.push(script_path.to_string_lossy().into_owned());
        command.extend(options.args.iter().cloned());

        let codec = ResolvedCodec::resolve(
            options.mode,
            options.encoder.as_ref(),
            options.decoder.as_ref(),
            options.stderr_decoder.as_ref(),
        );
        let stdout_framer = LineFramer::with_delimiter(&options.delimiter)?;
        let stderr_framer = LineFramer::with_delimiter(&options.delimiter)?;

        let mut process_config = ProcessConfig::new(&executable)
            .with_args(command.iter().cloned())
            .with_env_clear(options.env_clear)
            .with_kill_on_drop(options.kill_on_drop);
        process_config.env = options.env.clone();
        if let Some(cwd) = &options.cwd {
            process_config = process_config.with_cwd(cwd);
        }

        let handle = ProcessHandle::spawn(process_config).map_err(|e| match e {
            TransportError::Io(source) => ShellError::Spawn {
                executable: executable.clone(),
                source,
            },
            other => ShellError::from(other),
        })?;
        let pid = handle.pid();
        let ProcessHandle {
            child,
            stdin,
            stdout,
            stderr,
            ..
        } = handle;

        let id = Uuid::new_v4();
        let events = Arc::new(self.events);
        let state = Arc::new(SessionState::running());
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let arbiter = TerminationArbiter::new(InvocationContext {
            executable: executable.clone(),
            interpreter_options: options.interpreter_options.clone(),
            script: script_path.clone(),
            args: options.args.clone(),
            encoding: options.encoding,
        });

        let driver = Driver {
            child,
            stdout,
            stderr,
            control: control_rx,
            core: DriverCore {
                session_id: id,
                codec: codec.clone(),
                encoding: options.encoding,
                stdout_framer,
                stderr_framer,
                arbiter,
                events: Arc::clone(&events),
                state: Arc::clone(&state),
            },
        };

        tokio::spawn(pump_stdin(id, stdin, input_rx));
        tokio::spawn(driver.run());

        tracing::debug!(
            session_id = %id,
            pid,
            executable = %executable.display(),
            script = %script_path.display(),
            mode = %options.mode,
            "session started"
        );

        Ok(Session {
            id,
            executable,
            script_path,
            command,
            mode: options.mode,
            codec,
            encoding: options.encoding,
            delimiter: options.delimiter.into_bytes(),
            pid,
            input: Some(input_tx),
            control: control_tx,
            events,
            state,
        })
    }
}

/// A running interpreter exchanging messages over its standard streams
///
/// Outgoing messages are encoded and written to stdin; stdout and stderr
/// lines are decoded and emitted as events (see [`SessionEvents`]). The
/// session ends once stdout and stderr have closed and the process has
/// exited, in whatever order those happen.
///
/// # Example
///
/// ```no_run
/// use pyshell::{Mode, Session, SessionOptions, ShellConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ShellConfig::default();
/// let options = config.options().with_mode(Mode::Json);
///
/// let mut session = Session::builder("echo.py")
///     .options(options)
///     .on_message(|msg| println!("got {}", msg.value))
///     .spawn(&config)?;
///
/// session.send(serde_json::json!({"a": 1}))?;
/// let completion = session.end_and_wait().await?;
/// assert!(completion.is_success());
/// # Ok(())
/// # }
/// ```
pub struct Session {
    id: Uuid,
    executable: PathBuf,
    script_path: PathBuf,
    command: Vec<String>,
    mode: Mode,
    codec: ResolvedCodec,
    encoding: TextEncoding,
    delimiter: Vec<u8>,
    pid: Option<u32>,
    input: Option<mpsc::UnboundedSender<Vec<u8>>>,
    control: mpsc::UnboundedSender<Control>,
    events: Arc<SessionEvents>,
    state: Arc<SessionState>,
}

impl Session {
    /// Start configuring a session for a script
    pub fn builder(script_path: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(script_path)
    }

    /// Spawn a session without registering listeners up front
    pub fn spawn(
        script_path: impl Into<String>,
        options: SessionOptions,
        config: &ShellConfig,
    ) -> Result<Self> {
        Self::builder(script_path).options(options).spawn(config)
    }

    /// Encode a message and queue it for the child's stdin
    ///
    /// The delimiter is appended unless the session is in binary mode.
    ///
    /// # Errors
    ///
    /// - [`ShellError::StdinClosed`] after [`Session::end`] or
    ///   [`Session::terminate`]
    /// - [`ShellError::Serialization`] / [`ShellError::Encode`] if the message
    ///   cannot be encoded
    pub fn send<T: Serialize>(&self, message: T) -> Result<&Self> {
        self.ensure_writable()?;

        let value = serde_json::to_value(message)?;
        let text = self.codec.encode(&value)?;
        let mut bytes = self.encoding.encode(&text);
        if !self.mode.is_binary() {
            bytes.extend_from_slice(&self.delimiter);
        }
        self.write(bytes)
    }

    /// Queue bytes for the child's stdin verbatim
    pub fn send_raw(&self, bytes: impl Into<Vec<u8>>) -> Result<&Self> {
        self.ensure_writable()?;
        self.write(bytes.into())
    }

    /// Close stdin and register the completion callback
    ///
    /// The callback runs exactly once, after the `error` and `close` events.
    /// If the session has already finished it runs immediately.
    ///
    /// # Errors
    ///
    /// [`ShellError::StdinClosed`] if `end` was already called.
    pub fn end<F>(&mut self, callback: F) -> Result<&mut Self>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        if self.input.take().is_none() {
            return Err(ShellError::StdinClosed);
        }
        tracing::debug!(session_id = %self.id, "closing stdin");

        if let Some((callback, completion)) = self.state.register_callback(Box::new(callback)) {
            callback(completion);
        }
        Ok(self)
    }

    /// Close stdin and wait for the session to finish
    ///
    /// A process failure is reported in [`Completion::error`], not as `Err`.
    pub async fn end_and_wait(&mut self) -> Result<Completion> {
        let (tx, rx) = oneshot::channel();
        self.end(move |completion| {
            let _ = tx.send(completion);
        })?;
        rx.await.map_err(|_| {
            ShellError::Transport(TransportError::Other(
                "session driver stopped before completion".to_string(),
            ))
        })
    }

    /// Signal the child and mark the session terminated
    ///
    /// Does not wait for the child to die; the exit is still observed and
    /// the completion callback still runs. `None` sends `SIGTERM`.
    ///
    /// # Errors
    ///
    /// [`ShellError::InvalidArgument`] for an unknown signal name.
    pub fn terminate(&self, signal: Option<&str>) -> Result<&Self> {
        let signal = KillSignal::parse(signal)?;
        self.state.mark_terminated();
        tracing::debug!(session_id = %self.id, signal = signal.name(), "terminate requested");
        // the driver is gone once the session has finished
        let _ = self.control.send(Control::Signal(signal));
        Ok(self)
    }

    /// Event listeners of this session
    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    /// Unique id used in log output
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Interpreter executable
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Script path as passed to the interpreter
    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    /// Arguments passed to the interpreter
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Operating mode
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// OS process id of the child
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    /// Whether the session was terminated or has finished
    pub fn is_terminated(&self) -> bool {
        self.phase() == SessionPhase::Terminated
    }

    /// Exit code, once the process has exited normally
    pub fn exit_code(&self) -> Option<i32> {
        self.state.exit().and_then(|exit| exit.code)
    }

    /// Signal name, once the process has been killed by one
    pub fn exit_signal(&self) -> Option<String> {
        self.state.exit().and_then(|exit| exit.signal)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.input.is_none() || self.is_terminated() {
            return Err(ShellError::StdinClosed);
        }
        Ok(())
    }

    fn write(&self, bytes: Vec<u8>) -> Result<&Self> {
        let input = self.input.as_ref().ok_or(ShellError::StdinClosed)?;
        input.send(bytes).map_err(|_| ShellError::StdinClosed)?;
        Ok(self)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("executable", &self.executable)
            .field("command", &self.command)
            .field("mode", &self.mode)
            .field("pid", &self.pid)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_is_not_started() {
        let builder = Session::builder("main.py");
        assert_eq!(builder.phase(), SessionPhase::NotStarted);
    }

    #[rstest::rstest]
    #[case("")]
    #[case("   ")]
    #[case("\t\n")]
    fn test_blank_script_path_rejected_before_spawn(#[case] script: &str) {
        // no runtime: reaching the spawn would panic, so an error proves it never got there
        let config = ShellConfig::default().with_interpreter_path("/nonexistent/python");
        let err = Session::builder(script).spawn(&config).unwrap_err();
        assert!(matches!(err, ShellError::InvalidArgument(_)));
    }

    #[test]
    fn test_empty_delimiter_rejected_before_spawn() {
        let config = ShellConfig::default();
        let options = SessionOptions::new().with_delimiter("");
        let err = Session::spawn("main.py", options, &config).unwrap_err();
        assert!(matches!(err, ShellError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_error() {
        let config = ShellConfig::default().with_interpreter_path("/nonexistent/python");
        let err = Session::builder("main.py").spawn(&config).unwrap_err();
        match err {
            ShellError::Spawn { executable, .. } => {
                assert_eq!(executable, PathBuf::from("/nonexistent/python"));
            }
            other => panic!("expected spawn error, got {other:?}"),
        }
    }
}
