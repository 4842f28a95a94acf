//! Process management for the interpreter subprocess

use crate::error::{Result, TransportError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

/// Signal sent by a terminate request that names none
pub const DEFAULT_SIGNAL: &str = "SIGTERM";

/// Configuration for spawning an interpreter process
#[derive(Clone, Debug)]
pub struct ProcessConfig {
    /// Path to the executable
    pub program: PathBuf,

    /// Arguments to pass to the executable
    pub args: Vec<String>,

    /// Environment variables to set
    pub env: HashMap<String, String>,

    /// Start from an empty environment instead of inheriting the parent's
    pub env_clear: bool,

    /// Working directory of the child
    pub cwd: Option<PathBuf>,

    /// Kill the child when its handle is dropped
    pub kill_on_drop: bool,
}

impl ProcessConfig {
    /// Create a new process configuration
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            env_clear: false,
            cwd: None,
            kill_on_drop: false,
        }
    }

    /// Add an argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable
    ///
    /// Variables are added on top of the inherited environment unless
    /// [`ProcessConfig::with_env_clear`] is set, in which case only the
    /// variables set here reach the child.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Do not inherit the parent's environment
    pub fn with_env_clear(mut self, clear: bool) -> Self {
        self.env_clear = clear;
        self
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Kill the child when its handle is dropped
    pub fn with_kill_on_drop(mut self, kill: bool) -> Self {
        self.kill_on_drop = kill;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if self.env_clear {
            cmd.env_clear();
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(self.kill_on_drop);
        cmd
    }
}

/// A spawned child with its three pipes split out
///
/// The pipes are handed to whoever reads and writes them; the child itself is
/// kept for waiting and signalling.
pub struct ProcessHandle {
    /// The child process
    pub child: Child,
    /// Write end of the child's standard input
    pub stdin: ChildStdin,
    /// Read end of the child's standard output
    pub stdout: ChildStdout,
    /// Read end of the child's standard error
    pub stderr: ChildStderr,
    config: ProcessConfig,
}

impl ProcessHandle {
    /// Spawn a new process with all three standard streams piped
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(config: ProcessConfig) -> Result<Self> {
        let mut child = config.command().spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Process("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Process("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::Process("Failed to get stderr".to_string()))?;

        tracing::debug!(
            pid = child.id(),
            program = %config.program.display(),
            args = ?config.args,
            "spawned subprocess"
        );

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
            config,
        })
    }

    /// OS process id, if the child has not been reaped yet
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Get the process configuration
    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }
}

/// How a process ended
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitInfo {
    /// Exit code, when the process exited normally
    pub code: Option<i32>,
    /// Name of the terminating signal, when it was killed
    pub signal: Option<String>,
}

impl ExitInfo {
    /// A normal exit with a code
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    /// Death by signal
    pub fn signal(name: impl Into<String>) -> Self {
        Self {
            code: None,
            signal: Some(name.into()),
        }
    }

    /// Whether the process exited with a non-zero code
    pub fn is_failure(&self) -> bool {
        matches!(self.code, Some(code) if code != 0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: exit_signal_name(&status),
        }
    }
}

#[cfg(unix)]
fn exit_signal_name(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    let raw = status.signal()?;
    Some(match nix::sys::signal::Signal::try_from(raw) {
        Ok(signal) => signal.as_str().to_string(),
        Err(_) => format!("SIG{}", raw),
    })
}

#[cfg(not(unix))]
fn exit_signal_name(_status: &ExitStatus) -> Option<String> {
    None
}

/// A validated signal request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillSignal {
    #[cfg(unix)]
    signal: nix::sys::signal::Signal,
}

impl KillSignal {
    /// Parse a signal by name (`"SIGKILL"`, `"KILL"`, `"sigint"`)
    ///
    /// `None` selects [`DEFAULT_SIGNAL`].
    #[cfg(unix)]
    pub fn parse(name: Option<&str>) -> Result<Self> {
        use std::str::FromStr;

        let name = name.unwrap_or(DEFAULT_SIGNAL).trim().to_ascii_uppercase();
        let name = if name.starts_with("SIG") {
            name
        } else {
            format!("SIG{}", name)
        };
        let signal = nix::sys::signal::Signal::from_str(&name)
            .map_err(|_| TransportError::InvalidArgument(format!("unknown signal '{}'", name)))?;
        Ok(Self { signal })
    }

    /// Any signal kills the child on this platform
    #[cfg(not(unix))]
    pub fn parse(_name: Option<&str>) -> Result<Self> {
        Ok(Self {})
    }

    /// Name of the signal
    pub fn name(&self) -> &'static str {
        #[cfg(unix)]
        {
            self.signal.as_str()
        }
        #[cfg(not(unix))]
        {
            "SIGKILL"
        }
    }

    /// Deliver the signal to a child
    ///
    /// Does not wait for the child to die; its exit is observed through
    /// [`Child::wait`] like any other.
    pub fn deliver(&self, child: &mut Child) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::kill;
            use nix::unistd::Pid;

            let Some(pid) = child.id() else {
                // already reaped
                return Ok(());
            };
            let pid = i32::try_from(pid)
                .map_err(|_| TransportError::Process(format!("pid {} out of range", pid)))?;
            kill(Pid::from_raw(pid), self.signal).map_err(|e| {
                TransportError::Process(format!("Failed to send {}: {}", self.name(), e))
            })
        }
        #[cfg(not(unix))]
        {
            child
                .start_kill()
                .map_err(|e| TransportError::Process(format!("Failed to kill process: {}", e)))
        }
    }
}
