//! Shell configuration
//!
//! [`ShellConfig`] is created once by the application and passed by reference
//! to every session and helper. It carries the default interpreter and the
//! default [`SessionOptions`] new sessions start from.

use crate::error::{Result, ShellError};
use pyshell_transport::{DEFAULT_DELIMITER, Decoder, Encoder, Mode, TextEncoding};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable overriding the default interpreter
pub const INTERPRETER_ENV: &str = "PYSHELL_INTERPRETER";

/// Interpreter used when nothing else is configured
#[cfg(windows)]
pub const DEFAULT_INTERPRETER: &str = "python";

/// Interpreter used when nothing else is configured
#[cfg(not(windows))]
pub const DEFAULT_INTERPRETER: &str = "python3";

/// Process-wide defaults shared by all sessions
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Interpreter executable used when a session does not name one
    pub interpreter_path: PathBuf,

    /// Options a session starts from when none are given
    pub default_options: SessionOptions,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            interpreter_path: PathBuf::from(DEFAULT_INTERPRETER),
            default_options: SessionOptions::default(),
        }
    }
}

impl ShellConfig {
    /// Create a config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config from environment variables
    ///
    /// Reads:
    /// - `PYSHELL_INTERPRETER`: interpreter executable
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = env::var(INTERPRETER_ENV) {
            if path.trim().is_empty() {
                return Err(ShellError::invalid_argument(format!(
                    "{} is set but empty",
                    INTERPRETER_ENV
                )));
            }
            config.interpreter_path = PathBuf::from(path);
        }

        Ok(config)
    }

    /// Set the default interpreter
    pub fn with_interpreter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter_path = path.into();
        self
    }

    /// Set the default session options
    pub fn with_default_options(mut self, options: SessionOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Default interpreter
    pub fn interpreter_path(&self) -> &Path {
        &self.interpreter_path
    }

    /// A copy of the default options, to build a session's options on
    pub fn options(&self) -> SessionOptions {
        self.default_options.clone()
    }
}

/// Per-session launch options
///
/// Process options (`env`, `env_clear`, `cwd`, `kill_on_drop`) are passed to
/// the spawn unchanged.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Interpreter executable, overriding [`ShellConfig::interpreter_path`]
    pub interpreter_path: Option<PathBuf>,

    /// Options placed before the script path (`-u`, `-X dev`, ...)
    pub interpreter_options: Vec<String>,

    /// Folder the script path is resolved against
    pub script_folder: Option<PathBuf>,

    /// Arguments placed after the script path
    pub args: Vec<String>,

    /// Operating mode
    pub mode: Mode,

    /// Outbound strategy; defaults to the mode
    pub encoder: Option<Encoder>,

    /// Inbound strategy for stdout; defaults to the mode
    pub decoder: Option<Decoder>,

    /// Inbound strategy for stderr; defaults to the mode
    pub stderr_decoder: Option<Decoder>,

    /// Encoding between line bytes and text
    pub encoding: TextEncoding,

    /// Line delimiter, for both outgoing and incoming lines
    pub delimiter: String,

    /// Extra environment variables for the child
    pub env: HashMap<String, String>,

    /// Start the child from an empty environment
    pub env_clear: bool,

    /// Working directory of the child
    pub cwd: Option<PathBuf>,

    /// Kill the child if the session driver is dropped before it exits
    pub kill_on_drop: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            interpreter_path: None,
            interpreter_options: Vec::new(),
            script_folder: None,
            args: Vec::new(),
            mode: Mode::Text,
            encoder: None,
            decoder: None,
            stderr_decoder: None,
            encoding: TextEncoding::Utf8,
            delimiter: DEFAULT_DELIMITER.to_string(),
            env: HashMap::new(),
            env_clear: false,
            cwd: None,
            kill_on_drop: false,
        }
    }
}

impl SessionOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the interpreter executable
    pub fn with_interpreter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.interpreter_path = Some(path.into());
        self
    }

    /// Add an interpreter option
    pub fn with_interpreter_option(mut self, option: impl Into<String>) -> Self {
        self.interpreter_options.push(option.into());
        self
    }

    /// Set the folder the script path is resolved against
    pub fn with_script_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.script_folder = Some(folder.into());
        self
    }

    /// Add a script argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add several script arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the mode
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the outbound strategy
    pub fn with_encoder(mut self, encoder: Encoder) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Set the stdout strategy
    pub fn with_decoder(mut self, decoder: Decoder) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Set the stderr strategy
    pub fn with_stderr_decoder(mut self, decoder: Decoder) -> Self {
        self.stderr_decoder = Some(decoder);
        self
    }

    /// Set the text encoding
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the line delimiter
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Set an environment variable for the child
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Start the child from an empty environment
    pub fn with_env_clear(mut self, clear: bool) -> Self {
        self.env_clear = clear;
        self
    }

    /// Set the working directory of the child
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Kill the child if the session driver is dropped before it exits
    pub fn with_kill_on_drop(mut self, kill: bool) -> Self {
        self.kill_on_drop = kill;
        self
    }

    /// Script path joined onto the script folder, if one is set
    pub(crate) fn resolve_script_path(&self, script_path: &str) -> PathBuf {
        match &self.script_folder {
            Some(folder) => folder.join(script_path),
            None => PathBuf::from(script_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ShellConfig::default();
        assert_eq!(config.interpreter_path(), Path::new(DEFAULT_INTERPRETER));
        assert_eq!(config.default_options.mode, Mode::Text);
        assert_eq!(config.default_options.delimiter, "\n");
    }

    #[test]
    fn test_config_builder() {
        let config = ShellConfig::new()
            .with_interpreter_path("/usr/local/bin/python3.12")
            .with_default_options(SessionOptions::new().with_mode(Mode::Json));

        assert_eq!(
            config.interpreter_path(),
            Path::new("/usr/local/bin/python3.12")
        );
        assert_eq!(config.options().mode, Mode::Json);
    }

    #[test]
    fn test_from_env_override() {
        temp_env::with_var(INTERPRETER_ENV, Some("/opt/py/bin/python"), || {
            let config = ShellConfig::from_env().unwrap();
            assert_eq!(config.interpreter_path(), Path::new("/opt/py/bin/python"));
        });
        temp_env::with_var(INTERPRETER_ENV, Some("  "), || {
            assert!(ShellConfig::from_env().is_err());
        });
    }

    #[test]
    fn test_session_options_builder() {
        let options = SessionOptions::new()
            .with_interpreter_option("-u")
            .with_script_folder("scripts")
            .with_args(["--count", "3"])
            .with_mode(Mode::Json)
            .with_encoding(TextEncoding::Latin1)
            .with_delimiter("\r\n")
            .with_env("PYTHONUNBUFFERED", "1")
            .with_cwd("/tmp")
            .with_kill_on_drop(true);

        assert_eq!(options.interpreter_options, vec!["-u"]);
        assert_eq!(options.args, vec!["--count", "3"]);
        assert_eq!(options.encoding, TextEncoding::Latin1);
        assert_eq!(options.delimiter, "\r\n");
        assert_eq!(options.env.get("PYTHONUNBUFFERED"), Some(&"1".to_string()));
        assert!(options.kill_on_drop);
        assert_eq!(
            options.resolve_script_path("main.py"),
            PathBuf::from("scripts").join("main.py")
        );
    }
}
