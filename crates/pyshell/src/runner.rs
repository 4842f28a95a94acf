//! One-shot helpers built on [`Session`]
//!
//! - [`run`] / [`run_string`]: run a script to completion, collecting its
//!   stdout messages
//! - [`check_syntax`] / [`check_syntax_file`]: compile without running, via
//!   `python -m py_compile`
//! - [`version_sync`]: the interpreter's `--version` output

use crate::config::{SessionOptions, ShellConfig};
use crate::error::{Result, ShellError};
use crate::session::Session;
use pyshell_transport::{DecodeError, StreamKind};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::process::{Command as StdCommand, Output};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::process::Command;

/// Run a script to completion and collect every decoded stdout message
///
/// # Errors
///
/// - [`ShellError::Process`] if the script exited with a non-zero code
/// - [`ShellError::Decode`] if a stdout line could not be decoded; the first
///   such line is reported once the script has finished
/// - any construction error of [`Session::spawn`]
pub async fn run(
    script_path: impl Into<String>,
    options: SessionOptions,
    config: &ShellConfig,
) -> Result<Vec<Value>> {
    let messages = Arc::new(Mutex::new(Vec::new()));
    let first_decode_error: Arc<Mutex<Option<DecodeError>>> = Arc::new(Mutex::new(None));

    let collected = Arc::clone(&messages);
    let decode_slot = Arc::clone(&first_decode_error);
    let mut session = Session::builder(script_path)
        .options(options)
        .on_message(move |msg| {
            collected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(msg.value.clone());
        })
        .on_error(move |err| {
            if let ShellError::Decode(decode) = err
                && decode.stream == StreamKind::Stdout
            {
                let mut slot = decode_slot.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.is_none() {
                    *slot = Some(decode.clone());
                }
            }
        })
        .spawn(config)?;

    let completion = session.end_and_wait().await?;
    if let Some(err) = completion.error {
        return Err(err.into());
    }

    let decode_error = first_decode_error
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(decode) = decode_error {
        return Err(decode.into());
    }

    let mut messages = messages.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(std::mem::take(&mut *messages))
}

/// Run source code as a script
///
/// The code is written to a temporary `.py` file that is removed once the run
/// has finished, whatever its outcome.
pub async fn run_string(
    code: &str,
    options: SessionOptions,
    config: &ShellConfig,
) -> Result<Vec<Value>> {
    let file = write_temp_script(code)?;
    let path = file.path().to_string_lossy().into_owned();
    tracing::debug!(path = %path, "running code from temporary script");

    let result = run(path, options, config).await;
    drop(file);
    result
}

/// Check that code compiles
///
/// # Errors
///
/// [`ShellError::Syntax`] with the compiler's stderr if it does not.
pub async fn check_syntax(code: &str, config: &ShellConfig) -> Result<()> {
    let file = write_temp_script(code)?;
    check_syntax_file(file.path(), config).await
}

/// Check that a script file compiles
///
/// # Errors
///
/// - [`ShellError::Syntax`] with the compiler's stderr if it does not
/// - [`ShellError::Spawn`] if the interpreter could not be started
pub async fn check_syntax_file(path: impl AsRef<Path>, config: &ShellConfig) -> Result<()> {
    let path = path.as_ref();
    let interpreter = config.interpreter_path();

    let output = Command::new(interpreter)
        .arg("-m")
        .arg("py_compile")
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| ShellError::Spawn {
            executable: interpreter.to_path_buf(),
            source,
        })?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    tracing::debug!(
        path = %path.display(),
        code = output.status.code(),
        "syntax check failed"
    );
    Err(ShellError::Syntax { stderr })
}

/// The interpreter's `--version` output, trimmed
///
/// Blocks the calling thread until the interpreter exits.
///
/// # Errors
///
/// - [`ShellError::Spawn`] if the interpreter could not be started
/// - [`ShellError::CommandFailed`] if it exited unsuccessfully
pub fn version_sync(interpreter: impl AsRef<Path>) -> Result<String> {
    let interpreter = interpreter.as_ref();
    let output = StdCommand::new(interpreter)
        .arg("--version")
        .output()
        .map_err(|source| ShellError::Spawn {
            executable: interpreter.to_path_buf(),
            source,
        })?;

    if !output.status.success() {
        return Err(ShellError::CommandFailed {
            command: format!("{} --version", interpreter.display()),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(version_text(&output))
}

fn version_text(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let text = if stdout.trim().is_empty() {
        String::from_utf8_lossy(&output.stderr)
    } else {
        stdout
    };
    text.trim().to_string()
}

fn write_temp_script(code: &str) -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("pyshell")
        .suffix(".py")
        .tempfile()?;
    file.write_all(code.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh_config() -> ShellConfig {
        ShellConfig::default().with_interpreter_path("sh")
    }

    #[tokio::test]
    async fn test_run_string_collects_messages() {
        let values = run_string("echo one\necho two\n", SessionOptions::new(), &sh_config())
            .await
            .unwrap();
        assert_eq!(values, vec![json!("one"), json!("two")]);
    }

    #[tokio::test]
    async fn test_run_string_reports_process_error() {
        let err = run_string("echo 'boom' >&2\nexit 3\n", SessionOptions::new(), &sh_config())
            .await
            .unwrap_err();
        let process = err.as_process_error().unwrap();
        assert_eq!(process.exit_code, 3);
        assert_eq!(process.message, "boom\n");
    }

    #[tokio::test]
    async fn test_run_reports_first_decode_error() {
        let options = SessionOptions::new().with_mode(pyshell_transport::Mode::Json);
        let err = run_string("echo '{\"a\":1}'\necho 'not json'\necho '{'\n", options, &sh_config())
            .await
            .unwrap_err();
        match err {
            ShellError::Decode(decode) => {
                assert_eq!(decode.line, "not json");
                assert_eq!(decode.stream, StreamKind::Stdout);
                assert!(decode.cause().downcast_ref::<serde_json::Error>().is_some());
            }
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn test_temp_script_is_removed_when_dropped() {
        let file = write_temp_script("exit 0\n").unwrap();
        let path = file.path().to_path_buf();
        assert!(path.extension().is_some_and(|ext| ext == "py"));
        drop(file);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_check_syntax_passes_on_zero_exit() {
        let config = ShellConfig::default().with_interpreter_path("true");
        check_syntax("print('ok')", &config).await.unwrap();
    }

    #[tokio::test]
    async fn test_check_syntax_fails_with_stderr() {
        // `sh -m py_compile <file>` looks for a script named py_compile
        let err = check_syntax("def broken(:", &sh_config()).await.unwrap_err();
        match err {
            ShellError::Syntax { stderr } => assert!(stderr.contains("py_compile")),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_check_syntax_missing_interpreter() {
        let config = ShellConfig::default().with_interpreter_path("/nonexistent/python");
        let err = check_syntax_file("main.py", &config).await.unwrap_err();
        assert!(matches!(err, ShellError::Spawn { .. }));
    }

    #[test]
    fn test_version_sync_reads_stdout() {
        let version = version_sync("echo").unwrap();
        assert!(!version.is_empty());
    }

    #[test]
    fn test_version_sync_failure() {
        let err = version_sync("false").unwrap_err();
        assert!(matches!(err, ShellError::CommandFailed { .. }));
        let err = version_sync("/nonexistent/python").unwrap_err();
        assert!(matches!(err, ShellError::Spawn { .. }));
    }

    #[test]
    fn test_version_text_falls_back_to_stderr() {
        use std::os::unix::process::ExitStatusExt;

        let output = Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: Vec::new(),
            stderr: b"Python 2.7.18\n".to_vec(),
        };
        assert_eq!(version_text(&output), "Python 2.7.18");
    }
}
