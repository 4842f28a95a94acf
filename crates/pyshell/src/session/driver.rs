//! Session driver
//!
//! One task per session owns the child, both framers and the arbiter, and
//! multiplexes stdout reads, stderr reads, the exit notification and control
//! requests with `tokio::select!`. Every handler therefore runs on one logical
//! thread of control. Stdin is drained by a second task so that a child which
//! stops reading can never block output handling.

use crate::error::ShellError;
use crate::events::{Message, RawChunk, SessionEvents};
use crate::session::arbiter::{
    Completion, TerminationArbiter, UNKNOWN_EXIT_CODE, raises_error_event,
};
use crate::session::state::SessionState;
use bytes::Bytes;
use pyshell_transport::{
    DecodeError, ExitInfo, KillSignal, LineFramer, ResolvedCodec, StreamKind, TextEncoding,
};
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use uuid::Uuid;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Requests from the session handle to its driver
#[derive(Debug)]
pub(crate) enum Control {
    Signal(KillSignal),
}

/// Everything the driver mutates while handling stream events
pub(crate) struct DriverCore {
    pub(crate) session_id: Uuid,
    pub(crate) codec: ResolvedCodec,
    pub(crate) encoding: TextEncoding,
    pub(crate) stdout_framer: LineFramer,
    pub(crate) stderr_framer: LineFramer,
    pub(crate) arbiter: TerminationArbiter,
    pub(crate) events: Arc<SessionEvents>,
    pub(crate) state: Arc<SessionState>,
}

pub(crate) struct Driver {
    pub(crate) child: Child,
    pub(crate) stdout: ChildStdout,
    pub(crate) stderr: ChildStderr,
    pub(crate) control: mpsc::UnboundedReceiver<Control>,
    pub(crate) core: DriverCore,
}

impl Driver {
    pub(crate) async fn run(self) {
        let Driver {
            mut child,
            mut stdout,
            mut stderr,
            mut control,
            mut core,
        } = self;

        let mut out_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut err_buf = vec![0u8; READ_BUFFER_SIZE];
        let mut control_open = true;

        let completion = loop {
            let finished = tokio::select! {
                read = stdout.read(&mut out_buf), if !core.arbiter.is_output_ended() => {
                    core.on_read(StreamKind::Stdout, read.map(|n| &out_buf[..n]))
                }
                read = stderr.read(&mut err_buf), if !core.arbiter.is_diagnostic_ended() => {
                    core.on_read(StreamKind::Stderr, read.map(|n| &err_buf[..n]))
                }
                status = child.wait(), if !core.arbiter.has_exited() => {
                    core.on_exit(status)
                }
                request = control.recv(), if control_open => {
                    match request {
                        Some(Control::Signal(signal)) => core.on_signal(&mut child, signal),
                        None => control_open = false,
                    }
                    None
                }
            };

            if let Some(completion) = finished {
                break completion;
            }
        };

        core.finalize(completion);
    }
}

impl DriverCore {
    fn on_read(&mut self, stream: StreamKind, read: io::Result<&[u8]>) -> Option<Completion> {
        match read {
            Ok(chunk) if !chunk.is_empty() => {
                self.on_chunk(stream, chunk);
                None
            }
            Ok(_) => self.on_stream_end(stream),
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    %stream,
                    error = %e,
                    "read failed, treating stream as ended"
                );
                self.on_stream_end(stream)
            }
        }
    }

    fn on_chunk(&mut self, stream: StreamKind, chunk: &[u8]) {
        if stream == StreamKind::Stderr {
            self.arbiter.record_diagnostic(chunk);
        }

        if !self.codec.decodes(stream) {
            self.events.emit_data(&RawChunk {
                stream,
                bytes: Bytes::copy_from_slice(chunk),
            });
            return;
        }

        let lines: Vec<Vec<u8>> = self.framer(stream).feed(chunk).collect();
        for line in lines {
            self.emit_line(stream, &line);
        }
    }

    fn on_stream_end(&mut self, stream: StreamKind) -> Option<Completion> {
        if self.codec.decodes(stream) {
            if let Some(line) = self.framer(stream).finish() {
                self.emit_line(stream, &line);
            }
        }

        match stream {
            StreamKind::Stdout => self.arbiter.output_ended(),
            StreamKind::Stderr => self.arbiter.diagnostic_ended(),
        }
    }

    fn on_exit(&mut self, status: io::Result<ExitStatus>) -> Option<Completion> {
        match status {
            Ok(status) => {
                let exit = ExitInfo::from(status);
                self.state.record_exit(exit.clone());
                self.arbiter.process_exited(exit)
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "failed to wait for child, reporting it as failed"
                );
                self.state.record_exit(ExitInfo::code(UNKNOWN_EXIT_CODE));
                self.arbiter.exit_unknown(&e)
            }
        }
    }

    fn on_signal(&mut self, child: &mut Child, signal: KillSignal) {
        if self.arbiter.has_exited() {
            return;
        }
        tracing::debug!(session_id = %self.session_id, signal = signal.name(), "signalling child");
        if let Err(e) = signal.deliver(child) {
            tracing::warn!(session_id = %self.session_id, error = %e, "failed to signal child");
        }
    }

    fn framer(&mut self, stream: StreamKind) -> &mut LineFramer {
        match stream {
            StreamKind::Stdout => &mut self.stdout_framer,
            StreamKind::Stderr => &mut self.stderr_framer,
        }
    }

    fn emit_line(&self, stream: StreamKind, line: &[u8]) {
        let raw = self.encoding.decode(line);
        match self.codec.decode(stream, &raw) {
            Some(Ok(value)) => {
                let message = Message { value, raw };
                match stream {
                    StreamKind::Stdout => self.events.emit_message(&message),
                    StreamKind::Stderr => self.events.emit_stderr(&message),
                }
            }
            Some(Err(err)) => self.raise_decode_error(err),
            None => {}
        }
    }

    fn raise_decode_error(&self, err: DecodeError) {
        if self.events.has_error_listeners() {
            self.events.emit_error(&ShellError::Decode(err));
        } else {
            tracing::warn!(
                session_id = %self.session_id,
                error = %err,
                "decode failed and no error listener is registered"
            );
        }
    }

    fn finalize(self, completion: Completion) {
        let callback = self.state.finalize(&completion);

        tracing::info!(
            session_id = %self.session_id,
            exit_code = completion.exit_code,
            exit_signal = completion.exit_signal.as_deref(),
            success = completion.is_success(),
            "session finished"
        );

        if let Some(err) = &completion.error {
            let has_listeners = self.events.has_error_listeners();
            if raises_error_event(callback.is_some(), has_listeners) {
                if has_listeners {
                    self.events.emit_error(&ShellError::Process(err.clone()));
                } else {
                    tracing::warn!(
                        session_id = %self.session_id,
                        exit_code = err.exit_code,
                        error = %err,
                        "process failed and nothing observed the error"
                    );
                }
            }
        }

        self.events.emit_close();
        self.events.release();
        if let Some(callback) = callback {
            callback(completion);
        }
    }
}

/// Drain queued writes into the child's stdin, closing it when the queue closes
pub(crate) async fn pump_stdin(
    session_id: Uuid,
    mut stdin: ChildStdin,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
) {
    while let Some(buf) = queue.recv().await {
        let written = match stdin.write_all(&buf).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(%session_id, error = %e, "stdin write failed, dropping further input");
            return;
        }
    }

    if let Err(e) = stdin.shutdown().await {
        tracing::debug!(%session_id, error = %e, "stdin shutdown failed");
    }
    tracing::debug!(%session_id, "stdin closed");
}
