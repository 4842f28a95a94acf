//! Session events
//!
//! Every event kind has its own listener list. Listeners are plain closures
//! called on the session's driver task, in registration order, once per
//! emitted item. Channel subscriptions are listeners that forward into an
//! unbounded `mpsc` channel; the channel closes once the session has closed.

use crate::error::{Result, ShellError};
use bytes::Bytes;
use pyshell_transport::StreamKind;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// One decoded line from stdout or stderr
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Value produced by the decode function
    pub value: Value,
    /// The line as received, without its delimiter
    pub raw: String,
}

impl Message {
    /// The value as a string, when it is one
    pub fn as_str(&self) -> Option<&str> {
        self.value.as_str()
    }

    /// Deserialize the value into a typed message
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.value)?)
    }
}

/// A raw chunk read in binary mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// Stream the chunk was read from
    pub stream: StreamKind,
    /// Bytes exactly as read
    pub bytes: Bytes,
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Registered listeners for one event kind
///
/// Once closed the list stays empty: listeners added afterwards are dropped
/// on the spot, which closes a channel subscription immediately.
pub struct Listeners<T> {
    // `None` once closed
    inner: Mutex<Option<Vec<Listener<T>>>>,
}

impl<T> Listeners<T> {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Some(Vec::new())),
        }
    }

    /// Register a listener; does nothing once the list is closed
    pub fn add<F>(&self, listener: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        if let Some(listeners) = self.lock().as_mut() {
            listeners.push(Arc::new(listener));
        }
    }

    /// Number of registered listeners
    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, Vec::len)
    }

    /// Whether nobody is listening
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the list no longer accepts listeners
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Call every listener with `item`, returning how many were called
    ///
    /// Listeners run outside the lock, so one may register another.
    pub(crate) fn emit(&self, item: &T) -> usize {
        let listeners: Vec<Listener<T>> = self.lock().clone().unwrap_or_default();
        for listener in &listeners {
            listener(item);
        }
        listeners.len()
    }

    fn close(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<Listener<T>>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

/// Listener lists for every event a session emits
///
/// - `message`: one per decoded stdout line
/// - `stderr`: one per decoded stderr line
/// - `data`: one per raw chunk, binary mode only
/// - `error`: decode failures as they happen, and the process failure at
///   termination (see [`crate::session::arbiter::raises_error_event`])
/// - `close`: once, after termination, whatever the outcome
#[derive(Debug)]
pub struct SessionEvents {
    message: Listeners<Message>,
    stderr: Listeners<Message>,
    data: Listeners<RawChunk>,
    error: Listeners<ShellError>,
    close: Listeners<()>,
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEvents {
    /// Create empty listener lists
    pub fn new() -> Self {
        Self {
            message: Listeners::new(),
            stderr: Listeners::new(),
            data: Listeners::new(),
            error: Listeners::new(),
            close: Listeners::new(),
        }
    }

    /// Listen for decoded stdout lines
    pub fn on_message<F>(&self, listener: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.message.add(listener);
    }

    /// Listen for decoded stderr lines
    pub fn on_stderr<F>(&self, listener: F)
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.stderr.add(listener);
    }

    /// Listen for raw chunks (binary mode)
    pub fn on_data<F>(&self, listener: F)
    where
        F: Fn(&RawChunk) + Send + Sync + 'static,
    {
        self.data.add(listener);
    }

    /// Listen for errors
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&ShellError) + Send + Sync + 'static,
    {
        self.error.add(listener);
    }

    /// Listen for the session closing
    pub fn on_close<F>(&self, listener: F)
    where
        F: Fn(&()) + Send + Sync + 'static,
    {
        self.close.add(listener);
    }

    /// Receive decoded stdout lines through a channel
    ///
    /// The channel closes once the session has closed; subscribing after
    /// that returns a receiver that is already closed.
    pub fn subscribe_messages(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.message.add(move |message: &Message| {
            let _ = tx.send(message.clone());
        });
        rx
    }

    /// Receive decoded stderr lines through a channel
    pub fn subscribe_stderr(&self) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.stderr.add(move |message: &Message| {
            let _ = tx.send(message.clone());
        });
        rx
    }

    /// Whether the session has closed and listeners are no longer accepted
    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    /// Whether an explicit error listener is registered
    pub fn has_error_listeners(&self) -> bool {
        !self.error.is_empty()
    }

    pub(crate) fn emit_message(&self, message: &Message) {
        self.message.emit(message);
    }

    pub(crate) fn emit_stderr(&self, message: &Message) {
        self.stderr.emit(message);
    }

    pub(crate) fn emit_data(&self, chunk: &RawChunk) {
        self.data.emit(chunk);
    }

    pub(crate) fn emit_error(&self, error: &ShellError) -> usize {
        self.error.emit(error)
    }

    pub(crate) fn emit_close(&self) {
        self.close.emit(&());
    }

    /// Drop every listener and refuse new ones, closing channel subscriptions
    pub(crate) fn release(&self) {
        self.message.close();
        self.stderr.close();
        self.data.close();
        self.error.close();
        self.close.close();
    }
}
