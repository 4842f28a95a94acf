//! Session state shared between the caller's handle and the driver task

use crate::session::arbiter::Completion;
use pyshell_transport::ExitInfo;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lifecycle phase of a session; it only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionPhase {
    /// Being configured, nothing spawned yet
    NotStarted,
    /// Child spawned, streams open
    Running,
    /// Terminated locally or finalized
    Terminated,
}

/// Callback registered through `Session::end`
pub type CompletionCallback = Box<dyn FnOnce(Completion) + Send + 'static>;

enum CompletionSlot {
    Pending(Option<CompletionCallback>),
    Done(Completion),
}

struct Inner {
    phase: SessionPhase,
    exit: Option<ExitInfo>,
    slot: CompletionSlot,
}

/// Phase, exit info and the completion hand-off
pub(crate) struct SessionState {
    inner: Mutex<Inner>,
}

impl SessionState {
    pub(crate) fn running() -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: SessionPhase::Running,
                exit: None,
                slot: CompletionSlot::Pending(None),
            }),
        }
    }

    pub(crate) fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub(crate) fn exit(&self) -> Option<ExitInfo> {
        self.lock().exit.clone()
    }

    /// Move to `Terminated` without waiting for the child
    pub(crate) fn mark_terminated(&self) {
        self.lock().phase = SessionPhase::Terminated;
    }

    pub(crate) fn record_exit(&self, exit: ExitInfo) {
        self.lock().exit = Some(exit);
    }

    /// Store the completion callback
    ///
    /// When the session has already finalized the callback is handed back
    /// together with the recorded completion so the caller can run it.
    pub(crate) fn register_callback(
        &self,
        callback: CompletionCallback,
    ) -> Option<(CompletionCallback, Completion)> {
        let mut inner = self.lock();
        match &mut inner.slot {
            CompletionSlot::Pending(slot) => {
                *slot = Some(callback);
                None
            }
            CompletionSlot::Done(completion) => Some((callback, completion.clone())),
        }
    }

    /// Record the completion and take the callback, if one is registered
    pub(crate) fn finalize(&self, completion: &Completion) -> Option<CompletionCallback> {
        let mut inner = self.lock();
        inner.phase = SessionPhase::Terminated;
        let previous = std::mem::replace(&mut inner.slot, CompletionSlot::Done(completion.clone()));
        match previous {
            CompletionSlot::Pending(callback) => callback,
            CompletionSlot::Done(_) => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(count: &Arc<AtomicUsize>) -> CompletionCallback {
        let count = Arc::clone(count);
        Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_phase_is_monotonic() {
        let state = SessionState::running();
        assert_eq!(state.phase(), SessionPhase::Running);
        state.mark_terminated();
        assert_eq!(state.phase(), SessionPhase::Terminated);
        state.finalize(&Completion::success(ExitInfo::code(0)));
        assert_eq!(state.phase(), SessionPhase::Terminated);
        assert!(SessionPhase::NotStarted < SessionPhase::Running);
    }

    #[test]
    fn test_callback_taken_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let state = SessionState::running();
        assert!(state.register_callback(counting_callback(&count)).is_none());

        let completion = Completion::success(ExitInfo::code(0));
        let callback = state.finalize(&completion).unwrap();
        callback(completion.clone());
        assert!(state.finalize(&completion).is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_callback_gets_recorded_completion() {
        let count = Arc::new(AtomicUsize::new(0));
        let state = SessionState::running();
        let completion = Completion::success(ExitInfo::signal("SIGTERM"));
        assert!(state.finalize(&completion).is_none());

        let (callback, recorded) = state.register_callback(counting_callback(&count)).unwrap();
        assert_eq!(recorded, completion);
        callback(recorded);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
