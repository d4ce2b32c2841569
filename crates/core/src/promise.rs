use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::id::UniqueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseStatus {
    Pending,
    Success,
    Fail,
}

type Callback = Box<dyn FnOnce() + Send>;

struct Inner {
    status: PromiseStatus,
    reason: Option<String>,
    on_success: Option<Callback>,
    on_fail: Option<Callback>,
}

/// Caller-held handle to the outcome of an asynchronous event (a pursue, an
/// action, a delegation). The engine settles it through the weak
/// [`PromiseHook`] carried by the event; if every `Promise` clone is dropped
/// the hook settles into nothing.
///
/// Callbacks run on the engine thread, at settle time. Attaching a callback
/// to an already-settled promise runs it immediately.
#[derive(Clone)]
pub struct Promise {
    event_id: UniqueId,
    state: Arc<Mutex<Inner>>,
}

/// Weak side of a [`Promise`], carried inside events.
#[derive(Clone, Default)]
pub struct PromiseHook {
    state: Weak<Mutex<Inner>>,
}

impl Promise {
    pub fn new(event_id: UniqueId) -> Self {
        Self {
            event_id,
            state: Arc::new(Mutex::new(Inner {
                status: PromiseStatus::Pending,
                reason: None,
                on_success: None,
                on_fail: None,
            })),
        }
    }

    pub fn event_id(&self) -> UniqueId {
        self.event_id
    }

    pub fn hook(&self) -> PromiseHook {
        PromiseHook {
            state: Arc::downgrade(&self.state),
        }
    }

    /// Register a callback for when the event finishes. Without a separate
    /// failure callback this also runs on failure.
    pub fn then(&self, func: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut inner = self.state.lock();
            match inner.status {
                PromiseStatus::Pending => {
                    inner.on_success = Some(Box::new(func));
                    None
                }
                _ => Some(func),
            }
        };
        if let Some(func) = run_now {
            func();
        }
    }

    /// Register a callback that runs only on failure.
    pub fn or_else(&self, func: impl FnOnce() + Send + 'static) {
        let run_now = {
            let mut inner = self.state.lock();
            match inner.status {
                PromiseStatus::Pending => {
                    inner.on_fail = Some(Box::new(func));
                    None
                }
                PromiseStatus::Fail => Some(func),
                PromiseStatus::Success => None,
            }
        };
        if let Some(func) = run_now {
            func();
        }
    }

    pub fn status(&self) -> PromiseStatus {
        self.state.lock().status
    }

    pub fn settled(&self) -> bool {
        self.status() != PromiseStatus::Pending
    }

    pub fn succeeded(&self) -> bool {
        self.status() == PromiseStatus::Success
    }

    pub fn failed(&self) -> bool {
        self.status() == PromiseStatus::Fail
    }

    pub fn reason(&self) -> Option<String> {
        self.state.lock().reason.clone()
    }
}

impl std::fmt::Debug for Promise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("event_id", &self.event_id)
            .field("status", &self.status())
            .finish()
    }
}

impl std::fmt::Debug for PromiseHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PromiseHook")
    }
}

impl PromiseHook {
    pub fn resolve(&self) {
        self.settle(PromiseStatus::Success, None);
    }

    pub fn fail(&self, reason: Option<String>) {
        self.settle(PromiseStatus::Fail, reason);
    }

    fn settle(&self, status: PromiseStatus, reason: Option<String>) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let callback = {
            let mut inner = state.lock();
            if inner.status != PromiseStatus::Pending {
                return;
            }
            inner.status = status;
            inner.reason = reason;
            let on_success = inner.on_success.take();
            let on_fail = inner.on_fail.take();
            match status {
                // A failure without a dedicated handler falls back to the
                // completion callback.
                PromiseStatus::Fail => on_fail.or(on_success),
                _ => on_success,
            }
        };
        if let Some(func) = callback {
            func();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn test_resolve_runs_then() {
        let hits = Arc::new(AtomicU32::new(0));
        let promise = Promise::new(UniqueId::random());
        let h = Arc::clone(&hits);
        promise.then(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        promise.hook().resolve();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(promise.succeeded());
    }

    #[test]
    fn test_fail_prefers_failure_callback() {
        let outcome = Arc::new(Mutex::new(""));
        let promise = Promise::new(UniqueId::random());
        let ok = Arc::clone(&outcome);
        let err = Arc::clone(&outcome);
        promise.then(move || *ok.lock() = "ok");
        promise.or_else(move || *err.lock() = "err");
        promise.hook().fail(Some("nope".into()));
        assert_eq!(*outcome.lock(), "err");
        assert_eq!(promise.reason().as_deref(), Some("nope"));
    }

    #[test]
    fn test_fail_falls_back_to_then() {
        let hits = Arc::new(AtomicU32::new(0));
        let promise = Promise::new(UniqueId::random());
        let h = Arc::clone(&hits);
        promise.then(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        promise.hook().fail(None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_settle_is_idempotent() {
        let promise = Promise::new(UniqueId::random());
        let hook = promise.hook();
        hook.resolve();
        hook.fail(Some("late".into()));
        assert!(promise.succeeded());
        assert_eq!(promise.reason(), None);
    }

    #[test]
    fn test_late_then_runs_immediately() {
        let promise = Promise::new(UniqueId::random());
        promise.hook().resolve();
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        promise.then(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropped_promise_is_a_noop_for_the_hook() {
        let hook = {
            let promise = Promise::new(UniqueId::random());
            promise.hook()
        };
        hook.resolve();
    }
}
