//! Session change observers.
//!
//! A [`Subscription`] is the cancellation handle returned for every
//! registered listener. Cancelling is idempotent and also happens on drop.

use crate::AuthChangeEvent;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Callback invoked for each session change.
pub type SessionListener = Arc<dyn Fn(&AuthChangeEvent) + Send + Sync>;

type CancelFn = Box<dyn FnOnce() + Send>;

/// Handle for a registered listener.
pub struct Subscription {
    on_cancel: Mutex<Option<CancelFn>>,
}

impl Subscription {
    pub fn new(on_cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            on_cancel: Mutex::new(Some(Box::new(on_cancel))),
        }
    }

    /// A handle with nothing to release.
    pub fn detached() -> Self {
        Self {
            on_cancel: Mutex::new(None),
        }
    }

    /// Stop receiving notifications.
    ///
    /// Returns true only for the call that actually cancelled.
    pub fn cancel(&self) -> bool {
        let on_cancel = self.on_cancel.lock().take();
        match on_cancel {
            Some(f) => {
                f();
                true
            }
            None => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.on_cancel.lock().is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, SessionListener>,
}

/// Ordered list of session listeners, shared by store implementations.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Listeners>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener`; it stays registered until the handle is cancelled
    /// or dropped.
    pub fn subscribe(&self, listener: SessionListener) -> Subscription {
        let id = {
            let mut inner = self.inner.lock();
            inner.next_id += 1;
            let id = inner.next_id;
            inner.entries.insert(id, listener);
            id
        };

        let registry: Weak<Mutex<Listeners>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.lock().entries.remove(&id);
            }
        })
    }

    /// Deliver `event` to every listener in registration order.
    ///
    /// Listeners run outside the lock and may subscribe or cancel.
    pub fn emit(&self, event: &AuthChangeEvent) {
        let listeners: Vec<SessionListener> = self.inner.lock().entries.values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> SessionListener {
        let counter = counter.clone();
        Arc::new(move |_event: &AuthChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_emit_reaches_all_listeners() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _a = registry.subscribe(counting(&count));
        let _b = registry.subscribe(counting(&count));

        registry.emit(&AuthChangeEvent::signed_out());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_double_cancel_is_harmless() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = registry.subscribe(counting(&count));

        assert!(sub.cancel());
        assert!(!sub.cancel());
        assert!(sub.is_cancelled());
        assert!(registry.is_empty());

        registry.emit(&AuthChangeEvent::signed_out());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_drop_cancels() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        drop(registry.subscribe(counting(&count)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_after_registry_dropped() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = registry.subscribe(counting(&count));
        drop(registry);
        assert!(sub.cancel());
    }

    #[test]
    fn test_listener_may_cancel_during_emit() {
        let registry = ListenerRegistry::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));

        let slot_in = slot.clone();
        let count_in = count.clone();
        let sub = registry.subscribe(Arc::new(move |_event: &AuthChangeEvent| {
            count_in.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = slot_in.lock().take() {
                sub.cancel();
            }
        }));
        *slot.lock() = Some(sub);

        registry.emit(&AuthChangeEvent::signed_out());
        registry.emit(&AuthChangeEvent::signed_out());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detached_handle() {
        let sub = Subscription::detached();
        assert!(sub.is_cancelled());
        assert!(!sub.cancel());
    }
}
