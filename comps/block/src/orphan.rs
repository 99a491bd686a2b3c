// SPDX-License-Identifier: MPL-2.0

//! Notifications about providers going away.

use crate::prelude::*;

/// A party interested in the disappearance of a provider.
pub trait OrphanListener: Send + Sync {
    /// Called once the provider has gone away.
    ///
    /// By the time of the call, the provider fails all outstanding and new
    /// I/O, so the listener may wait for its in-flight bios to complete.
    fn on_orphan(&self);
}

/// The listeners of one provider.
pub struct OrphanNotifier {
    listeners: Mutex<Option<Vec<Weak<dyn OrphanListener>>>>,
}

impl OrphanNotifier {
    /// Creates a notifier with no listener.
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Some(Vec::new())),
        }
    }

    /// Registers a listener.
    ///
    /// If the provider has already gone away, the listener is notified
    /// right away.
    pub fn register(&self, listener: Weak<dyn OrphanListener>) {
        let mut listeners = self.listeners.lock();
        match listeners.as_mut() {
            Some(listeners) => {
                listeners.retain(|listener| listener.strong_count() > 0);
                listeners.push(listener);
            }
            None => {
                drop(listeners);
                if let Some(listener) = listener.upgrade() {
                    listener.on_orphan();
                }
            }
        }
    }

    /// Notifies every live listener, exactly once.
    ///
    /// Later calls do nothing.
    pub fn notify(&self) {
        // Listeners run without the lock held since they may tear down
        // objects that register on this notifier.
        let Some(listeners) = self.listeners.lock().take() else {
            return;
        };
        for listener in listeners.iter().filter_map(Weak::upgrade) {
            listener.on_orphan();
        }
    }

    /// Returns whether `notify` has been called.
    pub fn is_notified(&self) -> bool {
        self.listeners.lock().is_none()
    }
}

impl Default for OrphanNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for OrphanNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.lock();
        f.debug_struct("OrphanNotifier")
            .field("nr_listeners", &listeners.as_ref().map(Vec::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    struct Counter(AtomicUsize);

    impl OrphanListener for Counter {
        fn on_orphan(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn notifies_once() {
        let notifier = OrphanNotifier::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        notifier.register(Arc::downgrade(&counter) as Weak<dyn OrphanListener>);

        notifier.notify();
        notifier.notify();
        assert!(notifier.is_notified());
        assert_eq!(counter.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn late_listener_is_notified_on_register() {
        let notifier = OrphanNotifier::new();
        notifier.notify();

        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        notifier.register(Arc::downgrade(&counter) as Weak<dyn OrphanListener>);
        assert_eq!(counter.0.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn dropped_listener_is_skipped() {
        let notifier = OrphanNotifier::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        notifier.register(Arc::downgrade(&counter) as Weak<dyn OrphanListener>);
        drop(counter);
        notifier.notify();
    }
}
