// SPDX-License-Identifier: MPL-2.0

use std::{fmt, time::Duration};

pub use parking_lot::MutexGuard;

/// A mutual exclusion lock whose `lock` never fails.
///
/// A panic while the lock is held releases it without poisoning.
pub struct Mutex<T: ?Sized>(parking_lot::Mutex<T>);

impl<T> Mutex<T> {
    /// Creates a new mutex protecting `val`.
    pub const fn new(val: T) -> Self {
        Self(parking_lot::Mutex::new(val))
    }

    /// Consumes the mutex, returning the protected value.
    pub fn into_inner(self) -> T {
        self.0.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Acquires the lock, blocking the current thread until it is available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock()
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.0.try_lock()
    }

    /// Returns a mutable reference to the protected value.
    pub fn get_mut(&mut self) -> &mut T {
        self.0.get_mut()
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_tuple("Mutex").field(&&*guard).finish(),
            None => f.write_str("Mutex(<locked>)"),
        }
    }
}

/// A condition variable paired with [`Mutex`].
#[derive(Debug, Default)]
pub struct Condvar(parking_lot::Condvar);

impl Condvar {
    /// Creates a new condition variable.
    pub const fn new() -> Self {
        Self(parking_lot::Condvar::new())
    }

    /// Blocks until notified, releasing `guard` while asleep.
    pub fn wait<'a, T>(&self, mut guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.0.wait(&mut guard);
        guard
    }

    /// Blocks until notified or until `timeout` elapses.
    ///
    /// Returns the guard and whether the wait timed out.
    pub fn wait_timeout<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> (MutexGuard<'a, T>, bool) {
        let res = self.0.wait_for(&mut guard, timeout);
        (guard, res.timed_out())
    }

    /// Wakes up one blocked thread.
    pub fn notify_one(&self) {
        self.0.notify_one();
    }

    /// Wakes up all blocked threads.
    pub fn notify_all(&self) {
        self.0.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Instant};

    use super::*;

    #[test]
    fn lock_survives_panicking_holder() {
        let mutex = Arc::new(Mutex::new(7_u32));
        let cloned = mutex.clone();
        let res = thread::spawn(move || {
            let guard = cloned.lock();
            assert_eq!(*guard, 0, "panic while holding the lock");
        })
        .join();
        assert!(res.is_err());

        *mutex.lock() += 1;
        assert_eq!(*mutex.lock(), 8);
    }

    #[test]
    fn try_lock_reports_contention() {
        let mutex = Mutex::new(());
        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn wait_timeout_reports_expiry() {
        let mutex = Mutex::new(());
        let cond = Condvar::new();
        let start = Instant::now();
        let (_guard, timed_out) = cond.wait_timeout(mutex.lock(), Duration::from_millis(10));
        assert!(timed_out);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
