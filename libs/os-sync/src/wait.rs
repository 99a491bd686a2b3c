// SPDX-License-Identifier: MPL-2.0

use std::time::{Duration, Instant};

use crate::{Condvar, Mutex};

/// A wait queue.
///
/// One may wait on a wait queue to put its executing thread to sleep.
/// Multiple threads may be the waiters of a wait queue.
/// Other threads may invoke the `wake`-family methods of a wait queue to
/// wake up one or many waiting threads.
#[derive(Debug, Default)]
pub struct WaitQueue {
    lock: Mutex<()>,
    cond: Condvar,
}

impl WaitQueue {
    /// Creates a new, empty wait queue.
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Waits until some condition is met.
    ///
    /// The method only returns if the condition returns `Some(_)`.
    /// A waker thread should first make the condition `Some(_)`, then invoke the
    /// `wake`-family method. This ordering ensures that waiter threads do not
    /// lose any wakeup notifications.
    pub fn wait_until<F, R>(&self, mut cond: F) -> R
    where
        F: FnMut() -> Option<R>,
    {
        if let Some(res) = cond() {
            return res;
        }

        let mut guard = self.lock.lock();
        loop {
            if let Some(res) = cond() {
                return res;
            }
            guard = self.cond.wait(guard);
        }
    }

    /// Waits until some condition is met or `timeout` elapses.
    ///
    /// Returns `None` on timeout.
    pub fn wait_until_timeout<F, R>(&self, mut cond: F, timeout: Duration) -> Option<R>
    where
        F: FnMut() -> Option<R>,
    {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        loop {
            if let Some(res) = cond() {
                return Some(res);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            guard = self.cond.wait_timeout(guard, deadline - now).0;
        }
    }

    /// Wakes up one waiting thread.
    pub fn wake_one(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_one();
    }

    /// Wakes up all waiting threads.
    pub fn wake_all(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread,
    };

    use super::*;

    #[test]
    fn wake_all_releases_waiters() {
        let queue = Arc::new(WaitQueue::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let flag = flag.clone();
                thread::spawn(move || {
                    queue.wait_until(|| flag.load(Ordering::Acquire).then_some(()))
                })
            })
            .collect();

        flag.store(true, Ordering::Release);
        queue.wake_all();
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn wait_until_timeout_expires() {
        let queue = WaitQueue::new();
        let res: Option<()> = queue.wait_until_timeout(|| None, Duration::from_millis(10));
        assert!(res.is_none());
    }
}
