// SPDX-License-Identifier: MPL-2.0

//! The request queue of an encrypted device.
//!
//! The queue is a FIFO handoff from any number of submitting threads to the
//! single worker thread. Its lock also guards the liveness of the device and
//! the access counts on it, so that closing the device, refusing new
//! requests and refusing new opens happen as one step.

use std::collections::VecDeque;

use aster_block::{
    bio::{BioStatus, SubmittedBio},
    AccessCounts, AccessDelta, AccessError, AccessTable,
};

use crate::{
    os::{Mutex, WaitQueue},
    prelude::*,
};

/// A FIFO queue of submitted bios.
pub struct RequestQueue {
    inner: Mutex<QueueInner>,
    wait_queue: WaitQueue,
}

#[derive(Default)]
struct QueueInner {
    requests: VecDeque<SubmittedBio>,
    is_closed: bool,
    access_totals: AccessCounts,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            wait_queue: WaitQueue::new(),
        }
    }

    /// Appends `bio` to the tail and wakes the worker.
    ///
    /// Never blocks beyond the queue lock. Gives `bio` back if the queue is
    /// closed.
    pub fn enqueue(&self, bio: SubmittedBio) -> core::result::Result<(), SubmittedBio> {
        {
            let mut inner = self.inner.lock();
            if inner.is_closed {
                return Err(bio);
            }
            inner.requests.push_back(bio);
        }
        self.wait_queue.wake_one();
        Ok(())
    }

    /// Removes the bio at the head, sleeping while the queue is empty.
    ///
    /// Returns `None` once the queue is closed.
    pub fn dequeue(&self) -> Option<SubmittedBio> {
        self.wait_queue.wait_until(|| {
            let mut inner = self.inner.lock();
            if inner.is_closed {
                return Some(None);
            }
            inner.requests.pop_front().map(Some)
        })
    }

    /// Closes the queue and fails every bio not yet started with
    /// [`BioStatus::NoDevice`].
    ///
    /// The worker finishes the bio it is processing, if any, then observes
    /// the closed queue and exits. Returns the number of bios failed.
    pub fn drain_and_shutdown(&self) -> usize {
        let pending = {
            let mut inner = self.inner.lock();
            inner.is_closed = true;
            core::mem::take(&mut inner.requests)
        };
        self.fail_and_wake(pending)
    }

    /// Like [`drain_and_shutdown`](Self::drain_and_shutdown), but refuses to
    /// close the queue while any access is held on the device.
    pub fn try_drain_and_shutdown(&self) -> core::result::Result<usize, AccessError> {
        let pending = {
            let mut inner = self.inner.lock();
            if !inner.access_totals.is_zero() {
                return Err(AccessError::Busy);
            }
            inner.is_closed = true;
            core::mem::take(&mut inner.requests)
        };
        Ok(self.fail_and_wake(pending))
    }

    fn fail_and_wake(&self, pending: VecDeque<SubmittedBio>) -> usize {
        self.wait_queue.wake_all();
        let nr_pending = pending.len();
        for bio in pending {
            bio.complete(BioStatus::NoDevice);
        }
        nr_pending
    }

    /// Applies an access change requested by a consumer holding `held`.
    ///
    /// No access can be gained once the queue is closed.
    pub fn apply_access(
        &self,
        held: AccessCounts,
        delta: AccessDelta,
    ) -> core::result::Result<AccessCounts, AccessError> {
        let mut inner = self.inner.lock();
        let totals = AccessTable::check(&inner.access_totals, held, delta, inner.is_closed)?;
        inner.access_totals = totals;
        Ok(totals)
    }

    /// Returns the access totals held on the device.
    pub fn access_totals(&self) -> AccessCounts {
        self.inner.lock().access_totals
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_closed
    }

    /// Returns the number of bios waiting to be processed.
    pub fn len(&self) -> usize {
        self.inner.lock().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("RequestQueue")
            .field("nr_requests", &inner.requests.len())
            .field("is_closed", &inner.is_closed)
            .field("access_totals", &inner.access_totals)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_device {
    use aster_block::{
        bio::{BioEnqueueError, BioStatus, SubmittedBio},
        AccessCounts, AccessDelta, AccessError, BlockDevice, BlockDeviceMeta,
    };

    use super::RequestQueue;
    use crate::prelude::*;

    /// A device that puts every bio into a queue and nothing else.
    #[derive(Debug)]
    pub(crate) struct QueueOnly(pub(crate) Arc<RequestQueue>);

    impl BlockDevice for QueueOnly {
        fn enqueue(&self, bio: SubmittedBio) -> core::result::Result<(), BioEnqueueError> {
            if let Err(bio) = self.0.enqueue(bio) {
                bio.complete(BioStatus::NoDevice);
            }
            Ok(())
        }

        fn metadata(&self) -> BlockDeviceMeta {
            BlockDeviceMeta {
                max_nr_segments_per_bio: usize::MAX,
                nr_sectors: 1024,
                sector_size: 512,
            }
        }

        fn name(&self) -> &str {
            "queue-only"
        }

        fn access(
            &self,
            held: AccessCounts,
            delta: AccessDelta,
        ) -> core::result::Result<(), AccessError> {
            self.0.apply_access(held, delta).map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use aster_block::{
        bio::{Bio, BioDirection, BioSegment, BioType},
        id::Sid,
    };

    use super::{test_device::QueueOnly, *};

    fn read_bio(sid: u64) -> Bio {
        Bio::new(
            BioType::Read,
            Sid::new(sid),
            vec![BioSegment::alloc(512, BioDirection::FromDevice)],
            None,
        )
    }

    #[test]
    fn dequeues_in_arrival_order() {
        let queue = Arc::new(RequestQueue::new());
        let device = QueueOnly(queue.clone());
        let waiters: Vec<_> = (0..4)
            .map(|sid| read_bio(sid).submit(&device).unwrap())
            .collect();
        assert_eq!(queue.len(), 4);

        for sid in 0..4 {
            let bio = queue.dequeue().unwrap();
            assert_eq!(bio.sid_range().start, Sid::new(sid));
            bio.complete(BioStatus::Complete);
        }
        for waiter in waiters {
            assert_eq!(waiter.wait(), Some(BioStatus::Complete));
        }
    }

    #[test]
    fn shutdown_wakes_a_sleeping_consumer() {
        let queue = Arc::new(RequestQueue::new());
        let cloned = queue.clone();
        let consumer = thread::spawn(move || cloned.dequeue().is_none());
        assert_eq!(queue.drain_and_shutdown(), 0);
        assert!(consumer.join().unwrap());
    }

    #[test]
    fn shutdown_fails_queued_and_later_bios() {
        let queue = Arc::new(RequestQueue::new());
        let device = QueueOnly(queue.clone());
        let queued = read_bio(0).submit(&device).unwrap();

        assert_eq!(queue.drain_and_shutdown(), 1);
        assert_eq!(queued.wait(), None);
        assert_eq!(queued.status(0), BioStatus::NoDevice);

        let late = read_bio(1).submit(&device).unwrap();
        assert_eq!(late.status(0), BioStatus::NoDevice);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn busy_queue_refuses_to_close() {
        let queue = RequestQueue::new();
        queue
            .apply_access(AccessCounts::default(), AccessDelta::READ)
            .unwrap();
        assert_eq!(queue.try_drain_and_shutdown(), Err(AccessError::Busy));
        assert!(!queue.is_closed());

        let held = AccessCounts {
            read: 1,
            ..Default::default()
        };
        queue
            .apply_access(held, AccessDelta::new(-1, 0, 0))
            .unwrap();
        assert_eq!(queue.try_drain_and_shutdown(), Ok(0));
        assert_eq!(
            queue.apply_access(AccessCounts::default(), AccessDelta::READ),
            Err(AccessError::NoDevice)
        );
    }
}
