// SPDX-License-Identifier: MPL-2.0

use core::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use aster_block::{
    bio::{BioEnqueueError, BioStatus, BioType, SubmittedBio},
    AccessCounts, AccessDelta, AccessError, BlockDevice, BlockDeviceMeta, Consumer,
    OrphanListener, OrphanNotifier, SECTOR_SIZE,
};

use crate::{
    lock::{self, Geometry},
    os::{self, Mutex},
    prelude::*,
    queue::RequestQueue,
    sector::SectorCipher,
    worker::{Worker, WorkerState, WorkerStatus},
};

/// An encrypted block device.
///
/// The device consumes a backing device, which it holds open exclusively
/// for its whole life, and provides the plaintext view of the data area of
/// the backing device. I/O is carried out by a dedicated worker thread.
///
/// The device is torn down when it is dismantled, when the backing device
/// goes away and the last opener closes it, or when it is dropped.
pub struct EncryptedDevice {
    name: String,
    geometry: Geometry,
    max_nr_segments_per_bio: usize,
    /// The consumer of the backing device.
    ///
    /// It is released once the worker has exited.
    consumer: Mutex<Option<Consumer>>,
    backing_name: String,
    queue: Arc<RequestQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_status: Arc<WorkerStatus>,
    is_orphaned: AtomicBool,
    orphan_notifier: OrphanNotifier,
}

impl EncryptedDevice {
    /// Opens `backing` with `passphrase` and starts the device.
    ///
    /// Nothing is left behind on failure.
    pub fn attach(
        name: &str,
        backing: Arc<dyn BlockDevice>,
        passphrase: &[u8],
    ) -> Result<Arc<Self>> {
        let consumer = Consumer::open(backing.clone(), AccessDelta::EXCLUSIVE)?;
        let unlocked = lock::unlock(&*backing, passphrase)?;
        let geometry = unlocked.geometry;

        let queue = Arc::new(RequestQueue::new());
        let cipher = SectorCipher::new(unlocked.key, geometry.sector_size);
        let worker = Worker::new(
            name,
            queue.clone(),
            backing.clone(),
            cipher,
            geometry.data_offset,
        );
        let worker_status = worker.status().clone();
        let handle = worker.spawn()?;

        let device = Arc::new(Self {
            name: name.to_string(),
            geometry,
            max_nr_segments_per_bio: backing.metadata().max_nr_segments_per_bio,
            consumer: Mutex::new(Some(consumer)),
            backing_name: backing.name().to_string(),
            queue,
            worker: Mutex::new(Some(handle)),
            worker_status,
            is_orphaned: AtomicBool::new(false),
            orphan_notifier: OrphanNotifier::new(),
        });
        let listener: Weak<dyn OrphanListener> = Arc::downgrade(&device) as _;
        backing.register_orphan_listener(listener);

        info!(
            "[Bde] attached {} on {}: sector size {}, media size {}, key slot {}",
            device.name,
            device.backing_name,
            geometry.sector_size,
            geometry.media_size,
            unlocked.slot
        );
        Ok(device)
    }

    /// Returns the geometry.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Returns the name of the backing device.
    pub fn backing_name(&self) -> &str {
        &self.backing_name
    }

    /// Returns the state of the worker.
    pub fn worker_state(&self) -> WorkerState {
        self.worker_status.get()
    }

    /// Returns whether the device refuses new I/O and new opens.
    pub fn is_dead(&self) -> bool {
        self.queue.is_closed()
    }

    /// Returns whether the backing device has gone away.
    pub fn is_orphaned(&self) -> bool {
        self.is_orphaned.load(Ordering::Acquire)
    }

    /// Returns the access totals held on this device.
    pub fn access_totals(&self) -> AccessCounts {
        self.queue.access_totals()
    }

    /// Stops the device unless it is held open.
    pub(crate) fn begin_dismantle(&self) -> Result<()> {
        let nr_discarded = self.queue.try_drain_and_shutdown()?;
        if nr_discarded > 0 {
            warn!("[Bde] {}: discarded {} queued bios", self.name, nr_discarded);
        }
        Ok(())
    }

    /// Waits for the worker to exit, then releases the backing device.
    ///
    /// The queue must have been closed. Calling it more than once is fine.
    pub(crate) fn teardown(&self) {
        debug_assert!(self.queue.is_closed());

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if os::is_current_thread(&handle) {
                // Cannot join itself; the worker is on its way out anyway.
                debug!("[Bde] {}: torn down from its own worker", self.name);
            } else if handle.join().is_err() {
                error!("[Bde] {}: worker panicked", self.name);
            }
        }

        let consumer = self.consumer.lock().take();
        if consumer.is_some() {
            drop(consumer);
            info!("[Bde] {}: torn down", self.name);
        }
    }

    /// Reverts a change of access counts that the backing device refused.
    fn roll_back_access(&self, held: AccessCounts, delta: AccessDelta) {
        let undo = AccessDelta::new(-delta.read, -delta.write, -delta.exclusive);
        let rolled_back = held
            .checked_apply(delta)
            .ok_or(AccessError::InvalidArgs)
            .and_then(|held| self.queue.apply_access(held, undo));
        if let Err(e) = rolled_back {
            error!(
                "[Bde] {}: access counts out of step with {} after failing to undo {:?}: {:?}",
                self.name, self.backing_name, delta, e
            );
        }
    }

    fn check_bio(&self, bio: &SubmittedBio) -> core::result::Result<(), BioEnqueueError> {
        // Bounds are checked in sector units before any byte offset is formed.
        // An empty request must still start inside the media.
        let nr_sectors = (self.geometry.media_size / SECTOR_SIZE) as u64;
        let sid_range = bio.sid_range();
        if sid_range.start.to_raw() >= nr_sectors || sid_range.end.to_raw() > nr_sectors {
            return Err(BioEnqueueError::OutOfRange);
        }
        let range = bio.byte_range();
        if range.start % self.geometry.sector_size != 0
            || range.end % self.geometry.sector_size != 0
        {
            return Err(BioEnqueueError::Misaligned);
        }
        if bio.segments().len() > self.max_nr_segments_per_bio {
            return Err(BioEnqueueError::TooBig);
        }
        Ok(())
    }
}

impl BlockDevice for EncryptedDevice {
    fn enqueue(&self, bio: SubmittedBio) -> core::result::Result<(), BioEnqueueError> {
        match bio.type_() {
            BioType::Discard => {
                warn!("[Bde] {}: discard operation not supported", self.name);
                bio.complete(BioStatus::NotSupported);
                return Ok(());
            }
            BioType::Read | BioType::Write => {
                self.check_bio(&bio)?;
                if bio.nbytes() == 0 {
                    bio.complete(BioStatus::Complete);
                    return Ok(());
                }
            }
            BioType::Flush => (),
        }

        if let Err(bio) = self.queue.enqueue(bio) {
            bio.complete(BioStatus::NoDevice);
        }
        Ok(())
    }

    fn metadata(&self) -> BlockDeviceMeta {
        BlockDeviceMeta {
            max_nr_segments_per_bio: self.max_nr_segments_per_bio,
            nr_sectors: self.geometry.media_size / aster_block::SECTOR_SIZE,
            sector_size: self.geometry.sector_size,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn access(
        &self,
        held: AccessCounts,
        delta: AccessDelta,
    ) -> core::result::Result<(), AccessError> {
        let totals = self.queue.apply_access(held, delta)?;

        // Mirror the change on the backing device.
        let forwarded = match self.consumer.lock().as_ref() {
            Some(consumer) => consumer.access(delta),
            None => Ok(()),
        };
        if let Err(e) = forwarded {
            self.roll_back_access(held, delta);
            return Err(e);
        }

        if totals.is_zero() && self.is_orphaned() {
            self.teardown();
        }
        Ok(())
    }

    fn register_orphan_listener(&self, listener: Weak<dyn OrphanListener>) {
        self.orphan_notifier.register(listener);
    }
}

impl OrphanListener for EncryptedDevice {
    fn on_orphan(&self) {
        if self.is_orphaned.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(
            "[Bde] {}: backing device {} has gone away",
            self.name, self.backing_name
        );

        let nr_discarded = self.queue.drain_and_shutdown();
        if nr_discarded > 0 {
            warn!("[Bde] {}: failed {} queued bios", self.name, nr_discarded);
        }
        self.orphan_notifier.notify();

        if self.queue.access_totals().is_zero() {
            self.teardown();
        }
    }
}

impl Drop for EncryptedDevice {
    fn drop(&mut self) {
        self.queue.drain_and_shutdown();
        self.teardown();
    }
}

impl Debug for EncryptedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedDevice")
            .field("name", &self.name)
            .field("backing", &self.backing_name)
            .field("geometry", &self.geometry)
            .field("queue", &self.queue)
            .field("worker_state", &self.worker_state())
            .field("is_orphaned", &self.is_orphaned())
            .finish()
    }
}
