// SPDX-License-Identifier: MPL-2.0

use std::{collections::VecDeque, time::Duration};

use crate::{
    access::{AccessCounts, AccessDelta, AccessError, AccessTable},
    bio::{BioEnqueueError, BioStatus, BioType, SubmittedBio},
    orphan::{OrphanListener, OrphanNotifier},
    prelude::*,
    BlockDevice, BlockDeviceMeta, SECTOR_SIZE,
};

/// An in-memory block device.
///
/// Besides serving I/O from memory, a `MemDisk` can imitate the misbehavior
/// of real hardware: it can hold bios back without completing them
/// ([`pause`]), fail reads, writes or flushes, and disappear ([`remove`]).
///
/// [`pause`]: MemDisk::pause
/// [`remove`]: MemDisk::remove
pub struct MemDisk {
    name: String,
    data: Mutex<Vec<u8>>,
    access: AccessTable,
    state: Mutex<MemDiskState>,
    is_removed: AtomicBool,
    parked_wq: WaitQueue,
    orphan_notifier: OrphanNotifier,
}

#[derive(Default)]
struct MemDiskState {
    is_paused: bool,
    parked: VecDeque<SubmittedBio>,
    fail_reads: bool,
    fail_writes: bool,
    fail_flushes: bool,
}

impl MemDisk {
    /// Creates a zero-filled disk of `nr_sectors` sectors.
    pub fn create(name: &str, nr_sectors: usize) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            data: Mutex::new(vec![0; nr_sectors * SECTOR_SIZE]),
            access: AccessTable::new(),
            state: Mutex::new(MemDiskState::default()),
            is_removed: AtomicBool::new(false),
            parked_wq: WaitQueue::new(),
            orphan_notifier: OrphanNotifier::new(),
        })
    }

    /// Holds back every bio enqueued from now on until [`resume`](Self::resume).
    pub fn pause(&self) {
        self.state.lock().is_paused = true;
    }

    /// Completes the held-back bios in order and stops holding bios back.
    pub fn resume(&self) {
        let parked = {
            let mut state = self.state.lock();
            state.is_paused = false;
            core::mem::take(&mut state.parked)
        };
        for bio in parked {
            self.handle(bio);
        }
    }

    /// Returns the number of held-back bios.
    pub fn nr_parked(&self) -> usize {
        self.state.lock().parked.len()
    }

    /// Waits until at least `nr` bios are held back.
    ///
    /// Returns `false` on timeout.
    pub fn wait_parked(&self, nr: usize, timeout: Duration) -> bool {
        self.parked_wq
            .wait_until_timeout(|| (self.nr_parked() >= nr).then_some(()), timeout)
            .is_some()
    }

    /// Makes reads fail with an I/O error.
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().fail_reads = fail;
    }

    /// Makes writes fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Makes flushes fail with an I/O error.
    pub fn fail_flushes(&self, fail: bool) {
        self.state.lock().fail_flushes = fail;
    }

    /// Imitates hot removal.
    ///
    /// Held-back and future bios fail with [`BioStatus::IoError`], no new
    /// access is granted and the orphan listeners are notified.
    pub fn remove(&self) {
        if self.is_removed.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!("[MemDisk] {} removed", self.name);

        let parked = core::mem::take(&mut self.state.lock().parked);
        for bio in parked {
            bio.complete(BioStatus::IoError);
        }
        self.orphan_notifier.notify();
    }

    /// Returns whether the disk has been removed.
    pub fn is_removed(&self) -> bool {
        self.is_removed.load(Ordering::Acquire)
    }

    /// Reads raw bytes, bypassing the bio path.
    pub fn read_raw(&self, offset: usize, len: usize) -> Vec<u8> {
        self.data.lock()[offset..offset + len].to_vec()
    }

    /// Writes raw bytes, bypassing the bio path.
    pub fn write_raw(&self, offset: usize, buf: &[u8]) {
        self.data.lock()[offset..offset + buf.len()].copy_from_slice(buf);
    }

    /// Returns the access totals held on the disk.
    pub fn access_totals(&self) -> AccessCounts {
        self.access.totals()
    }

    fn handle(&self, bio: SubmittedBio) {
        if self.is_removed() {
            bio.complete(BioStatus::IoError);
            return;
        }

        let (fail_reads, fail_writes, fail_flushes) = {
            let state = self.state.lock();
            (state.fail_reads, state.fail_writes, state.fail_flushes)
        };
        let range = bio.byte_range();
        let status = match bio.type_() {
            BioType::Read if fail_reads => BioStatus::IoError,
            BioType::Write if fail_writes => BioStatus::IoError,
            BioType::Flush if fail_flushes => BioStatus::IoError,
            BioType::Read => {
                let data = self.data.lock();
                bio.scatter_from(&data[range]);
                BioStatus::Complete
            }
            BioType::Write => {
                let mut data = self.data.lock();
                bio.gather_into(&mut data[range]);
                BioStatus::Complete
            }
            BioType::Flush => BioStatus::Complete,
            BioType::Discard => {
                self.data.lock()[range].fill(0);
                BioStatus::Complete
            }
        };
        trace!("[MemDisk] {} {:?} -> {:?}", self.name, bio.sid_range(), status);
        bio.complete(status);
    }
}

impl BlockDevice for MemDisk {
    fn enqueue(&self, bio: SubmittedBio) -> Result<(), BioEnqueueError> {
        if bio.byte_range().end > self.data.lock().len() {
            return Err(BioEnqueueError::OutOfRange);
        }

        {
            let mut state = self.state.lock();
            if state.is_paused && !self.is_removed() {
                state.parked.push_back(bio);
                drop(state);
                self.parked_wq.wake_all();
                return Ok(());
            }
        }

        self.handle(bio);
        Ok(())
    }

    fn metadata(&self) -> BlockDeviceMeta {
        BlockDeviceMeta {
            max_nr_segments_per_bio: usize::MAX,
            nr_sectors: self.data.lock().len() / SECTOR_SIZE,
            sector_size: SECTOR_SIZE,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self, held: AccessCounts, delta: AccessDelta) -> Result<(), AccessError> {
        self.access
            .apply(held, delta, self.is_removed())
            .map(|_| ())
    }

    fn register_orphan_listener(&self, listener: Weak<dyn OrphanListener>) {
        self.orphan_notifier.register(listener);
    }
}

impl Debug for MemDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemDisk")
            .field("name", &self.name)
            .field("nr_sectors", &self.metadata().nr_sectors)
            .field("is_removed", &self.is_removed())
            .field("access", &self.access)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bio::{Bio, BioDirection, BioSegment},
        id::Sid,
    };

    fn write_bio(sid: u64, byte: u8) -> Bio {
        Bio::new(
            BioType::Write,
            Sid::new(sid),
            vec![BioSegment::from_vec(vec![byte; SECTOR_SIZE], BioDirection::ToDevice)],
            None,
        )
    }

    #[test]
    fn paused_bios_complete_in_order_on_resume() {
        let disk = MemDisk::create("md0", 8);
        disk.pause();
        let first = write_bio(1, 1).submit(&*disk).unwrap();
        let second = write_bio(1, 2).submit(&*disk).unwrap();
        assert!(disk.wait_parked(2, Duration::from_secs(1)));

        disk.resume();
        assert_eq!(first.wait(), Some(BioStatus::Complete));
        assert_eq!(second.wait(), Some(BioStatus::Complete));
        assert_eq!(disk.read_raw(SECTOR_SIZE, 1), vec![2]);
    }

    #[test]
    fn remove_fails_parked_and_future_bios() {
        let disk = MemDisk::create("md0", 8);
        disk.pause();
        let parked = write_bio(0, 1).submit(&*disk).unwrap();

        disk.remove();
        assert_eq!(parked.wait(), None);
        assert_eq!(parked.status(0), BioStatus::IoError);

        let late = write_bio(0, 1).submit(&*disk).unwrap();
        assert_eq!(late.status(0), BioStatus::IoError);
        assert_eq!(disk.read_raw(0, 1), vec![0]);
    }

    #[test]
    fn injected_write_failure() {
        let disk = MemDisk::create("md0", 8);
        disk.fail_writes(true);
        let status = write_bio(0, 1).submit_and_wait(&*disk).unwrap();
        assert_eq!(status, BioStatus::IoError);
    }

    #[test]
    fn injected_flush_failure() {
        let disk = MemDisk::create("md0", 8);
        disk.fail_flushes(true);
        assert_eq!(write_bio(0, 1).submit_and_wait(&*disk), Ok(BioStatus::Complete));
        let dev: &dyn BlockDevice = &*disk;
        assert_eq!(dev.sync(), Ok(BioStatus::IoError));
    }
}
