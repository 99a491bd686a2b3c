// SPDX-License-Identifier: MPL-2.0

//! The worker thread of an encrypted device.
//!
//! Each device has exactly one worker. It takes bios from the request queue
//! one at a time, in arrival order, and carries each of them out against
//! the backing device before looking at the next one:
//!
//! - a read is read from the backing device and decrypted into the bio;
//! - a write is encrypted into a scratch buffer and written to the backing
//!   device, leaving the bio's own memory untouched;
//! - a flush is forwarded to the backing device.
//!
//! The worker owns the sector cipher, so the key material is erased as soon
//! as the worker exits.

use core::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

use aster_block::{
    bio::{BioStatus, BioType, SubmittedBio},
    BlockDevice,
};
use zeroize::Zeroizing;

use crate::{os, prelude::*, queue::RequestQueue, sector::SectorCipher};

/// The state of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Sleeping on an empty queue.
    Idle = 0,
    /// Carrying out a bio.
    Processing = 1,
    /// Exiting after the queue has been closed.
    Draining = 2,
    /// Exited.
    Dead = 3,
}

/// The state of a worker, observable from other threads.
#[derive(Debug)]
pub struct WorkerStatus(AtomicU8);

impl WorkerStatus {
    fn new() -> Self {
        Self(AtomicU8::new(WorkerState::Idle as u8))
    }

    pub fn get(&self) -> WorkerState {
        match self.0.load(Ordering::Acquire) {
            0 => WorkerState::Idle,
            1 => WorkerState::Processing,
            2 => WorkerState::Draining,
            _ => WorkerState::Dead,
        }
    }

    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

pub(crate) struct Worker {
    name: String,
    queue: Arc<RequestQueue>,
    backing: Arc<dyn BlockDevice>,
    cipher: SectorCipher,
    data_offset: usize,
    status: Arc<WorkerStatus>,
}

impl Worker {
    pub(crate) fn new(
        name: &str,
        queue: Arc<RequestQueue>,
        backing: Arc<dyn BlockDevice>,
        cipher: SectorCipher,
        data_offset: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            queue,
            backing,
            cipher,
            data_offset,
            status: Arc::new(WorkerStatus::new()),
        }
    }

    pub(crate) fn status(&self) -> &Arc<WorkerStatus> {
        &self.status
    }

    /// Starts the worker thread.
    pub(crate) fn spawn(self) -> Result<JoinHandle<()>> {
        let thread_name = format!("bde-{}", self.name);
        os::spawn(thread_name, move || self.run())
    }

    fn run(self) {
        debug!("[Bde] {}: worker started", self.name);
        while let Some(bio) = self.queue.dequeue() {
            self.status.set(WorkerState::Processing);
            let status = self.process(&bio);
            trace!(
                "[Bde] {}: {:?} {:?} -> {:?}",
                self.name,
                bio.type_(),
                bio.sid_range(),
                status
            );
            bio.complete(status);
            if self.queue.is_empty() {
                self.status.set(WorkerState::Idle);
            }
        }

        self.status.set(WorkerState::Draining);
        debug!("[Bde] {}: worker exiting", self.name);
        let status = self.status.clone();
        drop(self);
        status.set(WorkerState::Dead);
    }

    fn process(&self, bio: &SubmittedBio) -> BioStatus {
        match bio.type_() {
            BioType::Read => self.read(bio),
            BioType::Write => self.write(bio),
            BioType::Flush => match self.backing.sync() {
                Ok(status) => status,
                Err(e) => backing_status(e),
            },
            BioType::Discard => BioStatus::NotSupported,
        }
    }

    fn read(&self, bio: &SubmittedBio) -> BioStatus {
        let range = bio.byte_range();
        let first_sector = (range.start / self.cipher.sector_size()) as u64;
        let (Some(mut sealed), Some(plain)) = (alloc_buf(range.len()), alloc_buf(range.len()))
        else {
            return BioStatus::NoSpace;
        };
        let mut plain = Zeroizing::new(plain);

        if let Err(e) = self
            .backing
            .read_bytes(self.data_offset + range.start, &mut sealed)
        {
            error!("[Bde] {}: backing read at {:?} failed: {}", self.name, range, e);
            return backing_status(e);
        }
        if let Err(e) = self.cipher.decrypt(first_sector, &sealed, &mut plain) {
            error!("[Bde] {}: {}", self.name, e);
            return BioStatus::IoError;
        }
        bio.scatter_from(&plain);
        BioStatus::Complete
    }

    fn write(&self, bio: &SubmittedBio) -> BioStatus {
        let range = bio.byte_range();
        let first_sector = (range.start / self.cipher.sector_size()) as u64;
        let (Some(plain), Some(mut sealed)) = (alloc_buf(range.len()), alloc_buf(range.len()))
        else {
            return BioStatus::NoSpace;
        };
        let mut plain = Zeroizing::new(plain);

        bio.gather_into(&mut plain);
        if let Err(e) = self.cipher.encrypt(first_sector, &plain, &mut sealed) {
            error!("[Bde] {}: {}", self.name, e);
            return BioStatus::IoError;
        }
        if let Err(e) = self
            .backing
            .write_bytes(self.data_offset + range.start, &sealed)
        {
            error!("[Bde] {}: backing write at {:?} failed: {}", self.name, range, e);
            return backing_status(e);
        }
        BioStatus::Complete
    }
}

/// Allocates a zeroed buffer, or returns `None` if memory is short.
fn alloc_buf(len: usize) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).ok()?;
    buf.resize(len, 0);
    Some(buf)
}

/// Maps a failure of the backing device to the status of the original bio.
fn backing_status(error: aster_block::Error) -> BioStatus {
    match error {
        aster_block::Error::Io(status) => status,
        aster_block::Error::Enqueue(_) | aster_block::Error::InvalidArgs => BioStatus::IoError,
    }
}
