// SPDX-License-Identifier: MPL-2.0

//! The block I/O framework.
//!
//! A block device is a *provider* of sectors. Users of a provider are
//! *consumers*, which must announce how they access the provider (read,
//! write, exclusive) before issuing I/O. I/O is carried out by `Bio`s that
//! are submitted to the provider and completed asynchronously, possibly on
//! another thread.
//!
//! Providers may be stacked: a transforming device consumes one provider
//! and exposes another. When the bottom provider disappears, every consumer
//! that registered an [`OrphanListener`] gets notified so that it can fail
//! outstanding requests and tear itself down.

#![deny(unsafe_code)]

pub mod access;
pub mod bio;
mod error;
pub mod id;
mod impl_block_device;
mod mem_disk;
pub mod orphan;
mod prelude;

use std::{any::Any, fmt::Debug, sync::Weak};

pub use self::{
    access::{AccessCounts, AccessDelta, AccessError, AccessTable, Consumer},
    error::Error,
    mem_disk::MemDisk,
    orphan::{OrphanListener, OrphanNotifier},
};
use self::bio::{BioEnqueueError, SubmittedBio};

pub const BLOCK_SIZE: usize = 4096;
pub const SECTOR_SIZE: usize = 512;

/// A block device, i.e., a provider of sectors.
pub trait BlockDevice: Send + Sync + Any + Debug {
    /// Enqueues a new `SubmittedBio` to the block device.
    ///
    /// A device either takes the ownership of the bio and completes it
    /// eventually, or refuses it synchronously with an error. A refused bio
    /// has not been acted upon.
    fn enqueue(&self, bio: SubmittedBio) -> Result<(), BioEnqueueError>;

    /// Returns the metadata of the block device.
    fn metadata(&self) -> BlockDeviceMeta;

    /// Returns the name of the block device.
    fn name(&self) -> &str;

    /// Changes the access counts held on this device by one consumer.
    ///
    /// `held` is what the requesting consumer holds before the change, so
    /// that the device can tell its accesses apart from those of others.
    fn access(&self, held: AccessCounts, delta: AccessDelta) -> Result<(), AccessError>;

    /// Registers a listener to be notified when the device disappears.
    fn register_orphan_listener(&self, _listener: Weak<dyn OrphanListener>) {}
}

/// Metadata for a block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDeviceMeta {
    /// The upper limit for the number of segments per bio.
    pub max_nr_segments_per_bio: usize,
    /// The total number of sectors of the block device.
    ///
    /// Sectors are always counted in units of [`SECTOR_SIZE`].
    pub nr_sectors: usize,
    /// The size in bytes of the smallest unit the device can do I/O on.
    ///
    /// It is a multiple of [`SECTOR_SIZE`].
    pub sector_size: usize,
}

impl BlockDeviceMeta {
    /// Returns the capacity of the device in bytes.
    pub fn nbytes(&self) -> usize {
        self.nr_sectors * SECTOR_SIZE
    }
}
