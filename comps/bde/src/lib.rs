// SPDX-License-Identifier: MPL-2.0

//! A passphrase-locked, sector-encrypting block device.
//!
//! An encrypted device is stacked on a backing block device. The backing
//! device starts with a small header holding the geometry and up to
//! `MAX_KEY_SLOTS` copies of the master key, each wrapped under its own
//! passphrase. The rest of the backing device stores the encrypted sectors.
//!
//! ```text
//!   callers
//!      |  Bio
//!      v
//! EncryptedDevice --enqueue--> RequestQueue --dequeue--> worker thread
//!                                                          |  encrypt/decrypt
//!                                                          v
//!                                                   backing BlockDevice
//! ```
//!
//! Devices are created and removed through a [`BdeClass`]. Headers are
//! managed with the functions of the [`lock`] module.

#![deny(unsafe_code)]

mod class;
mod config;
mod device;
mod error;
mod header;
pub mod lock;
mod os;
mod prelude;
mod queue;
mod sector;
mod util;
mod worker;

pub use self::{
    class::BdeClass,
    config::{FormatOptions, MAX_SECTOR_SIZE, MIN_SECTOR_SIZE},
    device::EncryptedDevice,
    error::{Errno, Error},
    header::{MAX_KEY_SLOTS, RESERVED_SECTORS, VERSION},
    lock::{
        destroy, format, inspect, nuke, set_key, unlock, Geometry, HeaderInfo, KeyMaterial,
        SlotInfo, Unlocked,
    },
    queue::RequestQueue,
    sector::SectorCipher,
    worker::WorkerState,
};
