// SPDX-License-Identifier: MPL-2.0

//! Access counting between consumers and providers.
//!
//! Before doing I/O on a provider, a consumer announces how it is going to
//! access it by adjusting three counts: read, write and exclusive. The
//! provider keeps the totals over all of its consumers and refuses changes
//! that conflict with the accesses of *other* consumers:
//!
//! - a consumer cannot gain exclusive access while another one writes;
//! - a consumer cannot gain write access while another one is exclusive;
//! - nobody gains any access to a provider that has gone away.
//!
//! Dropping counts never fails.

use core::fmt;

use crate::{prelude::*, BlockDevice};

/// Access counts held on a provider, either by one consumer or in total.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct AccessCounts {
    pub read: u32,
    pub write: u32,
    pub exclusive: u32,
}

impl AccessCounts {
    /// Returns whether no access is held.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Applies `delta`, returning `None` if any count would underflow.
    pub fn checked_apply(&self, delta: AccessDelta) -> Option<Self> {
        Some(Self {
            read: self.read.checked_add_signed(delta.read)?,
            write: self.write.checked_add_signed(delta.write)?,
            exclusive: self.exclusive.checked_add_signed(delta.exclusive)?,
        })
    }

    /// Returns `self - other`, saturating at zero.
    pub fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            read: self.read.saturating_sub(other.read),
            write: self.write.saturating_sub(other.write),
            exclusive: self.exclusive.saturating_sub(other.exclusive),
        }
    }

    /// Returns the delta that releases every count in `self`.
    pub fn release_delta(&self) -> AccessDelta {
        AccessDelta {
            read: -(self.read as i32),
            write: -(self.write as i32),
            exclusive: -(self.exclusive as i32),
        }
    }
}

/// A change to access counts.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct AccessDelta {
    pub read: i32,
    pub write: i32,
    pub exclusive: i32,
}

impl AccessDelta {
    /// Creates a delta.
    pub const fn new(read: i32, write: i32, exclusive: i32) -> Self {
        Self {
            read,
            write,
            exclusive,
        }
    }

    /// Read-only access.
    pub const READ: Self = Self::new(1, 0, 0);
    /// Read and write access.
    pub const READ_WRITE: Self = Self::new(1, 1, 0);
    /// Read, write and exclusive access.
    pub const EXCLUSIVE: Self = Self::new(1, 1, 1);

    /// Returns whether any count is increased.
    pub fn is_acquiring(&self) -> bool {
        self.read > 0 || self.write > 0 || self.exclusive > 0
    }
}

/// The error type of access changes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessError {
    /// The change conflicts with accesses held by other consumers.
    Busy,
    /// The provider has gone away.
    NoDevice,
    /// A count would be released more times than it was acquired.
    InvalidArgs,
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::Busy => write!(f, "device is busy"),
            AccessError::NoDevice => write!(f, "device has gone away"),
            AccessError::InvalidArgs => write!(f, "unbalanced access release"),
        }
    }
}

impl std::error::Error for AccessError {}

/// The access totals of one provider.
#[derive(Debug, Default)]
pub struct AccessTable {
    totals: Mutex<AccessCounts>,
}

impl AccessTable {
    /// Creates a table with no access held.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current totals.
    pub fn totals(&self) -> AccessCounts {
        *self.totals.lock()
    }

    /// Applies `delta` requested by a consumer currently holding `held`.
    ///
    /// `is_gone` tells whether the provider has gone away, in which case
    /// only releases are accepted.
    pub fn apply(
        &self,
        held: AccessCounts,
        delta: AccessDelta,
        is_gone: bool,
    ) -> Result<AccessCounts, AccessError> {
        let mut totals = self.totals.lock();
        let new_totals = Self::check(&totals, held, delta, is_gone)?;
        *totals = new_totals;
        Ok(new_totals)
    }

    /// Checks `delta` against `totals` without applying it.
    ///
    /// Returns the totals after the change.
    pub fn check(
        totals: &AccessCounts,
        held: AccessCounts,
        delta: AccessDelta,
        is_gone: bool,
    ) -> Result<AccessCounts, AccessError> {
        held.checked_apply(delta).ok_or(AccessError::InvalidArgs)?;
        let new_totals = totals
            .checked_apply(delta)
            .ok_or(AccessError::InvalidArgs)?;

        let others = totals.saturating_sub(&held);
        if delta.exclusive > 0 && others.write > 0 {
            return Err(AccessError::Busy);
        }
        if delta.write > 0 && others.exclusive > 0 {
            return Err(AccessError::Busy);
        }
        if delta.is_acquiring() && is_gone {
            return Err(AccessError::NoDevice);
        }

        Ok(new_totals)
    }
}

/// A consumer of a block device.
///
/// A `Consumer` remembers the accesses it holds on its device and releases
/// all of them when it is dropped.
pub struct Consumer {
    device: Arc<dyn BlockDevice>,
    held: Mutex<AccessCounts>,
}

impl Consumer {
    /// Attaches a consumer holding no access to `device`.
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            device,
            held: Mutex::new(AccessCounts::default()),
        }
    }

    /// Attaches a consumer to `device` and acquires `delta` on it.
    pub fn open(device: Arc<dyn BlockDevice>, delta: AccessDelta) -> Result<Self, AccessError> {
        let consumer = Self::new(device);
        consumer.access(delta)?;
        Ok(consumer)
    }

    /// Changes the accesses held by this consumer.
    pub fn access(&self, delta: AccessDelta) -> Result<(), AccessError> {
        let mut held = self.held.lock();
        self.device.access(*held, delta)?;
        *held = held.checked_apply(delta).ok_or(AccessError::InvalidArgs)?;
        Ok(())
    }

    /// Returns the accesses held by this consumer.
    pub fn held(&self) -> AccessCounts {
        *self.held.lock()
    }

    /// Returns the device this consumer is attached to.
    pub fn device(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let held = *self.held.get_mut();
        if held.is_zero() {
            return;
        }
        if let Err(e) = self.device.access(held, held.release_delta()) {
            warn!(
                "failed to release {:?} on {}: {:?}",
                held,
                self.device.name(),
                e
            );
        }
    }
}

impl Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("device", &self.device.name())
            .field("held", &self.held())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemDisk;

    #[test]
    fn exclusive_excludes_other_writers() {
        let disk: Arc<dyn BlockDevice> = MemDisk::create("md0", 8);
        let owner = Consumer::open(disk.clone(), AccessDelta::EXCLUSIVE).unwrap();

        // Readers are still welcome.
        let reader = Consumer::open(disk.clone(), AccessDelta::READ).unwrap();
        assert_eq!(
            Consumer::open(disk.clone(), AccessDelta::READ_WRITE).unwrap_err(),
            AccessError::Busy
        );

        // The owner itself may stack further accesses on top.
        owner.access(AccessDelta::new(1, 1, 0)).unwrap();
        assert_eq!(owner.held(), AccessCounts { read: 2, write: 2, exclusive: 1 });

        drop(reader);
        drop(owner);
        Consumer::open(disk, AccessDelta::EXCLUSIVE).unwrap();
    }

    #[test]
    fn writer_excludes_other_exclusive() {
        let disk: Arc<dyn BlockDevice> = MemDisk::create("md0", 8);
        let _writer = Consumer::open(disk.clone(), AccessDelta::READ_WRITE).unwrap();
        assert_eq!(
            Consumer::open(disk, AccessDelta::new(0, 0, 1)).unwrap_err(),
            AccessError::Busy
        );
    }

    #[test]
    fn drop_releases_held_counts() {
        let disk = MemDisk::create("md0", 8);
        let consumer = Consumer::open(disk.clone(), AccessDelta::EXCLUSIVE).unwrap();
        assert_eq!(disk.access_totals().exclusive, 1);
        drop(consumer);
        assert!(disk.access_totals().is_zero());
    }

    #[test]
    fn unbalanced_release_is_rejected() {
        let disk: Arc<dyn BlockDevice> = MemDisk::create("md0", 8);
        let consumer = Consumer::open(disk, AccessDelta::READ).unwrap();
        assert_eq!(
            consumer.access(AccessDelta::new(0, -1, 0)).unwrap_err(),
            AccessError::InvalidArgs
        );
        assert_eq!(consumer.held(), AccessCounts { read: 1, write: 0, exclusive: 0 });
    }

    #[test]
    fn gone_provider_refuses_new_access() {
        let disk = MemDisk::create("md0", 8);
        let consumer = Consumer::open(disk.clone(), AccessDelta::READ).unwrap();
        disk.remove();
        assert_eq!(
            Consumer::open(disk.clone(), AccessDelta::READ).unwrap_err(),
            AccessError::NoDevice
        );
        drop(consumer);
        assert!(disk.access_totals().is_zero());
    }
}
