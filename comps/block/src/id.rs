// SPDX-License-Identifier: MPL-2.0

//! Sector and block ids.

use core::{
    fmt,
    ops::{Add, Range, Sub},
};

use crate::{BLOCK_SIZE, SECTOR_SIZE};

/// The id of a sector, i.e., a [`SECTOR_SIZE`] unit on a device.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sid(u64);

/// The id of a block, i.e., a [`BLOCK_SIZE`] unit on a device.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bid(u64);

macro_rules! impl_id {
    ($id:ident, $unit:expr) => {
        impl $id {
            /// Constructs an id from a raw id.
            pub const fn new(raw_id: u64) -> Self {
                Self(raw_id)
            }

            /// Constructs an id from a byte offset, rounding down.
            pub const fn from_offset(offset: usize) -> Self {
                Self((offset / $unit) as u64)
            }

            /// Returns the byte offset of the first byte of this unit.
            ///
            /// Offsets past `usize::MAX` saturate, so they compare as beyond
            /// the end of any device.
            pub const fn to_offset(self) -> usize {
                if self.0 > usize::MAX as u64 {
                    return usize::MAX;
                }
                (self.0 as usize).saturating_mul($unit)
            }

            /// Returns the raw id.
            pub const fn to_raw(self) -> u64 {
                self.0
            }
        }

        impl Add<u64> for $id {
            type Output = Self;

            fn add(self, other: u64) -> Self::Output {
                Self(self.0.saturating_add(other))
            }
        }

        impl Sub<$id> for $id {
            type Output = u64;

            fn sub(self, other: $id) -> Self::Output {
                self.0 - other.0
            }
        }

        impl fmt::Debug for $id {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($id), self.0)
            }
        }
    };
}

impl_id!(Sid, SECTOR_SIZE);
impl_id!(Bid, BLOCK_SIZE);

impl From<Bid> for Sid {
    fn from(bid: Bid) -> Self {
        Self(bid.to_raw().saturating_mul((BLOCK_SIZE / SECTOR_SIZE) as u64))
    }
}

/// Returns the byte range covered by a range of sectors.
pub fn sid_range_to_bytes(range: &Range<Sid>) -> Range<usize> {
    range.start.to_offset()..range.end.to_offset()
}
