// SPDX-License-Identifier: MPL-2.0

//! The on-disk header.
//!
//! The first `RESERVED_SECTORS` sectors of the backing device are reserved
//! for the header. Sector 0 holds the superblock, which describes the
//! geometry. Sectors `1..=MAX_KEY_SLOTS` hold the lock slots, each of which
//! wraps the master key under one passphrase. An all-zero lock slot is
//! empty. The data area starts right after the reserved sectors.
//!
//! All integers are little-endian. Every structure ends with the SHA-256
//! digest of its preceding bytes, so that damage can be told apart from a
//! wrong passphrase.

use crate::{
    os::{sha256, AeadIv, AeadMac},
    prelude::*,
};

/// The magic of the superblock.
pub const SUPERBLOCK_MAGIC: [u8; 8] = *b"ASTERBDE";
/// The format version written by this crate.
pub const VERSION: u32 = 1;
/// The number of lock slots.
pub const MAX_KEY_SLOTS: usize = 4;
/// The number of sectors reserved for the header.
pub const RESERVED_SECTORS: usize = 1 + MAX_KEY_SLOTS;
/// The size of the wrapped master key.
pub const WRAPPED_KEY_SIZE: usize = 64;
/// The size of the public device identifier.
pub const DEVICE_ID_SIZE: usize = 16;

const SLOT_MAGIC: [u8; 8] = *b"BDELOCK1";
const CHECKSUM_SIZE: usize = 32;
const SALT_SIZE: usize = 32;

/// The superblock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Superblock {
    /// The size of the sectors of the encrypted device.
    pub sector_size: u32,
    /// The number of sectors reserved for the header.
    pub reserved_sectors: u32,
    /// The number of lock slots.
    pub nr_slots: u32,
    /// The size in bytes of the data area.
    pub media_size: u64,
    /// A random, public identifier bound into every lock slot.
    pub device_id: [u8; DEVICE_ID_SIZE],
}

impl Superblock {
    /// The number of bytes occupied by an encoded superblock.
    pub const ENCODED_SIZE: usize = 8 + 4 * 4 + 8 + DEVICE_ID_SIZE + CHECKSUM_SIZE;

    /// Encodes the superblock into the start of `buf`, zeroing the rest.
    pub fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        let mut writer = Writer::new(buf);
        writer.put(&SUPERBLOCK_MAGIC);
        writer.put(&VERSION.to_le_bytes());
        writer.put(&self.sector_size.to_le_bytes());
        writer.put(&self.reserved_sectors.to_le_bytes());
        writer.put(&self.nr_slots.to_le_bytes());
        writer.put(&self.media_size.to_le_bytes());
        writer.put(&self.device_id);
        writer.put_checksum();
    }

    /// Decodes and validates a superblock from the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::ENCODED_SIZE {
            return_errno_with_msg!(CorruptHeader, "superblock is truncated");
        }
        let mut reader = Reader::new(buf);
        if reader.take::<8>() != SUPERBLOCK_MAGIC {
            return_errno_with_msg!(CorruptHeader, "bad superblock magic");
        }
        let version = u32::from_le_bytes(reader.take());
        let sector_size = u32::from_le_bytes(reader.take());
        let reserved_sectors = u32::from_le_bytes(reader.take());
        let nr_slots = u32::from_le_bytes(reader.take());
        let media_size = u64::from_le_bytes(reader.take());
        let device_id = reader.take();
        if !reader.checksum_matches() {
            return_errno_with_msg!(CorruptHeader, "bad superblock checksum");
        }
        if version != VERSION {
            return_errno!(UnsupportedVersion);
        }

        let superblock = Self {
            sector_size,
            reserved_sectors,
            nr_slots,
            media_size,
            device_id,
        };
        superblock.check_geometry()?;
        Ok(superblock)
    }

    fn check_geometry(&self) -> Result<()> {
        let sector_size = self.sector_size as u64;
        if !self.sector_size.is_power_of_two()
            || !(512..=65536).contains(&self.sector_size)
            || self.reserved_sectors as usize != RESERVED_SECTORS
            || self.nr_slots as usize != MAX_KEY_SLOTS
            || self.media_size == 0
            || self.media_size % sector_size != 0
        {
            return_errno_with_msg!(CorruptHeader, "inconsistent geometry in superblock");
        }
        Ok(())
    }

    /// Returns the byte offset of the data area on the backing device.
    pub fn data_offset(&self) -> usize {
        self.reserved_sectors as usize * self.sector_size as usize
    }

    /// Returns the byte offset of the `idx`-th lock slot on the backing device.
    pub fn slot_offset(&self, idx: usize) -> usize {
        (1 + idx) * self.sector_size as usize
    }
}

/// One occupied lock slot.
#[derive(Clone, Debug)]
pub struct LockSlot {
    /// The number of PBKDF2 iterations.
    pub kdf_iterations: u32,
    /// The PBKDF2 salt.
    pub salt: [u8; SALT_SIZE],
    /// The nonce the master key was wrapped with.
    pub nonce: AeadIv,
    /// The wrapped master key.
    pub wrapped_key: [u8; WRAPPED_KEY_SIZE],
    /// The authentication tag of the wrapped master key.
    pub tag: AeadMac,
}

/// The state of a lock slot as found on disk.
#[derive(Clone, Debug)]
pub enum SlotState {
    /// The slot is all zeros.
    Empty,
    /// The slot holds a wrapped master key.
    Active(LockSlot),
    /// The slot is neither empty nor intact.
    Corrupt,
}

impl LockSlot {
    /// The number of bytes occupied by an encoded lock slot.
    pub const ENCODED_SIZE: usize =
        8 + 4 + SALT_SIZE + AeadIv::SIZE + WRAPPED_KEY_SIZE + AeadMac::SIZE + CHECKSUM_SIZE;

    /// The salt size in bytes.
    pub const SALT_SIZE: usize = SALT_SIZE;

    /// Encodes the slot into the start of `buf`, zeroing the rest.
    pub fn encode(&self, buf: &mut [u8]) {
        buf.fill(0);
        let mut writer = Writer::new(buf);
        writer.put(&SLOT_MAGIC);
        writer.put(&self.kdf_iterations.to_le_bytes());
        writer.put(&self.salt);
        writer.put(&self.nonce);
        writer.put(&self.wrapped_key);
        writer.put(&self.tag);
        writer.put_checksum();
    }

    /// Decodes a lock slot sector.
    pub fn decode(buf: &[u8]) -> SlotState {
        if buf.iter().all(|byte| *byte == 0) {
            return SlotState::Empty;
        }
        if buf.len() < Self::ENCODED_SIZE {
            return SlotState::Corrupt;
        }

        let mut reader = Reader::new(buf);
        if reader.take::<8>() != SLOT_MAGIC {
            return SlotState::Corrupt;
        }
        let kdf_iterations = u32::from_le_bytes(reader.take());
        let salt = reader.take();
        let nonce = AeadIv::from_bytes(reader.take());
        let wrapped_key = reader.take();
        let tag = AeadMac::from_bytes(reader.take());
        if !reader.checksum_matches() || kdf_iterations == 0 {
            return SlotState::Corrupt;
        }

        SlotState::Active(LockSlot {
            kdf_iterations,
            salt,
            nonce,
            wrapped_key,
            tag,
        })
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Writer<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn put_checksum(&mut self) {
        let checksum = sha256(&[&self.buf[..self.pos]]);
        self.put(&checksum);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut bytes = [0; N];
        bytes.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        bytes
    }

    fn checksum_matches(&mut self) -> bool {
        let expected = sha256(&[&self.buf[..self.pos]]);
        self.take::<CHECKSUM_SIZE>() == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::RandomInit;

    fn superblock() -> Superblock {
        Superblock {
            sector_size: 512,
            reserved_sectors: RESERVED_SECTORS as u32,
            nr_slots: MAX_KEY_SLOTS as u32,
            media_size: 512 * 100,
            device_id: [3; DEVICE_ID_SIZE],
        }
    }

    #[test]
    fn superblock_decodes_what_it_encodes() -> Result<()> {
        let mut buf = vec![0xff; 512];
        superblock().encode(&mut buf);
        assert_eq!(Superblock::decode(&buf)?, superblock());
        assert!(buf[Superblock::ENCODED_SIZE..].iter().all(|b| *b == 0));
        Ok(())
    }

    #[test]
    fn damaged_superblock_is_corrupt() {
        let mut buf = vec![0; 512];
        superblock().encode(&mut buf);
        buf[20] ^= 0x80;
        assert_eq!(Superblock::decode(&buf).unwrap_err().errno(), CorruptHeader);

        let mut buf = vec![0; 512];
        assert_eq!(Superblock::decode(&buf).unwrap_err().errno(), CorruptHeader);
        superblock().encode(&mut buf);
        buf[0] = b'X';
        assert_eq!(Superblock::decode(&buf).unwrap_err().errno(), CorruptHeader);
    }

    #[test]
    fn unknown_version_is_reported_distinctly() {
        let mut buf = vec![0; 512];
        superblock().encode(&mut buf);
        buf[8..12].copy_from_slice(&2u32.to_le_bytes());
        let checksum = sha256(&[&buf[..Superblock::ENCODED_SIZE - 32]]);
        buf[Superblock::ENCODED_SIZE - 32..Superblock::ENCODED_SIZE].copy_from_slice(&checksum);
        assert_eq!(
            Superblock::decode(&buf).unwrap_err().errno(),
            UnsupportedVersion
        );
    }

    #[test]
    fn inconsistent_geometry_is_corrupt() {
        let mut bad = superblock();
        bad.media_size = 700;
        let mut buf = vec![0; 512];
        bad.encode(&mut buf);
        assert_eq!(Superblock::decode(&buf).unwrap_err().errno(), CorruptHeader);
    }

    #[test]
    fn slot_states() {
        assert!(matches!(LockSlot::decode(&[0; 512]), SlotState::Empty));

        let slot = LockSlot {
            kdf_iterations: 1000,
            salt: [1; 32],
            nonce: AeadIv::random(),
            wrapped_key: [2; WRAPPED_KEY_SIZE],
            tag: AeadMac::random(),
        };
        let mut buf = vec![0; 512];
        slot.encode(&mut buf);
        let SlotState::Active(decoded) = LockSlot::decode(&buf) else {
            panic!("slot should be active");
        };
        assert_eq!(decoded.kdf_iterations, 1000);
        assert_eq!(decoded.nonce, slot.nonce);

        buf[50] ^= 1;
        assert!(matches!(LockSlot::decode(&buf), SlotState::Corrupt));
    }
}
