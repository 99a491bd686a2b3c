// SPDX-License-Identifier: MPL-2.0

//! The key/lock manager.
//!
//! The master key of a device is generated once at format time and never
//! leaves memory in plain form. Each lock slot wraps the master key under a
//! key-encryption key derived from one passphrase, so that up to
//! `MAX_KEY_SLOTS` passphrases can open the same device. The wrapping is
//! bound to the device id and to the slot index.
//!
//! None of the operations writes anything before the passphrase has been
//! authenticated.

use aster_block::{BlockDevice, SECTOR_SIZE};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    config::FormatOptions,
    header::{
        LockSlot, SlotState, Superblock, DEVICE_ID_SIZE, MAX_KEY_SLOTS, RESERVED_SECTORS, VERSION,
        WRAPPED_KEY_SIZE,
    },
    os::{derive_key, Aead, AeadIv, Rng, SkcipherKey},
    prelude::*,
    util::align_down,
};

/// The key material of an unlocked device.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// The key of the sector cipher.
    data_key: SkcipherKey,
    /// The secret mixed into the per-sector IVs.
    iv_key: [u8; 32],
}

impl KeyMaterial {
    /// Generates fresh key material.
    pub fn random() -> Self {
        Self {
            data_key: SkcipherKey::random(),
            iv_key: {
                let mut iv_key = [0; 32];
                // The thread-local generator never fails.
                let _ = Rng::new().fill_bytes(&mut iv_key);
                iv_key
            },
        }
    }

    pub fn data_key(&self) -> &SkcipherKey {
        &self.data_key
    }

    pub fn iv_key(&self) -> &[u8; 32] {
        &self.iv_key
    }

    fn to_bytes(&self) -> Zeroizing<[u8; WRAPPED_KEY_SIZE]> {
        let mut bytes = Zeroizing::new([0; WRAPPED_KEY_SIZE]);
        bytes[..32].copy_from_slice(&self.data_key);
        bytes[32..].copy_from_slice(&self.iv_key);
        bytes
    }

    fn from_bytes(bytes: &[u8; WRAPPED_KEY_SIZE]) -> Self {
        let mut data_key = SkcipherKey::default();
        data_key.copy_from_slice(&bytes[..32]);
        let mut iv_key = [0; 32];
        iv_key.copy_from_slice(&bytes[32..]);
        Self { data_key, iv_key }
    }
}

impl Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// The geometry of an encrypted device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// The size of the sectors exposed by the device.
    pub sector_size: usize,
    /// The byte offset on the backing device where the data area starts.
    pub data_offset: usize,
    /// The size in bytes exposed by the device.
    pub media_size: usize,
}

impl Geometry {
    /// Returns the number of sectors exposed by the device.
    pub fn nr_sectors(&self) -> usize {
        self.media_size / self.sector_size
    }
}

/// The result of a successful [`unlock`].
#[derive(Debug)]
pub struct Unlocked {
    pub key: KeyMaterial,
    pub geometry: Geometry,
    /// The index of the lock slot opened by the passphrase.
    pub slot: usize,
}

/// The non-secret description of a header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderInfo {
    pub version: u32,
    pub geometry: Geometry,
    pub device_id: [u8; DEVICE_ID_SIZE],
    pub slots: Vec<SlotInfo>,
}

/// The state of one lock slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotInfo {
    Empty,
    Active { kdf_iterations: u32 },
    Corrupt,
}

/// Formats `backing`, protecting a freshly generated master key with
/// `passphrase` in lock slot 0.
///
/// Any previous content of the backing device becomes unreadable.
pub fn format(
    backing: &dyn BlockDevice,
    passphrase: &[u8],
    options: &FormatOptions,
) -> Result<Geometry> {
    options.validate()?;
    let meta = backing.metadata();
    let sector_size = options.sector_size;
    if sector_size % meta.sector_size != 0 {
        return_errno_with_msg!(
            InvalidArgs,
            "sector size must be a multiple of the backing sector size"
        );
    }
    let data_offset = RESERVED_SECTORS * sector_size;
    if meta.nbytes() < data_offset + sector_size {
        return_errno!(DeviceTooSmall);
    }
    let media_size = align_down(meta.nbytes() - data_offset, sector_size);

    let mut device_id = [0; DEVICE_ID_SIZE];
    Rng::new().fill_bytes(&mut device_id)?;
    let superblock = Superblock {
        sector_size: sector_size as u32,
        reserved_sectors: RESERVED_SECTORS as u32,
        nr_slots: MAX_KEY_SLOTS as u32,
        media_size: media_size as u64,
        device_id,
    };
    let key = KeyMaterial::random();
    let slot = wrap_key(&key, passphrase, &device_id, 0, options.kdf_iterations)?;

    let mut header = vec![0; data_offset];
    superblock.encode(&mut header[..sector_size]);
    slot.encode(&mut header[sector_size..2 * sector_size]);
    backing.write_bytes(0, &header)?;
    flush(backing)?;

    info!(
        "[Bde] formatted {}: sector size {}, media size {}",
        backing.name(),
        sector_size,
        media_size
    );
    Ok(Geometry {
        sector_size,
        data_offset,
        media_size,
    })
}

/// Opens the master key of `backing` with `passphrase`.
///
/// Nothing is written to the device and no state is kept on failure.
pub fn unlock(backing: &dyn BlockDevice, passphrase: &[u8]) -> Result<Unlocked> {
    let header = Header::load(backing)?;
    header.unlock(passphrase)
}

/// Protects the master key with `new_passphrase` as well.
///
/// The new lock goes into `slot`, replacing whatever it holds, or into the
/// first empty slot. Returns the index of the slot written.
pub fn set_key(
    backing: &dyn BlockDevice,
    passphrase: &[u8],
    new_passphrase: &[u8],
    slot: Option<usize>,
    kdf_iterations: u32,
) -> Result<usize> {
    if kdf_iterations == 0 {
        return_errno_with_msg!(InvalidArgs, "kdf iterations must be positive");
    }
    check_slot_index(slot)?;
    let header = Header::load(backing)?;
    let unlocked = header.unlock(passphrase)?;

    let idx = match slot {
        Some(idx) => idx,
        None => header
            .slots
            .iter()
            .position(|state| matches!(state, SlotState::Empty))
            .ok_or(Error::new(NoFreeSlot))?,
    };
    let lock_slot = wrap_key(
        &unlocked.key,
        new_passphrase,
        &header.superblock.device_id,
        idx,
        kdf_iterations,
    )?;
    header.write_slot(backing, idx, Some(&lock_slot))?;

    info!("[Bde] {}: key slot {} set", backing.name(), idx);
    Ok(idx)
}

/// Erases `slot`, or the slot opened by `passphrase`.
///
/// Returns the index of the slot erased.
pub fn nuke(backing: &dyn BlockDevice, passphrase: &[u8], slot: Option<usize>) -> Result<usize> {
    check_slot_index(slot)?;
    let header = Header::load(backing)?;
    let unlocked = header.unlock(passphrase)?;

    let idx = slot.unwrap_or(unlocked.slot);
    header.write_slot(backing, idx, None)?;

    warn!("[Bde] {}: key slot {} nuked", backing.name(), idx);
    Ok(idx)
}

/// Erases every lock slot, after which no passphrase opens the device.
pub fn destroy(backing: &dyn BlockDevice, passphrase: &[u8]) -> Result<()> {
    let header = Header::load(backing)?;
    header.unlock(passphrase)?;

    let sector_size = header.geometry.sector_size;
    let zeros = vec![0; MAX_KEY_SLOTS * sector_size];
    backing.write_bytes(header.superblock.slot_offset(0), &zeros)?;
    flush(backing)?;

    warn!("[Bde] {}: all key slots destroyed", backing.name());
    Ok(())
}

/// Describes the header of `backing` without opening it.
pub fn inspect(backing: &dyn BlockDevice) -> Result<HeaderInfo> {
    let header = Header::load(backing)?;
    let slots = header
        .slots
        .iter()
        .map(|state| match state {
            SlotState::Empty => SlotInfo::Empty,
            SlotState::Active(slot) => SlotInfo::Active {
                kdf_iterations: slot.kdf_iterations,
            },
            SlotState::Corrupt => SlotInfo::Corrupt,
        })
        .collect();

    Ok(HeaderInfo {
        version: VERSION,
        geometry: header.geometry,
        device_id: header.superblock.device_id,
        slots,
    })
}

/// The header as read from a backing device.
struct Header {
    superblock: Superblock,
    geometry: Geometry,
    slots: Vec<SlotState>,
}

impl Header {
    fn load(backing: &dyn BlockDevice) -> Result<Self> {
        let meta = backing.metadata();
        let first_sector_len = meta.sector_size.max(SECTOR_SIZE);
        if meta.nbytes() < first_sector_len {
            return_errno!(DeviceTooSmall);
        }
        let mut buf = vec![0; first_sector_len];
        backing.read_bytes(0, &mut buf)?;
        let superblock = Superblock::decode(&buf)?;

        let data_offset = superblock.data_offset();
        let Some(media_size) = usize::try_from(superblock.media_size)
            .ok()
            .filter(|media_size| media_size.checked_add(data_offset).is_some())
        else {
            return_errno_with_msg!(CorruptHeader, "media size exceeds the address space");
        };
        let geometry = Geometry {
            sector_size: superblock.sector_size as usize,
            data_offset,
            media_size,
        };
        if geometry.sector_size % meta.sector_size != 0 {
            return_errno_with_msg!(
                CorruptHeader,
                "sector size does not fit the backing device"
            );
        }
        if geometry.data_offset + geometry.media_size > meta.nbytes() {
            return_errno!(DeviceTooSmall);
        }

        let mut buf = vec![0; MAX_KEY_SLOTS * geometry.sector_size];
        backing.read_bytes(superblock.slot_offset(0), &mut buf)?;
        let slots = buf
            .chunks(geometry.sector_size)
            .map(LockSlot::decode)
            .collect();

        Ok(Self {
            superblock,
            geometry,
            slots,
        })
    }

    fn unlock(&self, passphrase: &[u8]) -> Result<Unlocked> {
        let mut has_active = false;
        let mut has_corrupt = false;
        for (idx, state) in self.slots.iter().enumerate() {
            match state {
                SlotState::Empty => (),
                SlotState::Corrupt => {
                    warn!("[Bde] key slot {} is damaged", idx);
                    has_corrupt = true;
                }
                SlotState::Active(slot) => {
                    has_active = true;
                    if let Ok(key) =
                        unwrap_key(slot, passphrase, &self.superblock.device_id, idx)
                    {
                        debug!("[Bde] key slot {} opened", idx);
                        return Ok(Unlocked {
                            key,
                            geometry: self.geometry,
                            slot: idx,
                        });
                    }
                }
            }
        }

        if has_corrupt {
            return_errno_with_msg!(
                CorruptHeader,
                "no intact key slot matches, and some key slot is damaged"
            );
        }
        if !has_active {
            return_errno_with_msg!(WrongPassphrase, "no key slot is active");
        }
        return_errno!(WrongPassphrase)
    }

    fn write_slot(
        &self,
        backing: &dyn BlockDevice,
        idx: usize,
        slot: Option<&LockSlot>,
    ) -> Result<()> {
        let mut buf = vec![0; self.geometry.sector_size];
        if let Some(slot) = slot {
            slot.encode(&mut buf);
        }
        backing.write_bytes(self.superblock.slot_offset(idx), &buf)?;
        flush(backing)
    }
}

fn check_slot_index(slot: Option<usize>) -> Result<()> {
    match slot {
        Some(idx) if idx >= MAX_KEY_SLOTS => {
            return_errno_with_msg!(InvalidArgs, "key slot index out of range")
        }
        _ => Ok(()),
    }
}

fn slot_aad(device_id: &[u8; DEVICE_ID_SIZE], idx: usize) -> [u8; DEVICE_ID_SIZE + 4] {
    let mut aad = [0; DEVICE_ID_SIZE + 4];
    aad[..DEVICE_ID_SIZE].copy_from_slice(device_id);
    aad[DEVICE_ID_SIZE..].copy_from_slice(&(idx as u32).to_le_bytes());
    aad
}

fn wrap_key(
    key: &KeyMaterial,
    passphrase: &[u8],
    device_id: &[u8; DEVICE_ID_SIZE],
    idx: usize,
    kdf_iterations: u32,
) -> Result<LockSlot> {
    let mut salt = [0; LockSlot::SALT_SIZE];
    Rng::new().fill_bytes(&mut salt)?;
    let nonce = AeadIv::random();
    let kek = derive_key(passphrase, &salt, kdf_iterations);

    let mut wrapped_key = [0; WRAPPED_KEY_SIZE];
    let tag = Aead::new().encrypt(
        &key.to_bytes()[..],
        &kek,
        &nonce,
        &slot_aad(device_id, idx),
        &mut wrapped_key,
    )?;

    Ok(LockSlot {
        kdf_iterations,
        salt,
        nonce,
        wrapped_key,
        tag,
    })
}

fn unwrap_key(
    slot: &LockSlot,
    passphrase: &[u8],
    device_id: &[u8; DEVICE_ID_SIZE],
    idx: usize,
) -> Result<KeyMaterial> {
    let kek = derive_key(passphrase, &slot.salt, slot.kdf_iterations);
    let mut plain = Zeroizing::new([0; WRAPPED_KEY_SIZE]);
    Aead::new()
        .decrypt(
            &slot.wrapped_key,
            &kek,
            &slot.nonce,
            &slot_aad(device_id, idx),
            &slot.tag,
            &mut plain[..],
        )
        .map_err(|_| Error::new(WrongPassphrase))?;
    Ok(KeyMaterial::from_bytes(&plain))
}

fn flush(backing: &dyn BlockDevice) -> Result<()> {
    backing.sync()?.into_result()?;
    Ok(())
}
