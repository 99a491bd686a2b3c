// SPDX-License-Identifier: MPL-2.0

//! The sector transform.
//!
//! Every sector is encrypted on its own with AES-256-CTR. The IV of logical
//! sector `n` is the first 16 bytes of `SHA-256(iv_key || n)`, where `n` is
//! encoded as a little-endian `u64`. It depends on both the position of the
//! sector and a per-device secret, so neither moving ciphertext to another
//! offset nor comparing devices reveals anything.

use crate::{
    lock::KeyMaterial,
    os::{sha256, Skcipher, SkcipherIv},
    prelude::*,
};

/// Encrypts and decrypts whole sectors of one device.
pub struct SectorCipher {
    key: KeyMaterial,
    sector_size: usize,
    skcipher: Skcipher,
}

impl SectorCipher {
    pub fn new(key: KeyMaterial, sector_size: usize) -> Self {
        Self {
            key,
            sector_size,
            skcipher: Skcipher::new(),
        }
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    /// Encrypts the sectors in `input`, the first of which is logical
    /// sector `first`, into `output`.
    pub fn encrypt(&self, first: u64, input: &[u8], output: &mut [u8]) -> Result<()> {
        self.check_lens(input, output)?;
        for (nth, (src, dst)) in input
            .chunks(self.sector_size)
            .zip(output.chunks_mut(self.sector_size))
            .enumerate()
        {
            let iv = self.iv(first + nth as u64);
            self.skcipher.encrypt(src, self.key.data_key(), &iv, dst)?;
        }
        Ok(())
    }

    /// Decrypts the sectors in `input`, the first of which is logical
    /// sector `first`, into `output`.
    pub fn decrypt(&self, first: u64, input: &[u8], output: &mut [u8]) -> Result<()> {
        self.check_lens(input, output)?;
        for (nth, (src, dst)) in input
            .chunks(self.sector_size)
            .zip(output.chunks_mut(self.sector_size))
            .enumerate()
        {
            let iv = self.iv(first + nth as u64);
            self.skcipher.decrypt(src, self.key.data_key(), &iv, dst)?;
        }
        Ok(())
    }

    fn iv(&self, sector: u64) -> SkcipherIv {
        let digest = sha256(&[&self.key.iv_key()[..], &sector.to_le_bytes()[..]]);
        let mut iv = SkcipherIv::default();
        iv.copy_from_slice(&digest[..SkcipherIv::SIZE]);
        iv
    }

    fn check_lens(&self, input: &[u8], output: &[u8]) -> Result<()> {
        if input.len() != output.len() || input.len() % self.sector_size != 0 {
            return_errno_with_msg!(InvalidArgs, "buffers must hold the same whole sectors");
        }
        Ok(())
    }
}

impl Debug for SectorCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SectorCipher")
            .field("sector_size", &self.sector_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SectorCipher {
        SectorCipher::new(KeyMaterial::random(), 512)
    }

    #[test]
    fn decrypt_inverts_encrypt() -> Result<()> {
        let cipher = cipher();
        let plain: Vec<u8> = (0..3 * 512).map(|i| (i % 251) as u8).collect();
        let mut sealed = vec![0; plain.len()];
        cipher.encrypt(7, &plain, &mut sealed)?;
        assert_ne!(sealed, plain);

        let mut opened = vec![0; plain.len()];
        cipher.decrypt(7, &sealed, &mut opened)?;
        assert_eq!(opened, plain);

        // Each sector only depends on its own position.
        let mut middle = vec![0; 512];
        cipher.decrypt(8, &sealed[512..1024], &mut middle)?;
        assert_eq!(middle, plain[512..1024]);
        Ok(())
    }

    #[test]
    fn ciphertext_is_bound_to_the_offset() -> Result<()> {
        let cipher = cipher();
        let plain = vec![0x11; 512];
        let mut at_one = vec![0; 512];
        let mut at_two = vec![0; 512];
        cipher.encrypt(1, &plain, &mut at_one)?;
        cipher.encrypt(2, &plain, &mut at_two)?;
        assert_ne!(at_one, at_two);

        let mut again = vec![0; 512];
        cipher.encrypt(1, &plain, &mut again)?;
        assert_eq!(again, at_one);
        Ok(())
    }

    #[test]
    fn ciphertext_is_bound_to_the_device() -> Result<()> {
        let plain = vec![0x11; 512];
        let mut first = vec![0; 512];
        let mut second = vec![0; 512];
        cipher().encrypt(1, &plain, &mut first)?;
        cipher().encrypt(1, &plain, &mut second)?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn partial_sectors_are_rejected() {
        let cipher = cipher();
        let mut out = vec![0; 100];
        let err = cipher.encrypt(0, &[0; 100], &mut out).unwrap_err();
        assert_eq!(err.errno(), InvalidArgs);
    }
}
