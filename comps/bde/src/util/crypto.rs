// SPDX-License-Identifier: MPL-2.0

use core::ops::Deref;

use crate::prelude::Result;

/// Key, nonce and tag types that can be filled with fresh randomness.
pub trait RandomInit: Default {
    fn random() -> Self;
}

/// An authenticated cipher, used to wrap the master key into a lock slot.
pub trait Aead {
    type Key: Deref<Target = [u8]> + RandomInit;
    type Iv: Deref<Target = [u8]> + RandomInit;
    type Mac: Deref<Target = [u8]> + RandomInit;

    /// Encrypts `input` into `output` under `key` and `iv`, binding `aad`.
    ///
    /// Returns the authentication tag over the ciphertext and `aad`.
    fn encrypt(
        &self,
        input: &[u8],
        key: &Self::Key,
        iv: &Self::Iv,
        aad: &[u8],
        output: &mut [u8],
    ) -> Result<Self::Mac>;

    /// Decrypts `input` into `output` after checking `mac` against the
    /// ciphertext and `aad`.
    ///
    /// Nothing meaningful is left in `output` if the check fails.
    fn decrypt(
        &self,
        input: &[u8],
        key: &Self::Key,
        iv: &Self::Iv,
        aad: &[u8],
        mac: &Self::Mac,
        output: &mut [u8],
    ) -> Result<()>;
}

/// A length-preserving cipher, used on the sectors of the data area.
pub trait Skcipher {
    type Key: Deref<Target = [u8]> + RandomInit;
    type Iv: Deref<Target = [u8]> + RandomInit;

    /// Encrypts `input` into `output`, which must be of the same length.
    fn encrypt(
        &self,
        input: &[u8],
        key: &Self::Key,
        iv: &Self::Iv,
        output: &mut [u8],
    ) -> Result<()>;

    /// Decrypts `input` into `output`, which must be of the same length.
    fn decrypt(
        &self,
        input: &[u8],
        key: &Self::Key,
        iv: &Self::Iv,
        output: &mut [u8],
    ) -> Result<()>;
}

/// A source of secure randomness.
pub trait Rng {
    /// Fills `dest` with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()>;
}
