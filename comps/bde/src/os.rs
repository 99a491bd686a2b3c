// SPDX-License-Identifier: MPL-2.0

//! OS-specific or OS-dependent APIs.

use core::ops::{Deref, DerefMut};
use std::thread::{self, JoinHandle};

use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace, NewAead},
    aes::Aes256,
    Aes256Gcm,
};
use ctr::cipher::{NewCipher, StreamCipher};
pub use os_sync::{Mutex, WaitQueue};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    prelude::*,
    util::{Aead as AeadT, RandomInit, Rng as RngT, Skcipher as SkcipherT},
};

/// Spawns a named thread.
pub fn spawn<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(|_| Error::with_msg(OutOfMemory, "failed to spawn a thread"))
}

/// Returns whether the calling thread is the one behind `handle`.
pub fn is_current_thread(handle: &JoinHandle<()>) -> bool {
    handle.thread().id() == thread::current().id()
}

macro_rules! new_byte_type {
    ($(#[$attr:meta])* $name:ident, $size:expr, secret) => {
        new_byte_type!(@def $(#[$attr])* $name, $size);

        impl Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "(..)"))
            }
        }
    };
    ($(#[$attr:meta])* $name:ident, $size:expr) => {
        new_byte_type!(@def $(#[$attr])* $name, $size);

        impl Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:02x?})"), &self.0)
            }
        }
    };
    (@def $(#[$attr:meta])* $name:ident, $size:expr) => {
        $(#[$attr])*
        #[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
        pub struct $name([u8; $size]);

        impl $name {
            pub const SIZE: usize = $size;

            pub fn from_bytes(bytes: [u8; $size]) -> Self {
                Self(bytes)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self([0; $size])
            }
        }

        impl Deref for $name {
            type Target = [u8];

            fn deref(&self) -> &[u8] {
                &self.0
            }
        }

        impl DerefMut for $name {
            fn deref_mut(&mut self) -> &mut [u8] {
                &mut self.0
            }
        }

        impl RandomInit for $name {
            fn random() -> Self {
                let mut bytes = Self::default();
                rand::rng().fill_bytes(&mut bytes);
                bytes
            }
        }
    };
}

new_byte_type!(
    /// A key for [`Aead`].
    AeadKey, 32, secret
);
new_byte_type!(
    /// A nonce for [`Aead`].
    AeadIv, 12
);
new_byte_type!(
    /// An authentication tag produced by [`Aead`].
    AeadMac, 16
);
new_byte_type!(
    /// A key for [`Skcipher`].
    SkcipherKey, 32, secret
);
new_byte_type!(
    /// An initial counter block for [`Skcipher`].
    SkcipherIv, 16
);

/// AES-256-GCM.
#[derive(Debug, Default)]
pub struct Aead;

impl Aead {
    pub const fn new() -> Self {
        Self
    }
}

impl AeadT for Aead {
    type Key = AeadKey;
    type Iv = AeadIv;
    type Mac = AeadMac;

    fn encrypt(
        &self,
        input: &[u8],
        key: &AeadKey,
        iv: &AeadIv,
        aad: &[u8],
        output: &mut [u8],
    ) -> Result<AeadMac> {
        if input.len() != output.len() {
            return_errno_with_msg!(InvalidArgs, "aead input and output differ in length");
        }
        output.copy_from_slice(input);

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key[..]));
        let tag = cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv[..]), aad, output)
            .map_err(|_| Error::with_msg(EncryptFailed, "aes-256-gcm encryption failed"))?;

        let mut mac = AeadMac::default();
        mac.copy_from_slice(&tag);
        Ok(mac)
    }

    fn decrypt(
        &self,
        input: &[u8],
        key: &AeadKey,
        iv: &AeadIv,
        aad: &[u8],
        mac: &AeadMac,
        output: &mut [u8],
    ) -> Result<()> {
        if input.len() != output.len() {
            return_errno_with_msg!(InvalidArgs, "aead input and output differ in length");
        }
        output.copy_from_slice(input);

        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key[..]));
        cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv[..]),
                aad,
                output,
                GenericArray::from_slice(&mac[..]),
            )
            .map_err(|_| {
                output.zeroize();
                Error::with_msg(DecryptFailed, "aes-256-gcm authentication failed")
            })
    }
}

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// AES-256-CTR.
#[derive(Debug, Default)]
pub struct Skcipher;

impl Skcipher {
    pub const fn new() -> Self {
        Self
    }

    fn apply(input: &[u8], key: &SkcipherKey, iv: &SkcipherIv, output: &mut [u8]) -> Result<()> {
        if input.len() != output.len() {
            return_errno_with_msg!(InvalidArgs, "skcipher input and output differ in length");
        }
        output.copy_from_slice(input);

        let mut cipher = Aes256Ctr::new_from_slices(key, iv)
            .map_err(|_| Error::with_msg(InvalidArgs, "bad aes-256-ctr key or iv length"))?;
        cipher.apply_keystream(output);
        Ok(())
    }
}

impl SkcipherT for Skcipher {
    type Key = SkcipherKey;
    type Iv = SkcipherIv;

    fn encrypt(
        &self,
        input: &[u8],
        key: &SkcipherKey,
        iv: &SkcipherIv,
        output: &mut [u8],
    ) -> Result<()> {
        Self::apply(input, key, iv, output)
            .map_err(|e| Error::with_msg(EncryptFailed, e.msg().unwrap_or("aes-256-ctr failed")))
    }

    fn decrypt(
        &self,
        input: &[u8],
        key: &SkcipherKey,
        iv: &SkcipherIv,
        output: &mut [u8],
    ) -> Result<()> {
        Self::apply(input, key, iv, output)
            .map_err(|e| Error::with_msg(DecryptFailed, e.msg().unwrap_or("aes-256-ctr failed")))
    }
}

/// A random number generator backed by the thread-local CSPRNG.
#[derive(Debug, Default)]
pub struct Rng;

impl Rng {
    pub const fn new() -> Self {
        Self
    }
}

impl RngT for Rng {
    fn fill_bytes(&self, dest: &mut [u8]) -> Result<()> {
        rand::rng().fill_bytes(dest);
        Ok(())
    }
}

/// Derives a key-encryption key from `passphrase` with PBKDF2-HMAC-SHA256.
pub fn derive_key(passphrase: &[u8], salt: &[u8], iterations: u32) -> AeadKey {
    let mut key = AeadKey::default();
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase, salt, iterations, &mut key);
    key
}

/// Computes the SHA-256 digest over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aead_rejects_tampered_ciphertext() -> Result<()> {
        let aead = Aead::new();
        let key = AeadKey::random();
        let iv = AeadIv::random();
        let plain = [7u8; 64];
        let mut cipher = [0u8; 64];
        let mac = aead.encrypt(&plain, &key, &iv, b"slot", &mut cipher)?;

        let mut out = [0u8; 64];
        aead.decrypt(&cipher, &key, &iv, b"slot", &mac, &mut out)?;
        assert_eq!(out, plain);

        cipher[3] ^= 1;
        let err = aead
            .decrypt(&cipher, &key, &iv, b"slot", &mac, &mut out)
            .unwrap_err();
        assert_eq!(err.errno(), DecryptFailed);
        assert_eq!(out, [0u8; 64]);

        cipher[3] ^= 1;
        let err = aead
            .decrypt(&cipher, &key, &iv, b"other", &mac, &mut out)
            .unwrap_err();
        assert_eq!(err.errno(), DecryptFailed);
        Ok(())
    }

    #[test]
    fn skcipher_preserves_length() -> Result<()> {
        let skcipher = Skcipher::new();
        let key = SkcipherKey::random();
        let iv = SkcipherIv::random();
        let plain = vec![0x42u8; 512];
        let mut cipher = vec![0u8; 512];
        skcipher.encrypt(&plain, &key, &iv, &mut cipher)?;
        assert_ne!(cipher, plain);

        let mut out = vec![0u8; 512];
        skcipher.decrypt(&cipher, &key, &iv, &mut out)?;
        assert_eq!(out, plain);
        Ok(())
    }

    #[test]
    fn key_derivation_depends_on_salt() {
        let a = derive_key(b"secret", b"salt-a", 10);
        let b = derive_key(b"secret", b"salt-b", 10);
        assert_eq!(a, derive_key(b"secret", b"salt-a", 10));
        assert_ne!(a, b);
    }

    #[test]
    fn secret_debug_is_redacted() {
        let key = AeadKey::from_bytes([0xab; 32]);
        assert_eq!(format!("{:?}", key), "AeadKey(..)");
        assert!(format!("{:?}", AeadMac::from_bytes([0xab; 16])).contains("ab"));
    }
}
