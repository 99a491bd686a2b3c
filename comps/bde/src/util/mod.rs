// SPDX-License-Identifier: MPL-2.0

//! Utilities.

mod crypto;

pub use self::crypto::{Aead, RandomInit, Rng, Skcipher};

/// Aligns `x` down to a multiple of `align`.
pub(crate) const fn align_down(x: usize, align: usize) -> usize {
    (x / align) * align
}

#[cfg(test)]
mod tests {
    use super::align_down;

    #[test]
    fn align_down_rounds_to_multiple() {
        assert_eq!(align_down(4095, 512), 3584);
        assert_eq!(align_down(4096, 4096), 4096);
        assert_eq!(align_down(511, 512), 0);
    }
}
