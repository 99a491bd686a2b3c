// SPDX-License-Identifier: MPL-2.0

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// The smallest sector size a device can be formatted with.
pub const MIN_SECTOR_SIZE: usize = 512;
/// The largest sector size a device can be formatted with.
pub const MAX_SECTOR_SIZE: usize = 65536;

/// The options of formatting a backing device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct FormatOptions {
    /// The size of the sectors exposed by the encrypted device.
    ///
    /// It must be a power of two within `MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE`
    /// and a multiple of the sector size of the backing device.
    pub sector_size: usize,
    /// The number of PBKDF2 iterations protecting each key slot.
    pub kdf_iterations: u32,
}

impl FormatOptions {
    pub const DEFAULT_SECTOR_SIZE: usize = 512;
    pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

    /// Checks the options on their own, regardless of any backing device.
    pub fn validate(&self) -> Result<()> {
        if !self.sector_size.is_power_of_two()
            || !(MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&self.sector_size)
        {
            return_errno_with_msg!(
                InvalidArgs,
                "sector size must be a power of two between 512 and 65536"
            );
        }
        if self.kdf_iterations == 0 {
            return_errno_with_msg!(InvalidArgs, "kdf iterations must be positive");
        }
        Ok(())
    }
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            sector_size: Self::DEFAULT_SECTOR_SIZE,
            kdf_iterations: Self::DEFAULT_KDF_ITERATIONS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_are_valid() {
        FormatOptions::default().validate().unwrap();
    }

    #[test]
    fn bad_sector_sizes_are_rejected() {
        for sector_size in [0, 256, 1000, 131072] {
            let options = FormatOptions {
                sector_size,
                ..Default::default()
            };
            assert_eq!(options.validate().unwrap_err().errno(), InvalidArgs);
        }
    }

    #[test]
    fn zero_iterations_are_rejected() {
        let options = FormatOptions {
            kdf_iterations: 0,
            ..Default::default()
        };
        assert_eq!(options.validate().unwrap_err().errno(), InvalidArgs);
    }
}
