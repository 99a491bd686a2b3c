// SPDX-License-Identifier: MPL-2.0

//! The configuration file of `bdectl`.
//!
//! ```toml
//! [format]
//! sector-size = 4096
//! kdf-iterations = 200000
//!
//! [log]
//! level = "info"
//! ```

use std::{fs, path::Path, process, str::FromStr};

use aster_bde::FormatOptions;
use log::LevelFilter;
use serde::Deserialize;

use crate::{error::Errno, error_msg};

/// The file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "bdectl.toml";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BdectlConfig {
    pub format: FormatOptions,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl BdectlConfig {
    /// Loads the configuration from `path`, or from [`DEFAULT_CONFIG_FILE`]
    /// if it exists.
    ///
    /// Exits the process if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    return Self::default();
                }
                default
            }
        };

        let Ok(contents) = fs::read_to_string(path) else {
            error_msg!("Cannot read file {}", path.to_string_lossy());
            process::exit(Errno::ReadConfig as _);
        };
        Self::parse(&contents).unwrap_or_else(|msg| {
            error_msg!("Cannot parse TOML file {}: {}", path.to_string_lossy(), msg);
            process::exit(Errno::ParseConfig as _);
        })
    }

    fn parse(contents: &str) -> Result<Self, String> {
        let config: Self = toml::from_str(contents).map_err(|err| err.message().to_string())?;
        config.log_level()?;
        Ok(config)
    }

    pub fn log_level(&self) -> Result<LevelFilter, String> {
        LevelFilter::from_str(&self.log.level)
            .map_err(|_| format!("`{}` is not a valid log level", self.log.level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tables_take_defaults() {
        let config = BdectlConfig::parse("[log]\nlevel = \"debug\"\n").unwrap();
        assert_eq!(config.format, FormatOptions::default());
        assert_eq!(config.log_level(), Ok(LevelFilter::Debug));
    }

    #[test]
    fn format_table_uses_kebab_case() {
        let config =
            BdectlConfig::parse("[format]\nsector-size = 4096\nkdf-iterations = 7\n").unwrap();
        assert_eq!(config.format.sector_size, 4096);
        assert_eq!(config.format.kdf_iterations, 7);
    }

    #[test]
    fn unknown_keys_and_levels_are_rejected() {
        assert!(BdectlConfig::parse("[format]\nblock-size = 4096\n").is_err());
        assert!(BdectlConfig::parse("[log]\nlevel = \"loud\"\n").is_err());
    }
}
