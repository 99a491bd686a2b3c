// SPDX-License-Identifier: MPL-2.0

use std::{path::PathBuf, process};

use clap::{crate_version, ArgAction, Args, Parser, Subcommand};
use log::LevelFilter;

use crate::{
    commands::{
        execute_destroy_command, execute_info_command, execute_init_command,
        execute_nuke_command, execute_read_command, execute_setkey_command,
        execute_write_command,
    },
    config::BdectlConfig,
    error::Errno,
    error_msg,
};

pub fn main() {
    let cli = Cli::parse();
    let config = BdectlConfig::load(cli.config.as_deref());
    init_logger(&config, cli.verbose);

    let result = match &cli.command {
        BdectlSubcommand::Init(args) => execute_init_command(args, &config),
        BdectlSubcommand::Setkey(args) => execute_setkey_command(args, &config),
        BdectlSubcommand::Nuke(args) => execute_nuke_command(args),
        BdectlSubcommand::Destroy(args) => execute_destroy_command(args),
        BdectlSubcommand::Info(args) => execute_info_command(args),
        BdectlSubcommand::Read(args) => execute_read_command(args),
        BdectlSubcommand::Write(args) => execute_write_command(args),
    };
    if let Err(e) = result {
        error_msg!("{}", e);
        process::exit(Errno::from(e.errno()) as _);
    }
}

fn init_logger(config: &BdectlConfig, verbose: u8) {
    // Validated when the configuration was loaded.
    let configured = config.log_level().unwrap_or(LevelFilter::Warn);
    let requested = match verbose {
        0 => LevelFilter::Off,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(configured.max(requested))
        .parse_default_env()
        .init();
}

#[derive(Debug, Parser)]
#[command(name = "bdectl", version = crate_version!())]
/// Manage images of encrypted block devices
pub struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "The configuration file to use")]
    config: Option<PathBuf>,
    #[arg(short, long, global = true, action = ArgAction::Count, help = "Log more, repeatable")]
    verbose: u8,
    #[command(subcommand)]
    command: BdectlSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum BdectlSubcommand {
    #[command(about = "Format an image, protecting a new master key with a passphrase")]
    Init(InitArgs),
    #[command(about = "Add a passphrase, or replace the one in a key slot")]
    Setkey(SetkeyArgs),
    #[command(about = "Erase one key slot")]
    Nuke(NukeArgs),
    #[command(about = "Erase every key slot, making the data unrecoverable")]
    Destroy(DestroyArgs),
    #[command(about = "Describe the header of an image")]
    Info(InfoArgs),
    #[command(about = "Read plaintext from an image")]
    Read(ReadArgs),
    #[command(about = "Write plaintext into an image")]
    Write(WriteArgs),
}

#[derive(Debug, Args)]
pub struct PassphraseArgs {
    #[arg(
        long = "passphrase-file",
        value_name = "FILE",
        help = "The file holding the passphrase; one trailing newline is ignored"
    )]
    pub passphrase_file: PathBuf,
}

#[derive(Debug, Args)]
pub struct InitArgs {
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
    #[arg(long, value_name = "BYTES", help = "Create or resize the image to this size")]
    pub size: Option<u64>,
    #[arg(long, value_name = "N", help = "The sector size of the encrypted device")]
    pub sector_size: Option<usize>,
    #[arg(long, value_name = "N", help = "The number of PBKDF2 iterations")]
    pub iterations: Option<u32>,
    #[command(flatten)]
    pub passphrase: PassphraseArgs,
}

#[derive(Debug, Args)]
pub struct SetkeyArgs {
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
    #[command(flatten)]
    pub passphrase: PassphraseArgs,
    #[arg(long = "new-passphrase-file", value_name = "FILE")]
    pub new_passphrase_file: PathBuf,
    #[arg(long, value_name = "N", help = "The key slot to write, the first free one if absent")]
    pub slot: Option<usize>,
    #[arg(long, value_name = "N", help = "The number of PBKDF2 iterations")]
    pub iterations: Option<u32>,
}

#[derive(Debug, Args)]
pub struct NukeArgs {
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
    #[command(flatten)]
    pub passphrase: PassphraseArgs,
    #[arg(long, value_name = "N", help = "The key slot to erase, the one opened if absent")]
    pub slot: Option<usize>,
}

#[derive(Debug, Args)]
pub struct DestroyArgs {
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
    #[command(flatten)]
    pub passphrase: PassphraseArgs,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
    #[command(flatten)]
    pub passphrase: PassphraseArgs,
    #[arg(long, value_name = "BYTES")]
    pub offset: usize,
    #[arg(long, value_name = "BYTES")]
    pub length: usize,
    #[arg(long, value_name = "FILE", help = "Write to this file instead of stdout")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct WriteArgs {
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
    #[command(flatten)]
    pub passphrase: PassphraseArgs,
    #[arg(long, value_name = "BYTES")]
    pub offset: usize,
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_line_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbosity_is_counted() {
        let cli = Cli::parse_from(["bdectl", "-vv", "info", "disk.img"]);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, BdectlSubcommand::Info(_)));
    }
}
