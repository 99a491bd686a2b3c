// SPDX-License-Identifier: MPL-2.0

mod cli;
mod commands;
mod config;
mod error;
mod file_disk;

fn main() {
    cli::main();
}
