// SPDX-License-Identifier: MPL-2.0

//! The implementations of the `bdectl` subcommands.

use std::{
    fs,
    io::{self, Write},
    path::Path,
    sync::Arc,
};

use aster_bde::{BdeClass, Errno, Error, FormatOptions, SlotInfo};
use aster_block::BlockDevice;
use log::info;
use zeroize::Zeroizing;

use crate::{
    cli::{DestroyArgs, InfoArgs, InitArgs, NukeArgs, ReadArgs, SetkeyArgs, WriteArgs},
    config::BdectlConfig,
    file_disk::FileDisk,
};

type Result<T> = core::result::Result<T, Error>;

pub fn execute_init_command(args: &InitArgs, config: &BdectlConfig) -> Result<()> {
    let options = FormatOptions {
        sector_size: args.sector_size.unwrap_or(config.format.sector_size),
        kdf_iterations: args.iterations.unwrap_or(config.format.kdf_iterations),
    };
    let passphrase = read_passphrase(&args.passphrase.passphrase_file)?;
    let disk = match args.size {
        Some(size) => FileDisk::create(&args.image, size)
            .map_err(|_| Error::with_msg(Errno::IoFailed, "cannot create the image"))?,
        None => open_image(&args.image)?,
    };

    let geometry = aster_bde::format(&*disk, &passphrase, &options)?;
    println!(
        "formatted {}: sector size {}, media size {}",
        args.image.display(),
        geometry.sector_size,
        geometry.media_size
    );
    Ok(())
}

pub fn execute_setkey_command(args: &SetkeyArgs, config: &BdectlConfig) -> Result<()> {
    let passphrase = read_passphrase(&args.passphrase.passphrase_file)?;
    let new_passphrase = read_passphrase(&args.new_passphrase_file)?;
    let disk = open_image(&args.image)?;

    let iterations = args.iterations.unwrap_or(config.format.kdf_iterations);
    let slot = aster_bde::set_key(&*disk, &passphrase, &new_passphrase, args.slot, iterations)?;
    println!("key slot {} set", slot);
    Ok(())
}

pub fn execute_nuke_command(args: &NukeArgs) -> Result<()> {
    let passphrase = read_passphrase(&args.passphrase.passphrase_file)?;
    let disk = open_image(&args.image)?;

    let slot = aster_bde::nuke(&*disk, &passphrase, args.slot)?;
    println!("key slot {} erased", slot);
    Ok(())
}

pub fn execute_destroy_command(args: &DestroyArgs) -> Result<()> {
    let passphrase = read_passphrase(&args.passphrase.passphrase_file)?;
    let disk = open_image(&args.image)?;

    aster_bde::destroy(&*disk, &passphrase)?;
    println!("all key slots erased");
    Ok(())
}

pub fn execute_info_command(args: &InfoArgs) -> Result<()> {
    let disk = open_image(&args.image)?;
    let header = aster_bde::inspect(&*disk)?;

    println!("version:     {}", header.version);
    println!("sector size: {}", header.geometry.sector_size);
    println!("data offset: {}", header.geometry.data_offset);
    println!("media size:  {}", header.geometry.media_size);
    let device_id: String = header
        .device_id
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect();
    println!("device id:   {}", device_id);
    for (idx, slot) in header.slots.iter().enumerate() {
        match slot {
            SlotInfo::Empty => println!("slot {}:      empty", idx),
            SlotInfo::Active { kdf_iterations } => {
                println!("slot {}:      active, {} iterations", idx, kdf_iterations)
            }
            SlotInfo::Corrupt => println!("slot {}:      corrupt", idx),
        }
    }
    Ok(())
}

pub fn execute_read_command(args: &ReadArgs) -> Result<()> {
    let passphrase = read_passphrase(&args.passphrase.passphrase_file)?;
    let disk = open_image(&args.image)?;

    let mut buf = Zeroizing::new(vec![0; args.length]);
    with_device(disk, &passphrase, |device| {
        check_range(device, args.offset, args.length)?;
        device.read_bytes(args.offset, &mut buf)?;
        Ok(())
    })?;

    let written = match &args.output {
        Some(path) => fs::write(path, &*buf),
        None => io::stdout().write_all(&buf),
    };
    written.map_err(|_| Error::with_msg(Errno::IoFailed, "cannot write the output"))
}

pub fn execute_write_command(args: &WriteArgs) -> Result<()> {
    let passphrase = read_passphrase(&args.passphrase.passphrase_file)?;
    let disk = open_image(&args.image)?;
    let data = Zeroizing::new(
        fs::read(&args.input)
            .map_err(|_| Error::with_msg(Errno::IoFailed, "cannot read the input"))?,
    );

    with_device(disk, &passphrase, |device| {
        write_and_sync(device, args.offset, &data)
    })
}

fn write_and_sync(device: &dyn BlockDevice, offset: usize, data: &[u8]) -> Result<()> {
    check_range(device, offset, data.len())?;
    device.write_bytes(offset, data)?;
    device.sync()?.into_result()?;
    Ok(())
}

/// Attaches an encrypted device on `disk`, runs `f` on it and dismantles it.
fn with_device<F>(disk: Arc<FileDisk>, passphrase: &[u8], f: F) -> Result<()>
where
    F: FnOnce(&dyn BlockDevice) -> Result<()>,
{
    let class = BdeClass::new();
    let device = class.attach(disk, passphrase)?;
    let name = device.name().to_string();
    info!("attached {}", name);

    let result = f(&*device);
    drop(device);
    class.dismantle(&name)?;
    result
}

fn check_range(device: &dyn BlockDevice, offset: usize, len: usize) -> Result<()> {
    let meta = device.metadata();
    if offset % meta.sector_size != 0 || len % meta.sector_size != 0 {
        return Err(Error::with_msg(
            Errno::InvalidArgs,
            "offset and length must be multiples of the sector size",
        ));
    }
    if offset.checked_add(len).is_none_or(|end| end > meta.nbytes()) {
        return Err(Error::with_msg(
            Errno::InvalidArgs,
            "the range exceeds the media size",
        ));
    }
    Ok(())
}

fn open_image(path: &Path) -> Result<Arc<FileDisk>> {
    FileDisk::open(path).map_err(|_| Error::with_msg(Errno::IoFailed, "cannot open the image"))
}

/// Reads a passphrase, dropping one trailing newline.
fn read_passphrase(path: &Path) -> Result<Zeroizing<Vec<u8>>> {
    let mut passphrase = Zeroizing::new(
        fs::read(path)
            .map_err(|_| Error::with_msg(Errno::InvalidArgs, "cannot read the passphrase file"))?,
    );
    if passphrase.last() == Some(&b'\n') {
        passphrase.pop();
        if passphrase.last() == Some(&b'\r') {
            passphrase.pop();
        }
    }
    if passphrase.is_empty() {
        return Err(Error::with_msg(Errno::InvalidArgs, "the passphrase is empty"));
    }
    Ok(passphrase)
}
