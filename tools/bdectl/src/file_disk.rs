// SPDX-License-Identifier: MPL-2.0

use std::{
    fmt,
    fs::{File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::Path,
    sync::Arc,
};

use aster_block::{
    bio::{BioEnqueueError, BioStatus, BioType, SubmittedBio},
    AccessCounts, AccessDelta, AccessError, AccessTable, BlockDevice, BlockDeviceMeta,
    SECTOR_SIZE,
};
use log::{error, trace};

/// A block device backed by an image file.
///
/// Bios are served synchronously on the submitting thread.
pub struct FileDisk {
    name: String,
    file: File,
    nr_sectors: usize,
    access: AccessTable,
}

impl FileDisk {
    /// Opens the image at `path` for reading and writing.
    ///
    /// A trailing partial sector of the image is not exposed.
    pub fn open(path: &Path) -> io::Result<Arc<Self>> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len() as usize;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(Arc::new(Self {
            name,
            file,
            nr_sectors: len / SECTOR_SIZE,
            access: AccessTable::new(),
        }))
    }

    /// Creates the image at `path` with `nbytes` zero bytes, or resizes it.
    pub fn create(path: &Path, nbytes: u64) -> io::Result<Arc<Self>> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(nbytes)?;
        drop(file);
        Self::open(path)
    }

    fn handle(&self, bio: &SubmittedBio) -> io::Result<()> {
        let offset = bio.byte_range().start as u64;
        match bio.type_() {
            BioType::Read => {
                let mut buf = vec![0; bio.nbytes()];
                self.file.read_exact_at(&mut buf, offset)?;
                bio.scatter_from(&buf);
            }
            BioType::Write => {
                let mut buf = vec![0; bio.nbytes()];
                bio.gather_into(&mut buf);
                self.file.write_all_at(&buf, offset)?;
            }
            BioType::Flush => self.file.sync_data()?,
            BioType::Discard => {
                let buf = vec![0; bio.nbytes()];
                self.file.write_all_at(&buf, offset)?;
            }
        }
        Ok(())
    }
}

impl BlockDevice for FileDisk {
    fn enqueue(&self, bio: SubmittedBio) -> Result<(), BioEnqueueError> {
        if bio.byte_range().end > self.nr_sectors * SECTOR_SIZE {
            return Err(BioEnqueueError::OutOfRange);
        }

        let status = match self.handle(&bio) {
            Ok(()) => BioStatus::Complete,
            Err(e) => {
                error!("[FileDisk] {}: {:?} failed: {}", self.name, bio.type_(), e);
                BioStatus::IoError
            }
        };
        trace!("[FileDisk] {} {:?} -> {:?}", self.name, bio.sid_range(), status);
        bio.complete(status);
        Ok(())
    }

    fn metadata(&self) -> BlockDeviceMeta {
        BlockDeviceMeta {
            max_nr_segments_per_bio: usize::MAX,
            nr_sectors: self.nr_sectors,
            sector_size: SECTOR_SIZE,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn access(&self, held: AccessCounts, delta: AccessDelta) -> Result<(), AccessError> {
        self.access.apply(held, delta, false).map(|_| ())
    }
}

impl fmt::Debug for FileDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDisk")
            .field("name", &self.name)
            .field("nr_sectors", &self.nr_sectors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_bytes_are_served_as_sectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("disk.img");
        let disk = FileDisk::create(&path, 4 * SECTOR_SIZE as u64 + 100).unwrap();
        assert_eq!(disk.metadata().nr_sectors, 4);
        assert_eq!(disk.name(), "disk.img");

        let dev: Arc<dyn BlockDevice> = disk;
        dev.write_bytes(SECTOR_SIZE, &[0xab; SECTOR_SIZE]).unwrap();
        let mut buf = vec![0; 2 * SECTOR_SIZE];
        dev.read_bytes(0, &mut buf).unwrap();
        assert!(buf[..SECTOR_SIZE].iter().all(|&b| b == 0));
        assert!(buf[SECTOR_SIZE..].iter().all(|&b| b == 0xab));

        let image = std::fs::read(&path).unwrap();
        assert_eq!(image[SECTOR_SIZE], 0xab);
        assert!(dev.read_bytes(4 * SECTOR_SIZE, &mut buf).is_err());
    }
}
