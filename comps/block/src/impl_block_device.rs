// SPDX-License-Identifier: MPL-2.0

use super::{
    bio::{
        general_complete_fn, is_sector_aligned, Bio, BioDirection, BioSegment, BioStatus,
        BioType, BioWaiter,
    },
    id::Sid,
    BlockDevice, Error,
};

/// Implements several commonly used APIs for the block device to conveniently
/// read and write bytes in units of sectors.
impl dyn BlockDevice + '_ {
    /// Synchronously reads `buf.len()` bytes starting at `offset`.
    ///
    /// Both `offset` and the length must be sector aligned.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) -> Result<(), Error> {
        if !is_sector_aligned(offset) || !is_sector_aligned(buf.len()) {
            return Err(Error::InvalidArgs);
        }
        if buf.is_empty() {
            return Ok(());
        }

        let segment = BioSegment::alloc(buf.len(), BioDirection::FromDevice);
        let bio = Bio::new(
            BioType::Read,
            Sid::from_offset(offset),
            vec![segment.clone()],
            None,
        );
        bio.submit_and_wait(self)?.into_result()?;
        segment.read_bytes(0, buf);
        Ok(())
    }

    /// Synchronously writes `buf` starting at `offset`.
    ///
    /// Both `offset` and the length must be sector aligned.
    pub fn write_bytes(&self, offset: usize, buf: &[u8]) -> Result<(), Error> {
        if buf.is_empty() && is_sector_aligned(offset) {
            return Ok(());
        }
        let waiter = self.write_bytes_async(offset, buf)?;
        match waiter.wait() {
            Some(_) => Ok(()),
            None => waiter.status(0).into_result(),
        }
    }

    /// Asynchronously reads `nbytes` bytes starting at `offset`.
    ///
    /// The data can be fetched from the returned segment once the waiter
    /// reports completion.
    pub fn read_bytes_async(
        &self,
        offset: usize,
        nbytes: usize,
    ) -> Result<(BioWaiter, BioSegment), Error> {
        if !is_sector_aligned(offset) || !is_sector_aligned(nbytes) {
            return Err(Error::InvalidArgs);
        }

        let segment = BioSegment::alloc(nbytes, BioDirection::FromDevice);
        let bio = Bio::new(
            BioType::Read,
            Sid::from_offset(offset),
            vec![segment.clone()],
            None,
        );
        let waiter = bio.submit(self)?;
        Ok((waiter, segment))
    }

    /// Asynchronously writes `buf` starting at `offset`.
    pub fn write_bytes_async(&self, offset: usize, buf: &[u8]) -> Result<BioWaiter, Error> {
        if !is_sector_aligned(offset) || !is_sector_aligned(buf.len()) {
            return Err(Error::InvalidArgs);
        }

        let segment = BioSegment::from_vec(buf.to_vec(), BioDirection::ToDevice);
        let bio = Bio::new(
            BioType::Write,
            Sid::from_offset(offset),
            vec![segment],
            None,
        );
        Ok(bio.submit(self)?)
    }

    /// Issues a sync request.
    pub fn sync(&self) -> Result<BioStatus, Error> {
        let bio = Bio::new(
            BioType::Flush,
            Sid::new(0),
            vec![],
            Some(Box::new(general_complete_fn)),
        );
        let status = bio.submit_and_wait(self)?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use crate::{bio::BioStatus, BlockDevice, Error, MemDisk, SECTOR_SIZE};

    #[test]
    fn bytes_round_trip_through_bios() {
        let disk = MemDisk::create("md0", 16);
        let dev: &dyn BlockDevice = &*disk;

        let data: Vec<u8> = (0..2 * SECTOR_SIZE).map(|i| i as u8).collect();
        dev.write_bytes(3 * SECTOR_SIZE, &data).unwrap();

        let mut buf = vec![0; 2 * SECTOR_SIZE];
        dev.read_bytes(3 * SECTOR_SIZE, &mut buf).unwrap();
        assert_eq!(buf, data);
        assert_eq!(dev.sync().unwrap(), BioStatus::Complete);
    }

    #[test]
    fn misaligned_requests_are_rejected() {
        let disk = MemDisk::create("md0", 16);
        let dev: &dyn BlockDevice = &*disk;
        let mut buf = vec![0; 100];
        assert_eq!(dev.read_bytes(0, &mut buf), Err(Error::InvalidArgs));
        assert_eq!(dev.write_bytes(1, &[0; SECTOR_SIZE]), Err(Error::InvalidArgs));
    }

    #[test]
    fn failed_read_surfaces_status() {
        let disk = MemDisk::create("md0", 16);
        disk.fail_reads(true);
        let dev: &dyn BlockDevice = &*disk;
        let mut buf = vec![0; SECTOR_SIZE];
        assert_eq!(
            dev.read_bytes(0, &mut buf),
            Err(Error::Io(BioStatus::IoError))
        );
    }
}
