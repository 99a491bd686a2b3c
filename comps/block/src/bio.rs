// SPDX-License-Identifier: MPL-2.0

use super::{
    id::{sid_range_to_bytes, Sid},
    BlockDevice, Error,
};
use crate::{prelude::*, SECTOR_SIZE};

/// The callback of a `Bio`, run once by whoever completes it.
pub type BioCompleteFn = Box<dyn FnOnce(&SubmittedBio) + Send>;

/// A block I/O request.
///
/// A bio names an operation, a contiguous range of sectors and the memory
/// segments that hold the data, in sector order. Submitting a bio hands a
/// [`SubmittedBio`] to the device; the submitter keeps the `Bio` (or the
/// returned [`BioWaiter`]) to learn the outcome.
#[derive(Debug)]
pub struct Bio(Arc<BioInner>);

impl Bio {
    /// Creates a bio starting at `start_sid` and spanning all of `segments`.
    pub fn new(
        type_: BioType,
        start_sid: Sid,
        segments: Vec<BioSegment>,
        complete_fn: Option<BioCompleteFn>,
    ) -> Self {
        let nsectors: u64 = segments.iter().map(|seg| seg.nsectors().to_raw()).sum();
        Self(Arc::new(BioInner {
            type_,
            sid_range: start_sid..start_sid + nsectors,
            segments,
            complete_fn: Mutex::new(complete_fn),
            status: AtomicU32::new(BioStatus::Init as u32),
            wait_queue: WaitQueue::new(),
        }))
    }

    pub fn type_(&self) -> BioType {
        self.0.type_
    }

    pub fn sid_range(&self) -> &Range<Sid> {
        &self.0.sid_range
    }

    pub fn segments(&self) -> &[BioSegment] {
        &self.0.segments
    }

    pub fn status(&self) -> BioStatus {
        self.0.status()
    }

    /// Hands the bio over to `block_device`.
    ///
    /// If the device refuses the bio, it is left untouched in the `Init`
    /// status and may be submitted again.
    ///
    /// # Panics
    ///
    /// Panics if the bio has already been submitted.
    pub fn submit(&self, block_device: &dyn BlockDevice) -> Result<BioWaiter, BioEnqueueError> {
        assert!(
            self.0.transition(BioStatus::Init, BioStatus::Submit),
            "bio submitted twice"
        );

        if let Err(e) = block_device.enqueue(SubmittedBio(self.0.clone())) {
            let reverted = self.0.transition(BioStatus::Submit, BioStatus::Init);
            debug_assert!(reverted);
            return Err(e);
        }

        Ok(BioWaiter {
            bios: vec![self.0.clone()],
        })
    }

    /// Submits the bio and blocks until it completes.
    ///
    /// Returns the final status, which may be a failure.
    pub fn submit_and_wait(
        &self,
        block_device: &dyn BlockDevice,
    ) -> Result<BioStatus, BioEnqueueError> {
        let waiter = self.submit(block_device)?;
        Ok(waiter.wait().unwrap_or_else(|| self.status()))
    }
}

/// The reasons for a device to refuse a bio.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BioEnqueueError {
    /// The bio has more segments than the device takes.
    TooBig,
    /// The bio does not start or end on a sector boundary of the device.
    Misaligned,
    /// The bio reaches past the end of the device.
    OutOfRange,
}

/// A handle for waiting on one or more submitted bios.
#[must_use]
#[derive(Debug, Default)]
pub struct BioWaiter {
    bios: Vec<Arc<BioInner>>,
}

impl BioWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of bios being waited on.
    pub fn nreqs(&self) -> usize {
        self.bios.len()
    }

    /// Returns the `index`-th bio.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn req(&self, index: usize) -> Bio {
        Bio(self.bios[index].clone())
    }

    /// Returns the current status of the `index`-th bio.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn status(&self, index: usize) -> BioStatus {
        self.bios[index].status()
    }

    /// Takes over the bios of `other`.
    pub fn concat(&mut self, mut other: Self) {
        self.bios.append(&mut other.bios);
    }

    /// Blocks until every bio has completed.
    ///
    /// Returns `Some(BioStatus::Complete)` if all of them succeeded and
    /// `None` otherwise; the individual statuses are available through
    /// [`status`](Self::status).
    pub fn wait(&self) -> Option<BioStatus> {
        let mut is_all_complete = true;
        for bio in &self.bios {
            let status = bio.wait_queue.wait_until(|| {
                let status = bio.status();
                (status != BioStatus::Submit).then_some(status)
            });
            is_all_complete &= status == BioStatus::Complete;
        }
        is_all_complete.then_some(BioStatus::Complete)
    }

    pub fn clear(&mut self) {
        self.bios.clear();
    }
}

/// A bio as seen by the device it has been submitted to.
///
/// The device owns it until it calls [`complete`](Self::complete).
#[derive(Debug)]
pub struct SubmittedBio(Arc<BioInner>);

impl SubmittedBio {
    pub fn type_(&self) -> BioType {
        self.0.type_
    }

    pub fn sid_range(&self) -> &Range<Sid> {
        &self.0.sid_range
    }

    /// Returns the range of bytes on the device covered by the bio.
    pub fn byte_range(&self) -> Range<usize> {
        sid_range_to_bytes(&self.0.sid_range)
    }

    pub fn segments(&self) -> &[BioSegment] {
        &self.0.segments
    }

    /// Returns the number of bytes carried by the segments.
    pub fn nbytes(&self) -> usize {
        self.0.segments.iter().map(BioSegment::nbytes).sum()
    }

    pub fn status(&self) -> BioStatus {
        self.0.status()
    }

    /// Copies the data carried by the segments into `buf`, in order.
    ///
    /// # Panics
    ///
    /// Panics unless `buf` is exactly `self.nbytes()` long.
    pub fn gather_into(&self, buf: &mut [u8]) {
        assert_eq!(buf.len(), self.nbytes());
        let mut rest = buf;
        for segment in self.segments() {
            let (head, tail) = rest.split_at_mut(segment.nbytes());
            segment.read_bytes(0, head);
            rest = tail;
        }
    }

    /// Copies `buf` into the segments, in order.
    ///
    /// # Panics
    ///
    /// Panics unless `buf` is exactly `self.nbytes()` long.
    pub fn scatter_from(&self, buf: &[u8]) {
        assert_eq!(buf.len(), self.nbytes());
        let mut rest = buf;
        for segment in self.segments() {
            let (head, tail) = rest.split_at(segment.nbytes());
            segment.write_bytes(0, head);
            rest = tail;
        }
    }

    /// Finishes the bio with the final `status`.
    ///
    /// The callback runs before any waiter is woken up.
    ///
    /// # Panics
    ///
    /// Panics if `status` is not a final status or the bio has already
    /// been completed.
    pub fn complete(&self, status: BioStatus) {
        assert!(status != BioStatus::Init && status != BioStatus::Submit);
        assert!(
            self.0.transition(BioStatus::Submit, status),
            "bio completed twice"
        );

        let complete_fn = self.0.complete_fn.lock().take();
        if let Some(complete_fn) = complete_fn {
            complete_fn(self);
        }
        self.0.wait_queue.wake_all();
    }
}

struct BioInner {
    type_: BioType,
    sid_range: Range<Sid>,
    segments: Vec<BioSegment>,
    complete_fn: Mutex<Option<BioCompleteFn>>,
    /// A `BioStatus` stored as its discriminant.
    status: AtomicU32,
    wait_queue: WaitQueue,
}

impl BioInner {
    fn status(&self) -> BioStatus {
        BioStatus::from_raw(self.status.load(Ordering::Acquire))
    }

    /// Moves the status from `from` to `to`, failing if it is not `from`.
    fn transition(&self, from: BioStatus, to: BioStatus) -> bool {
        self.status
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Debug for BioInner {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BioInner")
            .field("type", &self.type_)
            .field("sid_range", &self.sid_range)
            .field("status", &self.status())
            .field("nr_segments", &self.segments.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BioType {
    Read,
    Write,
    /// Makes the completed writes durable.
    Flush,
    /// Tells the device that the sectors hold no useful data.
    Discard,
}

/// The lifecycle of a bio: `Init`, then `Submit`, then one final status.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u32)]
pub enum BioStatus {
    Init = 0,
    Submit = 1,
    /// The I/O succeeded.
    Complete = 2,
    /// The device does not implement the operation.
    NotSupported = 3,
    /// The I/O could not get the memory it needed.
    NoSpace = 4,
    /// The I/O failed.
    IoError = 5,
    /// The device has gone away or is being torn down.
    NoDevice = 6,
}

impl BioStatus {
    const ALL: [BioStatus; 7] = [
        BioStatus::Init,
        BioStatus::Submit,
        BioStatus::Complete,
        BioStatus::NotSupported,
        BioStatus::NoSpace,
        BioStatus::IoError,
        BioStatus::NoDevice,
    ];

    /// Converts a final status into a `Result`.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            BioStatus::Complete => Ok(()),
            status => Err(Error::Io(status)),
        }
    }

    fn from_raw(raw: u32) -> Self {
        // Only valid discriminants are ever stored.
        Self::ALL[raw as usize]
    }
}

/// A buffer that a bio reads into or writes from.
///
/// Clones share the buffer, so the submitter of a read keeps a clone to
/// get the data back.
#[derive(Debug, Clone)]
pub struct BioSegment {
    inner: Arc<BioSegmentInner>,
}

#[derive(Debug)]
struct BioSegmentInner {
    buf: Mutex<Box<[u8]>>,
    direction: BioDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioDirection {
    /// The device fills the segment.
    FromDevice,
    /// The device consumes the segment.
    ToDevice,
}

impl BioSegment {
    /// Allocates a zero-filled segment.
    ///
    /// # Panics
    ///
    /// Panics if `nbytes` is not a multiple of [`SECTOR_SIZE`].
    pub fn alloc(nbytes: usize, direction: BioDirection) -> Self {
        Self::from_vec(vec![0; nbytes], direction)
    }

    /// Wraps `buf` into a segment.
    ///
    /// # Panics
    ///
    /// Panics if the length of `buf` is not a multiple of [`SECTOR_SIZE`].
    pub fn from_vec(buf: Vec<u8>, direction: BioDirection) -> Self {
        assert!(is_sector_aligned(buf.len()));
        Self {
            inner: Arc::new(BioSegmentInner {
                buf: Mutex::new(buf.into_boxed_slice()),
                direction,
            }),
        }
    }

    pub fn nbytes(&self) -> usize {
        self.inner.buf.lock().len()
    }

    pub fn nsectors(&self) -> Sid {
        Sid::from_offset(self.nbytes())
    }

    pub fn direction(&self) -> BioDirection {
        self.inner.direction
    }

    /// Copies bytes starting at `offset` into `buf`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the segment.
    pub fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        let data = self.inner.buf.lock();
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
    }

    /// Copies `buf` into the segment starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the segment.
    pub fn write_bytes(&self, offset: usize, buf: &[u8]) {
        let mut data = self.inner.buf.lock();
        data[offset..offset + buf.len()].copy_from_slice(buf);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.buf.lock().to_vec()
    }
}

pub fn is_sector_aligned(offset: usize) -> bool {
    offset % SECTOR_SIZE == 0
}

/// A completion callback that logs failures.
pub fn general_complete_fn(bio: &SubmittedBio) {
    let status = bio.status();
    if status != BioStatus::Complete {
        error!("{:?} of {:?} failed: {:?}", bio.type_(), bio.sid_range(), status);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicUsize, thread};

    use super::*;
    use crate::MemDisk;

    #[test]
    fn submit_completes_exactly_once() {
        let disk = MemDisk::create("md0", 64);
        let calls = Arc::new(AtomicUsize::new(0));
        let cloned = calls.clone();
        let bio = Bio::new(
            BioType::Write,
            Sid::new(4),
            vec![BioSegment::from_vec(vec![0x5a; SECTOR_SIZE], BioDirection::ToDevice)],
            Some(Box::new(move |bio: &SubmittedBio| {
                assert_eq!(bio.status(), BioStatus::Complete);
                cloned.fetch_add(1, Ordering::Relaxed);
            })),
        );

        let status = bio.submit_and_wait(&*disk).unwrap();
        assert_eq!(status, BioStatus::Complete);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(disk.read_raw(4 * SECTOR_SIZE, 2), vec![0x5a, 0x5a]);
    }

    #[test]
    fn refused_bio_returns_to_init() {
        let disk = MemDisk::create("md0", 8);
        let bio = Bio::new(
            BioType::Read,
            Sid::new(8),
            vec![BioSegment::alloc(SECTOR_SIZE, BioDirection::FromDevice)],
            None,
        );

        assert_eq!(
            bio.submit(&*disk).unwrap_err(),
            BioEnqueueError::OutOfRange
        );
        assert_eq!(bio.status(), BioStatus::Init);
    }

    #[test]
    fn waiter_observes_completion_from_another_thread() {
        let disk = MemDisk::create("md0", 8);
        disk.pause();

        let segment = BioSegment::alloc(SECTOR_SIZE, BioDirection::FromDevice);
        let bio = Bio::new(BioType::Read, Sid::new(0), vec![segment], None);
        let waiter = bio.submit(&*disk).unwrap();
        assert_eq!(waiter.status(0), BioStatus::Submit);

        let cloned = disk.clone();
        let resumer = thread::spawn(move || cloned.resume());
        assert_eq!(waiter.wait(), Some(BioStatus::Complete));
        resumer.join().unwrap();
    }

    #[test]
    fn segments_gather_and_scatter_in_order() {
        let first = BioSegment::from_vec(vec![1; SECTOR_SIZE], BioDirection::ToDevice);
        let second = BioSegment::from_vec(vec![2; SECTOR_SIZE], BioDirection::ToDevice);
        let bio = Bio::new(
            BioType::Write,
            Sid::new(0),
            vec![first.clone(), second.clone()],
            None,
        );
        assert_eq!(bio.sid_range(), &(Sid::new(0)..Sid::new(2)));

        let submitted = SubmittedBio(bio.0.clone());
        let mut buf = vec![0; 2 * SECTOR_SIZE];
        submitted.gather_into(&mut buf);
        assert_eq!(buf[SECTOR_SIZE - 1], 1);
        assert_eq!(buf[SECTOR_SIZE], 2);

        buf.fill(9);
        submitted.scatter_from(&buf);
        assert_eq!(first.to_vec(), vec![9; SECTOR_SIZE]);
        assert_eq!(second.to_vec(), vec![9; SECTOR_SIZE]);
    }
}
