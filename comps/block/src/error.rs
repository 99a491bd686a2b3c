// SPDX-License-Identifier: MPL-2.0

use core::fmt;

use crate::bio::{BioEnqueueError, BioStatus};

/// The error type of the synchronous helpers on block devices.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// The offset or the length is not aligned to the sector size.
    InvalidArgs,
    /// The device refused to take the bio.
    Enqueue(BioEnqueueError),
    /// The bio was taken but did not complete successfully.
    Io(BioStatus),
}

impl From<BioEnqueueError> for Error {
    fn from(error: BioEnqueueError) -> Self {
        Error::Enqueue(error)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgs => write!(f, "invalid arguments"),
            Error::Enqueue(e) => write!(f, "bio refused: {:?}", e),
            Error::Io(status) => write!(f, "bio failed with status {:?}", status),
        }
    }
}

impl std::error::Error for Error {}
