// SPDX-License-Identifier: MPL-2.0

use core::fmt;

use aster_block::{bio::BioStatus, AccessError};

/// The error types used in this crate.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Errno {
    /// No key slot could be opened with the passphrase.
    WrongPassphrase,
    /// The on-disk header is damaged.
    CorruptHeader,
    /// The on-disk header was written by an unknown format version.
    UnsupportedVersion,
    /// The backing device cannot hold the header and at least one data sector.
    DeviceTooSmall,
    /// Invalid arguments.
    InvalidArgs,
    /// IO error.
    IoFailed,
    /// Not found.
    NotFound,
    /// Already exists.
    AlreadyExists,
    /// The device is held open.
    Busy,
    /// The backing device has gone away.
    DeviceGone,
    /// Every key slot is in use.
    NoFreeSlot,
    /// Out of memory.
    OutOfMemory,
    /// Encryption operation failed.
    EncryptFailed,
    /// Decryption operation failed.
    DecryptFailed,
}

/// The error with an error type and an error message used in this crate.
#[derive(Clone, Debug)]
pub struct Error {
    errno: Errno,
    msg: Option<&'static str>,
}

impl Error {
    /// Creates a new error with the given error type and no error message.
    pub const fn new(errno: Errno) -> Self {
        Error { errno, msg: None }
    }

    /// Creates a new error with the given error type and the error message.
    pub const fn with_msg(errno: Errno, msg: &'static str) -> Self {
        Error {
            errno,
            msg: Some(msg),
        }
    }

    /// Returns the error type.
    pub fn errno(&self) -> Errno {
        self.errno
    }

    /// Returns the error message, if any.
    pub fn msg(&self) -> Option<&'static str> {
        self.msg
    }
}

impl From<Errno> for Error {
    fn from(errno: Errno) -> Self {
        Error::new(errno)
    }
}

impl From<AccessError> for Error {
    fn from(error: AccessError) -> Self {
        match error {
            AccessError::Busy => Error::with_msg(Errno::Busy, "the device is opened by others"),
            AccessError::NoDevice => Error::new(Errno::DeviceGone),
            AccessError::InvalidArgs => {
                Error::with_msg(Errno::InvalidArgs, "unbalanced access release")
            }
        }
    }
}

impl From<aster_block::Error> for Error {
    fn from(error: aster_block::Error) -> Self {
        match error {
            aster_block::Error::InvalidArgs => Error::new(Errno::InvalidArgs),
            aster_block::Error::Io(BioStatus::NoDevice) => Error::new(Errno::DeviceGone),
            aster_block::Error::Enqueue(_) | aster_block::Error::Io(_) => {
                Error::with_msg(Errno::IoFailed, "backing device I/O failed")
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{}: {}", self.errno, msg),
            None => write!(f, "{}", self.errno),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Errno::WrongPassphrase => "wrong passphrase",
            Errno::CorruptHeader => "corrupt header",
            Errno::UnsupportedVersion => "unsupported header version",
            Errno::DeviceTooSmall => "backing device too small",
            Errno::InvalidArgs => "invalid arguments",
            Errno::IoFailed => "I/O error",
            Errno::NotFound => "no such device",
            Errno::AlreadyExists => "device already exists",
            Errno::Busy => "device busy",
            Errno::DeviceGone => "backing device has gone away",
            Errno::NoFreeSlot => "no free key slot",
            Errno::OutOfMemory => "out of memory",
            Errno::EncryptFailed => "encryption failed",
            Errno::DecryptFailed => "decryption failed",
        };
        f.write_str(reason)
    }
}

impl std::error::Error for Error {}

#[macro_export]
macro_rules! return_errno {
    ($errno: expr) => {
        return core::result::Result::Err($crate::Error::new($errno))
    };
}

#[macro_export]
macro_rules! return_errno_with_msg {
    ($errno: expr, $msg: expr) => {
        return core::result::Result::Err($crate::Error::with_msg($errno, $msg))
    };
}
