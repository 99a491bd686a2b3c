// SPDX-License-Identifier: MPL-2.0

use aster_bde::Errno as BdeErrno;

/// The exit codes of `bdectl`.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    BadArgs = 1,
    ReadConfig = 2,
    ParseConfig = 3,
    WrongPassphrase = 4,
    CorruptHeader = 5,
    Io = 6,
    Busy = 7,
    NoFreeSlot = 8,
    Crypto = 9,
    NotFound = 10,
}

impl From<BdeErrno> for Errno {
    fn from(errno: BdeErrno) -> Self {
        match errno {
            BdeErrno::WrongPassphrase => Errno::WrongPassphrase,
            BdeErrno::CorruptHeader | BdeErrno::UnsupportedVersion => Errno::CorruptHeader,
            BdeErrno::DeviceTooSmall | BdeErrno::InvalidArgs => Errno::BadArgs,
            BdeErrno::AlreadyExists | BdeErrno::Busy => Errno::Busy,
            BdeErrno::NotFound => Errno::NotFound,
            BdeErrno::IoFailed | BdeErrno::DeviceGone | BdeErrno::OutOfMemory => Errno::Io,
            BdeErrno::NoFreeSlot => Errno::NoFreeSlot,
            BdeErrno::EncryptFailed | BdeErrno::DecryptFailed => Errno::Crypto,
        }
    }
}

/// Print error message to console
#[macro_export]
macro_rules! error_msg {
    () => {
        eprint!("")
    };
    ($($arg:tt)*) => {{
        eprint!("\x1b[1;31m[Error]:\x1b[0m ");
        eprintln!($($arg)*);
    }};
}

/// Print warning message to console
#[macro_export]
macro_rules! warn_msg {
    () => {
        eprint!("")
    };
    ($($arg:tt)*) => {{
        eprint!("\x1b[1;33m[Warn]:\x1b[0m ");
        eprintln!($($arg)*);
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_errors_share_an_exit_code() {
        assert_eq!(
            Errno::from(BdeErrno::UnsupportedVersion),
            Errno::CorruptHeader
        );
        assert_eq!(Errno::from(BdeErrno::CorruptHeader) as i32, 5);
        assert_eq!(Errno::from(BdeErrno::WrongPassphrase) as i32, 4);
    }

    #[test]
    fn missing_device_is_told_apart_from_busy() {
        assert_eq!(Errno::from(BdeErrno::NotFound) as i32, 10);
        assert_eq!(Errno::from(BdeErrno::Busy) as i32, 7);
        assert_eq!(Errno::from(BdeErrno::AlreadyExists), Errno::Busy);
    }
}
