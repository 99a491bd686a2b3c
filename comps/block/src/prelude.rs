// SPDX-License-Identifier: MPL-2.0

pub(crate) use std::{
    fmt::{self, Debug},
    ops::Range,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Weak,
    },
};

pub(crate) use log::{error, trace, warn};
pub(crate) use os_sync::{Mutex, WaitQueue};
