// SPDX-License-Identifier: MPL-2.0

//! Synchronization primitives shared by the block-I/O crates.
//!
//! The primitives are thin wrappers around those of `parking_lot`, with two
//! properties that matter for I/O paths:
//!
//! - Locking never fails. A panicking request handler releases its lock
//!   without poisoning it for every later request.
//! - `WaitQueue` offers the condition-driven `wait_until` interface, so that
//!   waiters cannot lose a wakeup as long as wakers update the condition
//!   before calling a `wake`-family method.

#![deny(unsafe_code)]

mod mutex;
mod wait;

pub use self::{
    mutex::{Condvar, Mutex, MutexGuard},
    wait::WaitQueue,
};
