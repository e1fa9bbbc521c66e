//! # Kernel synchronization primitives
//!
//! Busy-waiting locks for code that may not sleep on a scheduler queue:
//!
//! - [`SpinLock`]: exclusive lock (test-and-test-and-set).
//! - [`RwSpinLock`]: reader/writer lock; readers share, a waiting writer
//!   blocks new readers so writers cannot starve.
//! - [`SyncOnceCell`]: write-once cell for process-wide singletons.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod rw_lock;
mod spin_lock;
mod sync_once_cell;

pub use rw_lock::{RwReadGuard, RwSpinLock, RwWriteGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
