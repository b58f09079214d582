//! # Kernel synchronization primitives
//!
//! A generic [`Mutex`] over a raw lock, the [`SpinMutex`] alias used by the
//! memory managers, and [`IrqGuard`]-based critical sections
//! ([`Mutex::lock_irq`]) that keep interrupt handlers out while a frame pool
//! or region table is being updated.
//!
//! On a hosted target (unit tests, tooling) interrupt masking compiles to
//! nothing and only the spin lock remains.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod mutex;
mod raw_spin;

pub use irq::{IrqGuard, IrqMutex};
pub use mutex::{Mutex, MutexGuard};
pub use raw_spin::RawSpin;

pub type SpinMutex<T> = Mutex<T, RawSpin>;

impl<T> SpinMutex<T> {
    pub const fn new(value: T) -> Self {
        Self::from_raw(RawSpin::new(), value)
    }
}

/// Acquiring side of a raw lock.
pub trait RawLock {
    /// Blocks until the lock is held by the caller.
    fn raw_lock(&self);

    /// Whether the lock is currently held by anybody.
    fn is_locked(&self) -> bool;
}

pub trait RawUnlock {
    /// # Safety
    /// The caller must hold the lock.
    unsafe fn raw_unlock(&self);
}
