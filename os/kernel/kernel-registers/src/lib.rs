//! # Typed i386 Control Registers
//!
//! The paging code only ever touches three registers:
//!
//! - [`cr0::Cr0`]: `PG` switches the MMU on,
//! - [`cr2::Cr2`]: the faulting linear address after a page fault,
//! - [`cr3::Cr3`]: the physical base of the active page directory.
//!
//! Register access is only compiled with the `asm` feature on a 32-bit x86
//! target; on any other target the types remain plain bitfields.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
