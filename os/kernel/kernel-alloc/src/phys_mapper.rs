//! # Physical memory access
//!
//! Code can only dereference virtual addresses. Whenever the kernel needs to
//! touch a physical frame (a frame pool's bitmap, a fresh page directory) it
//! goes through a [`PhysMapper`], which turns a physical address into a
//! usable reference in the current address space.
//!
//! Before paging is enabled, and for everything inside the identity-mapped
//! shared region afterwards, [`IdentityPhysMapper`] is the right choice.
//! Hosted tests substitute a mapper backed by an ordinary buffer.

use kernel_memory_addresses::PhysicalAddress;

/// Converts physical addresses into references the running code can use.
pub trait PhysMapper {
    /// Map a physical address to a mutable reference of type `T`.
    ///
    /// # Safety
    /// The caller must ensure that `pa` is reachable through this mapper, is
    /// suitably aligned for `T`, and that no other live reference aliases it
    /// for the returned lifetime.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Map `len` bytes starting at `pa` to a mutable byte slice.
    ///
    /// # Safety
    /// As for [`phys_to_mut`](Self::phys_to_mut), for the whole range.
    unsafe fn phys_to_bytes<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        let first: &'a mut u8 = unsafe { self.phys_to_mut(pa) };
        unsafe { core::slice::from_raw_parts_mut(first, len) }
    }
}

/// [`PhysMapper`] for memory that is identity mapped (physical == virtual).
///
/// # Safety
/// Only valid before paging is enabled or for addresses inside the
/// identity-mapped shared region.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = pa.as_usize() as *mut T;
        // SAFETY: Caller guarantees that `pa` is identity mapped and unaliased.
        unsafe { &mut *va }
    }
}
