//! # MMU seam
//!
//! Everything the paging code needs from the processor: install a page
//! directory, switch translation on, and dereference a virtual address under
//! the current translation. Physical access comes from the [`PhysMapper`]
//! supertrait; it is used for the kernel pool frames, which sit inside the
//! identity-mapped shared region.
//!
//! - `x86::HardwareMmu` drives CR0/CR3 on an i386 target (`asm` feature).
//! - `simulated::SimulatedMachine` performs the same walk in software for
//!   hosted tests (`simulated` feature).

#[cfg(all(feature = "asm", target_arch = "x86"))]
pub mod x86;

use kernel_alloc::phys_mapper::PhysMapper;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

pub trait Mmu: PhysMapper {
    /// Installs the page directory at `directory` as translation root.
    ///
    /// Flushes all cached translations, also when `directory` is already
    /// the current root.
    ///
    /// # Safety
    /// `directory` must hold a well-formed page directory that maps the
    /// executing code.
    unsafe fn load_directory(&self, directory: PhysicalAddress);

    /// Physical address of the current translation root.
    fn current_directory(&self) -> PhysicalAddress;

    /// Switches on address translation.
    ///
    /// # Safety
    /// A directory that maps the executing code must be loaded.
    unsafe fn enable_paging(&self);

    /// Whether address translation is switched on.
    fn paging_enabled(&self) -> bool;

    /// Dereferences `va` under the current translation.
    ///
    /// # Safety
    /// `va` must be mapped, suitably aligned for `T`, and unaliased for `'a`.
    unsafe fn virt_to_mut<'a, T>(&self, va: VirtualAddress) -> &'a mut T;
}
