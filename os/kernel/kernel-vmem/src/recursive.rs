//! # Recursive page-directory window
//!
//! The last directory slot ([`RECURSIVE_SLOT`]) points back at the directory
//! itself. The walk then treats the directory as a page table, and every page
//! table becomes an ordinary page in the top 4 MiB of the address space:
//!
//! ```text
//! 0xFFC0_0000 + d * 4096   page table for directory slot d
//! 0xFFFF_F000              the page directory
//! ```
//!
//! This module is the only place that knows this arithmetic. [`RecursiveMapping`]
//! only works for the *current* address space with paging enabled.
//!
//! ### Examples
//! ```rust
//! # use kernel_memory_addresses::VirtualAddress;
//! # use kernel_vmem::recursive;
//! let va = VirtualAddress::new(0x4000_3000); // slot 256, entry 3
//! assert_eq!(recursive::directory_entry_address(va).as_u32(), 0xFFFF_F400);
//! assert_eq!(recursive::table_entry_address(va).as_u32(), 0xFFD0_000C);
//! ```

use crate::mmu::Mmu;
use crate::page_table::pd::{PageDirectory, PdEntry, PdIndex};
use crate::page_table::pt::{PageTable, PtEntry};
use crate::page_table::{pde_index, pte_index};
use kernel_info::memory::{RECURSIVE_DIRECTORY, RECURSIVE_SLOT};
use kernel_memory_addresses::VirtualAddress;

/// Size of one directory or table entry in bytes.
const ENTRY_SIZE: u16 = 4;

/// Where the page directory is visible.
#[inline]
#[must_use]
pub const fn directory_address() -> VirtualAddress {
    RECURSIVE_DIRECTORY
}

/// Where the page table for directory slot `index` is visible.
#[inline]
#[must_use]
pub const fn table_address(index: PdIndex) -> VirtualAddress {
    VirtualAddress::from_indices(RECURSIVE_SLOT, index.as_u16(), 0)
}

/// Where the directory entry covering `va` is visible.
#[inline]
#[must_use]
pub const fn directory_entry_address(va: VirtualAddress) -> VirtualAddress {
    VirtualAddress::from_indices(RECURSIVE_SLOT, RECURSIVE_SLOT, pde_index(va).as_u16() * ENTRY_SIZE)
}

/// Where the table entry mapping `va` is visible.
#[inline]
#[must_use]
pub const fn table_entry_address(va: VirtualAddress) -> VirtualAddress {
    VirtualAddress::from_indices(
        RECURSIVE_SLOT,
        pde_index(va).as_u16(),
        pte_index(va).as_u16() * ENTRY_SIZE,
    )
}

/// Whether `va` lies inside the window itself.
#[inline]
#[must_use]
pub const fn is_window(va: VirtualAddress) -> bool {
    va.directory_index() == RECURSIVE_SLOT
}

/// Access to the paging structures of the current address space through
/// the recursive slot.
pub struct RecursiveMapping<'m, M: Mmu> {
    mmu: &'m M,
}

impl<'m, M: Mmu> RecursiveMapping<'m, M> {
    #[inline]
    #[must_use]
    pub const fn new(mmu: &'m M) -> Self {
        Self { mmu }
    }

    /// The current page directory.
    ///
    /// # Safety
    /// Paging must be enabled with a directory whose last slot is the
    /// recursive entry, and no other reference to it may be live.
    #[inline]
    pub unsafe fn directory<'a>(&self) -> &'a mut PageDirectory {
        unsafe { self.mmu.virt_to_mut(directory_address()) }
    }

    /// The directory entry that covers `va`.
    ///
    /// # Safety
    /// As for [`directory`](Self::directory).
    #[inline]
    pub unsafe fn directory_entry_for<'a>(&self, va: VirtualAddress) -> &'a mut PdEntry {
        unsafe { self.mmu.virt_to_mut(directory_entry_address(va)) }
    }

    /// The page table for directory slot `index`.
    ///
    /// # Safety
    /// As for [`directory`](Self::directory); additionally the directory
    /// entry for `index` must be present.
    #[inline]
    pub unsafe fn table_for<'a>(&self, index: PdIndex) -> &'a mut PageTable {
        unsafe { self.mmu.virt_to_mut(table_address(index)) }
    }

    /// The table entry that maps `va`.
    ///
    /// # Safety
    /// As for [`table_for`](Self::table_for) with the slot covering `va`.
    #[inline]
    pub unsafe fn table_entry_for<'a>(&self, va: VirtualAddress) -> &'a mut PtEntry {
        unsafe { self.mmu.virt_to_mut(table_entry_address(va)) }
    }
}
