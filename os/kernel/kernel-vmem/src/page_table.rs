//! # i386 Page Tables
//!
//! Two levels, 1024 entries each:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```
//!
//! - [`pd`]: the page directory, one per address space.
//! - [`pt`]: page tables, each covering 4 MiB of virtual space.

pub mod pd;
pub mod pt;

use crate::page_table::pd::PdIndex;
use crate::page_table::pt::PtIndex;
use kernel_memory_addresses::VirtualAddress;

/// Directory index of `va` (bits 31..22).
#[inline]
#[must_use]
pub const fn pde_index(va: VirtualAddress) -> PdIndex {
    PdIndex::from(va)
}

/// Table index of `va` (bits 21..12).
#[inline]
#[must_use]
pub const fn pte_index(va: VirtualAddress) -> PtIndex {
    PtIndex::from(va)
}

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (PdIndex, PtIndex) {
    (pde_index(va), pte_index(va))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_ok() {
        let va = VirtualAddress::new(0xC012_3456);
        let (pd, pt) = split_indices(va);
        assert_eq!(pd.as_usize(), 0x300);
        assert_eq!(pt.as_usize(), 0x123);
    }

    #[test]
    fn indices_invert_composition() {
        for (d, t) in [(0u16, 0u16), (1, 0), (0, 1), (1023, 1023), (512, 7)] {
            let va = VirtualAddress::from_indices(d, t, 0x7FF);
            assert_eq!(pde_index(va).as_usize(), usize::from(d));
            assert_eq!(pte_index(va).as_usize(), usize::from(t));
        }
    }
}
