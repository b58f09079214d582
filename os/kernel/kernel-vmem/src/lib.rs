//! # Virtual Memory Support
//!
//! Two-level i386 paging for the kernel: page directories and page tables,
//! demand paging, and per-address-space [`VmPool`]s that decide which
//! addresses may be backed at all.
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```
//!
//! ```text
//!  CR3 → PD  →  PT  →  Physical Page
//!        │      │
//!        │      └───► PTE (Page Table Entry)     → maps 4 KiB page
//!        └──────────► PDE (Page Directory Entry) → points at a PT
//! ```
//!
//! Both levels hold 1024 entries of 4 bytes. One page table therefore covers
//! 4 MiB, and one directory the whole 4 GiB.
//!
//! ## Recursive mapping
//!
//! The last directory slot refers to the directory itself, which makes the
//! paging structures of the *current* address space visible in the top 4 MiB.
//! [`recursive`] owns that arithmetic; nothing else computes window addresses.
//!
//! ## What you get
//! - [`Paging`]: machine-wide configuration (pools, shared region, current
//!   directory, paging switch).
//! - [`AddressSpace`]: construction, loading, page-fault resolution and page
//!   release.
//! - [`VmPool`]: region bookkeeping inside an address space.
//! - [`Mmu`](mmu::Mmu): the hardware seam, implemented by `HardwareMmu`
//!   (`asm` feature, i386 targets) and by `SimulatedMachine` (`simulated`
//!   feature) for hosted tests.
//!
//! ## Boot sequence
//!
//! ```text
//! frame pools → FRAME_POOLS.register → Paging::init_global
//!             → AddressSpace::new → load → enable_paging
//! ```
//!
//! After that, the trap glue forwards every `#PF` to
//! [`AddressSpace::handle_fault`] and halts on `Err`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
pub mod fault;
pub mod mmu;
mod page_entry_bits;
pub mod page_table;
pub mod paging;
pub mod recursive;
#[cfg(any(test, feature = "simulated"))]
pub mod simulated;
pub mod vm_pool;

pub use crate::address_space::{AddressSpace, AddressSpaceError};
pub use crate::fault::{FaultError, FaultResolution, PageFault, PageFaultError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{pde_index, pte_index};
pub use crate::paging::{Paging, PagingError};
pub use crate::vm_pool::{Region, VmPool, VmPoolError};
pub use kernel_info::memory as info;
