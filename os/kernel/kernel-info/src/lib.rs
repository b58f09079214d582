//! # Kernel Memory Configuration
//!
//! Compile-time constants that describe the physical and virtual memory layout
//! of the kernel: page and table geometry, where the kernel and process frame
//! pools live, the firmware hole, the identity-mapped shared region and the
//! recursive page-directory window.
//!
//! ```text
//! Physical Memory Layout:
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory + Kernel Image   │
//!             │        (identity mapped)        │
//! 0x0020_0000 ├─────────────────────────────────┤ KERNEL_POOL_START_FRAME
//!             │       Kernel Frame Pool         │
//!             │  (directories and page tables)  │
//! 0x0040_0000 ├─────────────────────────────────┤ PROCESS_POOL_START_FRAME
//!             │      Process Frame Pool         │
//!             │   (demand-paged data frames)    │
//! 0x00F0_0000 │ ┄┄┄┄┄ memory hole (1 MiB) ┄┄┄┄┄ │ MEM_HOLE_START_FRAME
//!             │                                 │
//! 0x0200_0000 └─────────────────────────────────┘
//! ```
//!
//! The first [`SHARED_REGION_SIZE`](memory::SHARED_REGION_SIZE) bytes are
//! identity mapped in every address space. The page directory maps itself
//! through its last slot, see [`RECURSIVE_SLOT`](memory::RECURSIVE_SLOT).
//!
//! All values are checked for consistency in a `const` block at compile time.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
