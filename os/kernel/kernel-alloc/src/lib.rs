//! # Physical Frame Allocation
//!
//! This crate owns physical memory: it hands out contiguous runs of 4 KiB
//! frames and takes them back, and it provides the seam through which the
//! kernel touches physical memory at all.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Frame Pool Registry                    │
//! │    • Range lookup: frame number -> owning pool      │
//! │    • Release by bare frame number                   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │                Frame Pools                          │
//! │    • First-fit contiguous runs                      │
//! │    • 2-bit head/body state per frame                │
//! │    • Interrupt-masked critical sections             │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper                        │
//! │    • Physical address -> usable reference           │
//! │    • Identity mapping before paging                 │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Pools ([`frame_alloc`])
//!
//! A [`FramePool`](frame_alloc::FramePool) covers a fixed range of frames.
//! Two pools are typical:
//!
//! * the **kernel pool** (frames 512..1024), self-hosting its bitmap in its
//!   first frame, serving page directories and page tables;
//! * the **process pool** (frames 1024..8192), whose bitmap lives in a frame
//!   taken from the kernel pool, serving demand-paged data frames. The
//!   firmware hole at 15 MiB is reserved with
//!   [`mark_inaccessible`](frame_alloc::FramePool::mark_inaccessible).
//!
//! Both are registered with the [`FRAME_POOLS`](frame_alloc::FRAME_POOLS)
//! registry, which is what page release goes through.
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! [`PhysMapper`](phys_mapper::PhysMapper) abstracts how physical memory is
//! reached; the virtual memory crate extends it into its MMU seam.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::frame_alloc::{FramePool, FramePoolRegistry};
//! use kernel_memory_addresses::FrameNumber;
//!
//! let mut kernel_bitmap = [0u8; 128];
//! let mut process_bitmap = [0u8; 1792];
//! let kernel = FramePool::new(FrameNumber::new(512), 512, None, &mut kernel_bitmap).unwrap();
//! let info = kernel.get_frames(1).unwrap();
//! let process = FramePool::new(FrameNumber::new(1024), 7168, Some(info), &mut process_bitmap).unwrap();
//!
//! let registry = FramePoolRegistry::new();
//! registry.register(&kernel).unwrap();
//! registry.register(&process).unwrap();
//!
//! let frame = process.get_frames(1).unwrap();
//! assert_eq!(registry.release_frames(frame), Ok(1));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod frame_alloc;
pub mod phys_mapper;
