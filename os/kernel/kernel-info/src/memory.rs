//! # Memory Layout

use kernel_memory_addresses::{PageSize, Size4K, Size4M, VirtualAddress};

/// Size of a physical frame and a virtual page in bytes.
pub const FRAME_SIZE: u32 = Size4K::SIZE;

/// Number of entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Directory slot that points back at the directory itself.
pub const RECURSIVE_SLOT: u16 = 1023;

/// Where the recursive slot exposes all 1024 page tables.
///
/// The page table for directory slot `d` is visible at
/// `RECURSIVE_TABLES_BASE + d * FRAME_SIZE`.
pub const RECURSIVE_TABLES_BASE: VirtualAddress = VirtualAddress::from_indices(RECURSIVE_SLOT, 0, 0);

/// Where the recursive slot exposes the page directory itself.
pub const RECURSIVE_DIRECTORY: VirtualAddress =
    VirtualAddress::from_indices(RECURSIVE_SLOT, RECURSIVE_SLOT, 0);

/// Where the kernel image is placed in physical memory.
pub const PHYS_LOAD: u32 = 0x0010_0000; // 1 MiB

/// Identity-mapped region shared by every address space (kernel code and data).
pub const SHARED_REGION_SIZE: u32 = Size4M::SIZE;

/// First frame of the kernel frame pool (2 MiB).
pub const KERNEL_POOL_START_FRAME: u32 = (2 * 1024 * 1024) / FRAME_SIZE;

/// Number of frames in the kernel frame pool (2 MiB worth).
pub const KERNEL_POOL_FRAMES: u32 = (2 * 1024 * 1024) / FRAME_SIZE;

/// First frame of the process frame pool (4 MiB).
pub const PROCESS_POOL_START_FRAME: u32 = (4 * 1024 * 1024) / FRAME_SIZE;

/// Number of frames in the process frame pool (28 MiB worth).
pub const PROCESS_POOL_FRAMES: u32 = (28 * 1024 * 1024) / FRAME_SIZE;

/// First frame of the unusable region at 15 MiB.
pub const MEM_HOLE_START_FRAME: u32 = (15 * 1024 * 1024) / FRAME_SIZE;

/// Number of frames in the unusable region (1 MiB worth).
pub const MEM_HOLE_FRAMES: u32 = (1024 * 1024) / FRAME_SIZE;

/// Capacity of the frame pool registry.
pub const MAX_FRAME_POOLS: usize = 16;

/// Number of VM pools a single address space can track.
pub const MAX_VM_POOLS: usize = 16;

/// Region table capacity of a VM pool: one page worth of `(base, size)` pairs.
pub const REGIONS_PER_POOL: usize = FRAME_SIZE as usize / (2 * size_of::<u32>());

const _: () = {
    assert!(ENTRIES_PER_TABLE * size_of::<u32>() == FRAME_SIZE as usize);
    assert!(RECURSIVE_SLOT as usize == ENTRIES_PER_TABLE - 1);
    assert!(RECURSIVE_TABLES_BASE.as_u32() == 0xFFC0_0000);
    assert!(RECURSIVE_DIRECTORY.as_u32() == 0xFFFF_F000);
    assert!(SHARED_REGION_SIZE.is_multiple_of(FRAME_SIZE));
    assert!(PHYS_LOAD < KERNEL_POOL_START_FRAME * FRAME_SIZE);
    assert!(KERNEL_POOL_START_FRAME + KERNEL_POOL_FRAMES <= PROCESS_POOL_START_FRAME);
    assert!(MEM_HOLE_START_FRAME >= PROCESS_POOL_START_FRAME);
    assert!(MEM_HOLE_START_FRAME + MEM_HOLE_FRAMES <= PROCESS_POOL_START_FRAME + PROCESS_POOL_FRAMES);
    assert!(REGIONS_PER_POOL == 512);
};
