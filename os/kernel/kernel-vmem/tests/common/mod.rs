#![allow(dead_code)]

use core::mem::MaybeUninit;
use kernel_alloc::frame_alloc::{FramePool, FramePoolRegistry};
use kernel_info::memory::{
    KERNEL_POOL_FRAMES, KERNEL_POOL_START_FRAME, MEM_HOLE_FRAMES, MEM_HOLE_START_FRAME,
    PROCESS_POOL_FRAMES, PROCESS_POOL_START_FRAME, SHARED_REGION_SIZE,
};
use kernel_memory_addresses::{FrameNumber, VirtualAddress};
use kernel_vmem::simulated::SimulatedMachine;
use kernel_vmem::{AddressSpace, Paging, VmPool, VmPoolError};

pub type Space<'a> = AddressSpace<'a, SimulatedMachine>;
pub type Pool<'a> = VmPool<'a, SimulatedMachine>;

pub const PAGE: u32 = 4096;

/// Boots the default memory layout on a simulated 32 MiB machine: kernel pool
/// with a self-hosted bitmap, process pool with its bitmap in a kernel frame
/// and the 15 MiB hole reserved, one loaded address space, paging enabled.
pub fn boot<R>(f: impl for<'a> FnOnce(&'a SimulatedMachine, &'a Space<'a>) -> R) -> R {
    let machine = SimulatedMachine::new(PROCESS_POOL_START_FRAME + PROCESS_POOL_FRAMES);
    let kernel_pool = unsafe {
        FramePool::from_phys(&machine, FrameNumber::new(KERNEL_POOL_START_FRAME), KERNEL_POOL_FRAMES, None)
    }
    .unwrap();
    let info = kernel_pool.get_frames(1).unwrap();
    let process_pool = unsafe {
        FramePool::from_phys(
            &machine,
            FrameNumber::new(PROCESS_POOL_START_FRAME),
            PROCESS_POOL_FRAMES,
            Some(info),
        )
    }
    .unwrap();
    process_pool
        .mark_inaccessible(FrameNumber::new(MEM_HOLE_START_FRAME), MEM_HOLE_FRAMES)
        .unwrap();

    let registry = FramePoolRegistry::new();
    registry.register(&kernel_pool).unwrap();
    registry.register(&process_pool).unwrap();

    let paging = Paging::init_global(&machine, &registry, &kernel_pool, &process_pool, SHARED_REGION_SIZE).unwrap();
    let space = AddressSpace::new(&paging).unwrap();
    space.load();
    paging.enable_paging().unwrap();
    f(&machine, &space)
}

/// Creates a VM pool in leaked storage.
pub fn vm_pool<'a>(space: &'a Space<'a>, base: u32, size: u32) -> Result<&'a Pool<'a>, VmPoolError> {
    let slot: &'a mut MaybeUninit<Pool<'a>> = Box::leak(Box::new(MaybeUninit::uninit()));
    VmPool::new_in(
        slot,
        VirtualAddress::new(base),
        size,
        space.paging().process_pool(),
        space,
    )
}

/// `available_size + Σ region.size == size`.
pub fn assert_conserved(pool: &Pool<'_>) {
    let used: u32 = pool.regions().map(|r| r.size).sum();
    assert_eq!(pool.available_size() + used, pool.size());
}
