//! # Address spaces (i386, recursive page directory)
//!
//! An [`AddressSpace`] owns one page directory. Construction builds the
//! directory and the page tables of the shared region through the
//! [`PhysMapper`](kernel_alloc::phys_mapper::PhysMapper), because the new
//! space is not active yet. Everything after that (demand paging, unmapping)
//! works on the *current* space only and goes through the
//! [`RecursiveMapping`] window.
//!
//! ### Directory layout
//!
//! | Slot                 | Content |
//! |----------------------|---------|
//! | `0 .. n`             | identity map of the shared region (present, writable, supervisor) |
//! | `n .. 1023`          | not present (writable), filled on demand |
//! | `1023`               | the directory itself |
//!
//! ### Demand paging
//!
//! [`AddressSpace::handle_fault`] resolves a not-present fault by creating
//! the page table if needed (from the kernel pool) and backing the page with a
//! zero-filled frame from the process pool. Once a [`VmPool`] is registered,
//! only addresses inside one of its regions are backed.
//!
//! ### Examples
//! ```rust
//! # use kernel_alloc::frame_alloc::{FramePool, FramePoolRegistry};
//! # use kernel_memory_addresses::{FrameNumber, VirtualAddress};
//! # use kernel_vmem::simulated::{Access, SimulatedMachine};
//! # use kernel_vmem::{AddressSpace, FaultResolution, Paging};
//! let machine = SimulatedMachine::new(2048);
//! let kernel_pool = unsafe { FramePool::from_phys(&machine, FrameNumber::new(512), 512, None) }.unwrap();
//! let info = kernel_pool.get_frames(1).unwrap();
//! let process_pool = unsafe { FramePool::from_phys(&machine, FrameNumber::new(1024), 1024, Some(info)) }.unwrap();
//! let registry = FramePoolRegistry::new();
//! registry.register(&kernel_pool).unwrap();
//! registry.register(&process_pool).unwrap();
//!
//! let paging = Paging::init_global(&machine, &registry, &kernel_pool, &process_pool, 4 << 20).unwrap();
//! let space = AddressSpace::new(&paging).unwrap();
//! space.load();
//! paging.enable_paging().unwrap();
//!
//! let va = VirtualAddress::new(0x4000_0000);
//! let fault = machine.access(va, Access::WRITE).unwrap_err();
//! assert!(matches!(space.handle_fault(fault), Ok(FaultResolution::Mapped { table_created: true, .. })));
//! assert!(machine.access(va, Access::WRITE).is_ok());
//! ```

use crate::fault::{FaultError, FaultResolution, PageFault};
use crate::mmu::Mmu;
use crate::page_entry_bits::PageEntryBits;
use crate::page_table::pd::{PageDirectory, PdEntry, PdIndex};
use crate::page_table::pt::{PageTable, PtEntry, PtIndex};
use crate::page_table::pde_index;
use crate::paging::Paging;
use crate::recursive::{self, RecursiveMapping};
use crate::vm_pool::VmPool;
use kernel_alloc::frame_alloc::FrameAllocError;
use kernel_info::memory::{FRAME_SIZE, MAX_VM_POOLS, RECURSIVE_SLOT};
use kernel_memory_addresses::{
    FrameNumber, PageSize, PhysicalAddress, Size4K, Size4M, VirtualAddress, VirtualPage,
};
use kernel_sync::SpinMutex;
use log::{debug, error, trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AddressSpaceError {
    #[error("kernel pool exhausted while building an address space")]
    OutOfFrames,
    #[error("address space already has {MAX_VM_POOLS} VM pools")]
    TooManyPools,
    #[error("the address space is not the current one")]
    NotCurrent,
    #[error("paging is not enabled")]
    PagingDisabled,
    #[error("{0} lies in the shared region and cannot be freed")]
    SharedPage(VirtualAddress),
    #[error("{page} is backed by frame {frame} outside the process pool")]
    ForeignFrame {
        page: VirtualAddress,
        frame: FrameNumber,
    },
    #[error(transparent)]
    Release(#[from] FrameAllocError),
}

/// The VM pools of one address space, in registration order.
struct VmPools<'a, M: Mmu> {
    slots: [Option<&'a VmPool<'a, M>>; MAX_VM_POOLS],
    len: usize,
}

impl<M: Mmu> Clone for VmPools<'_, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<M: Mmu> Copy for VmPools<'_, M> {}

impl<'a, M: Mmu> VmPools<'a, M> {
    fn iter(&self) -> impl Iterator<Item = &'a VmPool<'a, M>> + '_ {
        self.slots[..self.len].iter().flatten().copied()
    }
}

pub struct AddressSpace<'a, M: Mmu> {
    paging: &'a Paging<'a, M>,
    directory: FrameNumber,
    pools: SpinMutex<VmPools<'a, M>>,
}

impl<'a, M: Mmu> AddressSpace<'a, M> {
    /// Builds a new address space with the shared region identity mapped.
    ///
    /// Takes one kernel-pool frame for the directory and one per page table
    /// of the shared region. The space is not loaded.
    ///
    /// # Errors
    /// [`AddressSpaceError::OutOfFrames`] if the kernel pool runs dry; every
    /// frame taken so far is returned.
    pub fn new(paging: &'a Paging<'a, M>) -> Result<Self, AddressSpaceError> {
        let kernel_pool = paging.kernel_pool();
        let mmu = paging.mmu();

        let Some(directory) = kernel_pool.get_frames(1) else {
            error!("no kernel frame for a page directory");
            return Err(AddressSpaceError::OutOfFrames);
        };

        // SAFETY: The frame was just handed out by the kernel pool, which lies
        // in memory the mapper reaches, and nothing else refers to it yet.
        let dir: &mut PageDirectory = unsafe { mmu.phys_to_mut(directory.base()) };
        dir.fill(PdEntry::absent());

        let shared = paging.shared_size();
        for (slot, d) in PdIndex::all().zip(0..paging.shared_tables()) {
            let Some(table_frame) = kernel_pool.get_frames(1) else {
                error!("no kernel frame for shared page table {d}");
                Self::unwind(paging, dir, directory);
                return Err(AddressSpaceError::OutOfFrames);
            };

            // SAFETY: As for the directory.
            let table: &mut PageTable = unsafe { mmu.phys_to_mut(table_frame.base()) };
            for (entry, t) in PtIndex::all().zip(0u32..) {
                let addr = d * Size4M::SIZE + t * FRAME_SIZE;
                let pte = if addr < shared {
                    PtEntry::make_4k(FrameNumber::containing(PhysicalAddress::new(addr)), PageEntryBits::new_kernel_rw())
                } else {
                    PtEntry::zero()
                };
                table.set(entry, pte);
            }
            dir.set(slot, PdEntry::make_table(table_frame, PageEntryBits::new_kernel_rw()));
        }

        dir.set(
            PdIndex::new(RECURSIVE_SLOT),
            PdEntry::make_table(directory, PageEntryBits::new_kernel_rw()),
        );

        debug!(
            "address space: directory {directory}, {} shared tables for {shared} bytes",
            paging.shared_tables()
        );

        Ok(Self {
            paging,
            directory,
            pools: SpinMutex::new(VmPools {
                slots: [None; MAX_VM_POOLS],
                len: 0,
            }),
        })
    }

    /// Returns the directory and the tables installed so far to the kernel pool.
    fn unwind(paging: &Paging<'a, M>, dir: &PageDirectory, directory: FrameNumber) {
        let kernel_pool = paging.kernel_pool();
        for slot in PdIndex::all() {
            if let Some(table) = dir.get(slot).table_frame()
                && let Err(e) = kernel_pool.release_frames(table)
            {
                warn!("leaking shared table {table}: {e}");
            }
        }
        if let Err(e) = kernel_pool.release_frames(directory) {
            warn!("leaking page directory {directory}: {e}");
        }
    }

    /// Makes this the current address space.
    ///
    /// Loading the translation root flushes all cached translations, also
    /// when this space is already current.
    pub fn load(&self) {
        // SAFETY: The directory maps the shared region and itself, which is
        // everything the kernel needs to keep running.
        unsafe { self.paging.mmu().load_directory(self.directory.base()) };
        self.paging.set_current(self.directory);
        trace!("loaded page directory {}", self.directory);
    }

    #[inline]
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.paging.current_directory() == Some(self.directory)
    }

    /// Frame holding the page directory.
    #[inline]
    #[must_use]
    pub const fn directory_frame(&self) -> FrameNumber {
        self.directory
    }

    #[inline]
    #[must_use]
    pub const fn paging(&self) -> &'a Paging<'a, M> {
        self.paging
    }

    /// Adds `pool` to the pools consulted by [`handle_fault`](Self::handle_fault).
    ///
    /// # Errors
    /// [`AddressSpaceError::TooManyPools`] if all slots are taken.
    pub fn register_pool(&self, pool: &'a VmPool<'a, M>) -> Result<(), AddressSpaceError> {
        let mut pools = self.pools.lock_irq();
        let len = pools.len;
        if len == MAX_VM_POOLS {
            error!("cannot register VM pool at {}: all {MAX_VM_POOLS} slots taken", pool.base_address());
            return Err(AddressSpaceError::TooManyPools);
        }
        pools.slots[len] = Some(pool);
        pools.len += 1;
        debug!("registered VM pool at {} in slot {len}", pool.base_address());
        Ok(())
    }

    /// Number of registered VM pools.
    #[must_use]
    pub fn vm_pool_count(&self) -> usize {
        self.pools.lock_irq().len
    }

    /// Resolves a page fault in this (current) address space.
    ///
    /// # Errors
    /// - [`FaultError::ProtectionViolation`] if the page was present.
    /// - [`FaultError::PagingDisabled`] / [`FaultError::NotCurrent`] if this
    ///   space does not translate right now.
    /// - [`FaultError::WindowFault`] for addresses in the recursive window.
    /// - [`FaultError::IllegalAddress`] if VM pools are registered and none
    ///   of them claims the address.
    /// - [`FaultError::OutOfTableFrames`] / [`FaultError::OutOfFrames`] if a
    ///   pool is exhausted. Nothing is installed in that case.
    pub fn handle_fault(&self, fault: PageFault) -> Result<FaultResolution, FaultError> {
        let PageFault { address, error } = fault;
        trace!("page fault at {address}: {}", error.explain());

        if error.present() {
            error!("protection violation at {address}: {}", error.explain());
            return Err(FaultError::ProtectionViolation { address, error });
        }
        self.check_backable(address)?;

        let pools = *self.pools.lock_irq();
        if pools.len > 0 && !pools.iter().any(|p| p.is_legitimate(address)) {
            error!("fault at {address} outside every VM pool region");
            return Err(FaultError::IllegalAddress(address));
        }

        self.install_page(address)
    }

    /// Backs the page of `address` like a not-present fault would, without
    /// asking the VM pools.
    ///
    /// Used for the region table page of a new [`VmPool`], which is not
    /// registered yet when its first page is needed.
    pub(crate) fn back_page(&self, address: VirtualAddress) -> Result<FaultResolution, FaultError> {
        self.check_backable(address)?;
        self.install_page(address)
    }

    fn check_backable(&self, address: VirtualAddress) -> Result<(), FaultError> {
        if !self.paging.is_enabled() {
            return Err(FaultError::PagingDisabled);
        }
        if !self.is_current() {
            return Err(FaultError::NotCurrent);
        }
        if recursive::is_window(address) {
            error!("fault at {address} inside the recursive window");
            return Err(FaultError::WindowFault(address));
        }
        Ok(())
    }

    /// Installs a table (if needed) and a zero-filled process frame for
    /// `address` in the current space.
    fn install_page(&self, address: VirtualAddress) -> Result<FaultResolution, FaultError> {
        let window = RecursiveMapping::new(self.paging.mmu());

        // SAFETY: This space is current with paging on, so the window maps
        // its directory.
        let pde = unsafe { window.directory_entry_for(address) };
        let table_created = if pde.is_present() {
            false
        } else {
            let Some(frame) = self.paging.kernel_pool().get_frames(1) else {
                warn!("no kernel frame for the page table of {address}");
                return Err(FaultError::OutOfTableFrames);
            };
            *pde = PdEntry::make_table(frame, PageEntryBits::new_kernel_rw());
            // SAFETY: The entry above makes the table visible in the window.
            unsafe { window.table_for(pde_index(address)) }.clear();
            trace!("created page table {frame} for slot {}", pde_index(address).as_u16());
            true
        };

        // SAFETY: The directory entry for `address` is present.
        let pte = unsafe { window.table_entry_for(address) };
        if pte.is_present() {
            self.load();
            trace!("spurious fault at {address}: already mapped");
            return Ok(FaultResolution::Spurious);
        }

        let Some(frame) = self.paging.process_pool().get_frames(1) else {
            warn!("no process frame for {address}");
            if table_created {
                self.drop_table(address, pde);
            }
            return Err(FaultError::OutOfFrames(address));
        };
        *pte = PtEntry::make_4k(frame, PageEntryBits::new_kernel_rw());

        let page = VirtualPage::<Size4K>::containing_address(address);
        // SAFETY: The page was mapped just above and nothing else refers to it.
        let bytes: &mut [u8; FRAME_SIZE as usize] = unsafe { self.paging.mmu().virt_to_mut(page.base()) };
        bytes.fill(0);

        trace!("mapped {page} to {frame}");
        Ok(FaultResolution::Mapped { frame, table_created })
    }

    /// Takes back a page table created for a fault that could not be served.
    fn drop_table(&self, address: VirtualAddress, pde: &mut PdEntry) {
        let Some(table) = pde.table_frame() else {
            return;
        };
        *pde = PdEntry::absent();
        self.load();
        if let Err(e) = self.paging.kernel_pool().release_frames(table) {
            warn!("leaking page table {table} of {address}: {e}");
        }
    }

    /// Unmaps `page` and returns its frame to the process pool.
    ///
    /// Returns `Ok(false)` if the page was not mapped. Cached translations
    /// are flushed after a successful unmap.
    ///
    /// # Errors
    /// - [`AddressSpaceError::PagingDisabled`] / [`AddressSpaceError::NotCurrent`]
    ///   if the window does not show this space.
    /// - [`AddressSpaceError::SharedPage`] for pages of the identity-mapped
    ///   shared region.
    /// - [`AddressSpaceError::ForeignFrame`] if the page is backed by a frame
    ///   the process pool does not own.
    /// - [`AddressSpaceError::Release`] if the frame is not the head of a run.
    ///
    /// The mapping is left in place on error.
    pub fn free_page(&self, page: VirtualPage<Size4K>) -> Result<bool, AddressSpaceError> {
        self.ensure_active()?;
        let va = page.base();
        if va.as_u32() < self.paging.shared_size() {
            error!("refusing to free shared page {page}");
            return Err(AddressSpaceError::SharedPage(va));
        }
        if recursive::is_window(va) {
            return Ok(false);
        }

        let window = RecursiveMapping::new(self.paging.mmu());
        // SAFETY: Current and enabled, checked above.
        if !unsafe { window.directory_entry_for(va) }.is_present() {
            return Ok(false);
        }
        // SAFETY: The directory entry is present.
        let pte = unsafe { window.table_entry_for(va) };
        let Some((frame, _)) = pte.page_4k() else {
            return Ok(false);
        };

        let process_pool = self.paging.process_pool();
        if !process_pool.contains(frame) {
            error!("{page} is backed by {frame}, which the process pool does not own");
            return Err(AddressSpaceError::ForeignFrame { page: va, frame });
        }
        process_pool.release_frames(frame)?;
        *pte = PtEntry::zero();
        self.load();
        trace!("unmapped {page}, released {frame}");
        Ok(true)
    }

    /// Physical address `va` translates to in this space.
    ///
    /// Walks the tables through the recursive window, so it answers `None`
    /// unless this space is current and paging is on.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.ensure_active().ok()?;
        let window = RecursiveMapping::new(self.paging.mmu());
        // SAFETY: Current and enabled, checked above.
        unsafe { window.directory_entry_for(va) }.table_frame()?;
        // SAFETY: The directory entry is present.
        let (frame, _) = unsafe { window.table_entry_for(va) }.page_4k()?;
        Some(frame.base() + va.offset::<Size4K>().as_u32())
    }

    pub(crate) fn ensure_active(&self) -> Result<(), AddressSpaceError> {
        if !self.paging.is_enabled() {
            return Err(AddressSpaceError::PagingDisabled);
        }
        if !self.is_current() {
            return Err(AddressSpaceError::NotCurrent);
        }
        Ok(())
    }
}

impl<M: Mmu> core::fmt::Debug for AddressSpace<'_, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("directory", &self.directory)
            .field("vm_pools", &self.vm_pool_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::PageFaultError;
    use crate::simulated::{Access, SimulatedMachine};
    use kernel_alloc::frame_alloc::{FramePool, FramePoolRegistry, FrameState};

    const SHARED: u32 = 4 << 20;

    /// 8 MiB machine: kernel pool in frames 512..1024, process pool in 1024..2048.
    fn with_space<R>(f: impl for<'a> FnOnce(&'a SimulatedMachine, &'a AddressSpace<'a, SimulatedMachine>) -> R) -> R {
        let machine = SimulatedMachine::new(2048);
        let kernel_pool = unsafe { FramePool::from_phys(&machine, FrameNumber::new(512), 512, None) }.unwrap();
        let info = kernel_pool.get_frames(1).unwrap();
        let process_pool = unsafe { FramePool::from_phys(&machine, FrameNumber::new(1024), 1024, Some(info)) }.unwrap();
        let registry = FramePoolRegistry::new();
        registry.register(&kernel_pool).unwrap();
        registry.register(&process_pool).unwrap();
        let paging = Paging::init_global(&machine, &registry, &kernel_pool, &process_pool, SHARED).unwrap();
        let space = AddressSpace::new(&paging).unwrap();
        space.load();
        paging.enable_paging().unwrap();
        f(&machine, &space)
    }

    fn not_present(va: u32) -> PageFault {
        PageFault::new(VirtualAddress::new(va), PageFaultError::new())
    }

    #[test]
    fn shared_region_is_identity_mapped() {
        with_space(|machine, space| {
            for va in [0u32, 0x1234, 0x0020_0000, SHARED - 4] {
                let va = VirtualAddress::new(va);
                assert_eq!(space.translate(va), Some(PhysicalAddress::new(va.as_u32())));
                assert_eq!(machine.access(va, Access::WRITE), Ok(PhysicalAddress::new(va.as_u32())));
            }
            assert!(machine.access(VirtualAddress::new(SHARED), Access::READ).is_err());
            assert!(machine.access(VirtualAddress::new(0x10), Access::USER_READ).is_err());
        });
    }

    #[test]
    fn directory_is_visible_through_window() {
        with_space(|machine, space| {
            let dir_base = space.directory_frame().base();
            let slot = recursive::directory_entry_address(VirtualAddress::new(0xFFC0_0000));
            assert_eq!(machine.access(slot, Access::READ), Ok(dir_base + 4 * 1023));
            assert_eq!(space.translate(recursive::directory_address()), Some(dir_base));
        });
    }

    #[test]
    fn fault_creates_table_then_reuses_it() {
        with_space(|machine, space| {
            let kernel_free = space.paging().kernel_pool().free_count();
            let process_free = space.paging().process_pool().free_count();

            let first = space.handle_fault(not_present(0x4000_0000)).unwrap();
            let FaultResolution::Mapped { frame, table_created: true } = first else {
                panic!("unexpected resolution {first:?}");
            };
            assert!(space.paging().process_pool().contains(frame));
            assert_eq!(space.paging().kernel_pool().free_count(), kernel_free - 1);
            assert_eq!(space.paging().process_pool().free_count(), process_free - 1);

            let second = space.handle_fault(not_present(0x4000_1000)).unwrap();
            assert!(matches!(second, FaultResolution::Mapped { table_created: false, .. }));
            assert_eq!(space.paging().kernel_pool().free_count(), kernel_free - 1);

            assert_eq!(space.translate(VirtualAddress::new(0x4000_0010)), Some(frame.base() + 0x10));
            assert!(machine.access(VirtualAddress::new(0x4000_0010), Access::WRITE).is_ok());
        });
    }

    #[test]
    fn faulted_page_is_zero_filled() {
        with_space(|machine, space| {
            let va = VirtualAddress::new(0x0800_0000);
            space.handle_fault(not_present(va.as_u32())).unwrap();
            machine.write_u32(va + 8, 0xFEED_F00D).unwrap();
            assert!(space.free_page(va.page()).unwrap());

            // The next fault gets the same (lowest free) frame, cleaned.
            space.handle_fault(not_present(va.as_u32())).unwrap();
            assert_eq!(machine.read_u32(va + 8), Ok(0));
        });
    }

    #[test]
    fn protection_violation_is_fatal() {
        with_space(|_, space| {
            let fault = PageFault::new(VirtualAddress::new(0x1000), PageFaultError::new().with_present(true).with_user(true));
            assert!(matches!(space.handle_fault(fault), Err(FaultError::ProtectionViolation { .. })));
        });
    }

    #[test]
    fn window_fault_is_fatal() {
        with_space(|_, space| {
            assert_eq!(
                space.handle_fault(not_present(0xFFC0_4000)),
                Err(FaultError::WindowFault(VirtualAddress::new(0xFFC0_4000)))
            );
        });
    }

    #[test]
    fn mapped_page_fault_is_spurious() {
        with_space(|machine, space| {
            space.handle_fault(not_present(0x4000_0000)).unwrap();
            let loads = machine.root_loads();
            let free = space.paging().process_pool().free_count();
            assert_eq!(space.handle_fault(not_present(0x4000_0004)), Ok(FaultResolution::Spurious));
            assert_eq!(machine.root_loads(), loads + 1);
            assert_eq!(space.paging().process_pool().free_count(), free);
        });
    }

    #[test]
    fn process_pool_exhaustion_leaves_nothing_behind() {
        with_space(|_, space| {
            let process_pool = space.paging().process_pool();
            let rest = process_pool.get_frames(process_pool.free_count()).unwrap();
            let kernel_free = space.paging().kernel_pool().free_count();

            let va = VirtualAddress::new(0x4000_0000);
            assert_eq!(space.handle_fault(not_present(va.as_u32())), Err(FaultError::OutOfFrames(va)));
            assert_eq!(space.paging().kernel_pool().free_count(), kernel_free);
            assert_eq!(space.translate(va), None);

            process_pool.release_frames(rest).unwrap();
        });
    }

    #[test]
    fn free_page_of_unmapped_page_is_a_no_op() {
        with_space(|_, space| {
            assert_eq!(space.free_page(VirtualAddress::new(0x4000_0000).page()), Ok(false));
            space.handle_fault(not_present(0x4000_0000)).unwrap();
            assert_eq!(space.free_page(VirtualAddress::new(0x4000_1000).page()), Ok(false));
        });
    }

    #[test]
    fn free_page_releases_frame_and_flushes() {
        with_space(|machine, space| {
            let va = VirtualAddress::new(0x4000_0000);
            let Ok(FaultResolution::Mapped { frame, .. }) = space.handle_fault(not_present(va.as_u32())) else {
                panic!("fault not resolved");
            };
            machine.access(va, Access::WRITE).unwrap();

            assert_eq!(space.free_page(va.page()), Ok(true));
            assert_eq!(space.paging().process_pool().state_of(frame), Some(FrameState::Free));
            let fault = machine.access(va, Access::READ).unwrap_err();
            assert!(!fault.error.present());
        });
    }

    #[test]
    fn shared_pages_cannot_be_freed() {
        with_space(|_, space| {
            let directory = space.directory_frame();
            let va = VirtualAddress::new(directory.base().as_u32());
            assert_eq!(space.free_page(va.page()), Err(AddressSpaceError::SharedPage(va)));
            assert_eq!(space.paging().kernel_pool().state_of(directory), Some(FrameState::HeadOfSequence));
            assert_eq!(space.translate(va), Some(directory.base()));
        });
    }

    #[test]
    fn pages_backed_outside_the_process_pool_are_kept() {
        with_space(|_, space| {
            let va = VirtualAddress::new(0x4000_0000);
            space.handle_fault(not_present(va.as_u32())).unwrap();

            let kernel_pool = space.paging().kernel_pool();
            let foreign = kernel_pool.get_frames(1).unwrap();
            let window = RecursiveMapping::new(space.paging().mmu());
            *unsafe { window.table_entry_for(va) } = PtEntry::make_4k(foreign, PageEntryBits::new_kernel_rw());
            space.load();

            assert_eq!(
                space.free_page(va.page()),
                Err(AddressSpaceError::ForeignFrame { page: va, frame: foreign })
            );
            assert_eq!(kernel_pool.state_of(foreign), Some(FrameState::HeadOfSequence));
            assert_eq!(space.translate(va), Some(foreign.base()));
        });
    }

    #[test]
    fn inactive_space_refuses_work() {
        with_space(|_, space| {
            let other = AddressSpace::new(space.paging()).unwrap();
            assert!(!other.is_current());
            assert_eq!(other.handle_fault(not_present(0x4000_0000)), Err(FaultError::NotCurrent));
            assert_eq!(other.free_page(VirtualAddress::new(0x4000_0000).page()), Err(AddressSpaceError::NotCurrent));
            assert_eq!(other.translate(VirtualAddress::new(0)), None);

            other.load();
            assert!(other.is_current() && !space.is_current());
            assert_eq!(other.translate(VirtualAddress::new(0x1000)), Some(PhysicalAddress::new(0x1000)));
        });
    }

    #[test]
    fn kernel_pool_exhaustion_during_construction_rolls_back() {
        with_space(|_, space| {
            let kernel_pool = space.paging().kernel_pool();
            // Leave exactly one frame: enough for a directory, not for its table.
            let rest = kernel_pool.get_frames(kernel_pool.free_count() - 1).unwrap();
            assert_eq!(AddressSpace::new(space.paging()).unwrap_err(), AddressSpaceError::OutOfFrames);
            assert_eq!(kernel_pool.free_count(), 1);
            kernel_pool.release_frames(rest).unwrap();
        });
    }
}
