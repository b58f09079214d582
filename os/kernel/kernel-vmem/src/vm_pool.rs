//! # Virtual memory pools
//!
//! A [`VmPool`] hands out page-granular regions of a fixed virtual range.
//! Allocation only records the region; frames arrive later through demand
//! paging, which consults [`VmPool::is_legitimate`] to decide whether a
//! faulting address belongs to anybody. Releasing a region unmaps its pages
//! and returns their frames.
//!
//! ### Semantics
//! - Region 0 always covers the first page of the pool and is never released.
//! - New regions are placed right after the last region (bump pointer). Space
//!   freed in the middle is counted in [`available_size`](VmPool::available_size)
//!   but only reused once every region after it is gone.
//! - The region table holds [`REGIONS_PER_POOL`] entries and lives in the
//!   pool's first page. Construction backs that page with one process frame,
//!   so the address space must be current with paging on. Every later table
//!   access goes through the current translation as well.
//!
//! ### Invariants
//! - Regions are sorted by base address and do not overlap.
//! - `available_size() + Σ region.size == size()`.
//!
//! ### Examples
//! ```rust
//! # use core::mem::MaybeUninit;
//! # use kernel_alloc::frame_alloc::{FramePool, FramePoolRegistry};
//! # use kernel_memory_addresses::{FrameNumber, VirtualAddress};
//! # use kernel_vmem::simulated::SimulatedMachine;
//! # use kernel_vmem::{AddressSpace, Paging, VmPool};
//! # let machine = SimulatedMachine::new(2048);
//! # let kernel_pool = unsafe { FramePool::from_phys(&machine, FrameNumber::new(512), 512, None) }.unwrap();
//! # let info = kernel_pool.get_frames(1).unwrap();
//! # let process_pool = unsafe { FramePool::from_phys(&machine, FrameNumber::new(1024), 1024, Some(info)) }.unwrap();
//! # let registry = FramePoolRegistry::new();
//! # let paging = Paging::init_global(&machine, &registry, &kernel_pool, &process_pool, 4 << 20).unwrap();
//! # let space = AddressSpace::new(&paging).unwrap();
//! # space.load();
//! # paging.enable_paging().unwrap();
//! let mut slot = MaybeUninit::uninit();
//! let pool = VmPool::new_in(&mut slot, VirtualAddress::new(0x4000_0000), 16 * 4096, &process_pool, &space).unwrap();
//!
//! let a = pool.allocate(100).unwrap();
//! assert_eq!(a, VirtualAddress::new(0x4000_1000));
//! assert_eq!(pool.available_size(), 14 * 4096);
//! assert!(pool.is_legitimate(a + 4095));
//! assert!(space.translate(VirtualAddress::new(0x4000_0000)).is_some());
//! ```

use crate::address_space::{AddressSpace, AddressSpaceError};
use crate::fault::FaultError;
use crate::mmu::Mmu;
use crate::recursive;
use core::mem::MaybeUninit;
use kernel_alloc::frame_alloc::FramePool;
use kernel_info::memory::{FRAME_SIZE, REGIONS_PER_POOL};
use kernel_memory_addresses::{Size4K, VirtualAddress, VirtualPage};
use kernel_sync::SpinMutex;
use log::{debug, error, trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmPoolError {
    #[error("VM pool base {0} is not page aligned")]
    Misaligned(VirtualAddress),
    #[error("VM pool size {0} is not a multiple of the page size above one page")]
    InvalidSize(u32),
    #[error("VM pool {base}..+{size} overlaps the shared region or the recursive window")]
    InvalidRange { base: VirtualAddress, size: u32 },
    #[error("cannot allocate {requested} bytes, {available} bytes available")]
    OutOfSpace { requested: u32, available: u32 },
    #[error("region table is full ({REGIONS_PER_POOL} regions)")]
    RegionTableFull,
    #[error("{0} is not inside any region of the pool")]
    NotLegitimate(VirtualAddress),
    #[error("no releasable region starts at {0}")]
    NoSuchRegion(VirtualAddress),
    #[error(transparent)]
    AddressSpace(#[from] AddressSpaceError),
    #[error("cannot back the region table: {0}")]
    TablePage(#[from] FaultError),
}

/// One allocated range of a [`VmPool`].
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Region {
    pub base: VirtualAddress,
    pub size: u32,
}

const _: () = assert!(size_of::<Region>() * REGIONS_PER_POOL == FRAME_SIZE as usize);

impl Region {
    const EMPTY: Self = Self {
        base: VirtualAddress::new(0),
        size: 0,
    };

    /// One past the last byte, widened so the top of memory does not wrap.
    #[inline]
    #[must_use]
    pub fn end(self) -> u64 {
        u64::from(self.base.as_u32()) + u64::from(self.size)
    }

    /// Whether `va` lies in `base ..= base + size`.
    ///
    /// The upper bound is inclusive: the first byte after a region still
    /// counts as part of it.
    #[inline]
    #[must_use]
    pub fn contains(self, va: VirtualAddress) -> bool {
        let va = u64::from(va.as_u32());
        u64::from(self.base.as_u32()) <= va && va <= self.end()
    }
}

/// The region table as laid out in the pool's first page.
type RegionPage = [Region; REGIONS_PER_POOL];

/// Table bookkeeping guarded by the pool lock.
struct TableState {
    len: usize,
    available: u32,
}

pub struct VmPool<'a, M: Mmu> {
    base: VirtualAddress,
    size: u32,
    frame_pool: &'a FramePool<'a>,
    address_space: &'a AddressSpace<'a, M>,
    state: SpinMutex<TableState>,
}

impl<'a, M: Mmu> VmPool<'a, M> {
    /// Creates a pool over `base_address .. base_address + size` in `slot`
    /// and registers it with `address_space`.
    ///
    /// The address space keeps a reference to the pool, so the pool lives in
    /// caller-provided storage instead of being returned by value.
    ///
    /// # Errors
    /// - [`VmPoolError::Misaligned`] if `base_address` is not page aligned.
    /// - [`VmPoolError::InvalidSize`] unless `size` is a multiple of the page
    ///   size and larger than one page.
    /// - [`VmPoolError::InvalidRange`] if the range wraps, reaches into the
    ///   shared region or into the recursive window.
    /// - [`VmPoolError::TablePage`] if the first page cannot be backed, for
    ///   example because the address space is not current.
    /// - [`VmPoolError::AddressSpace`] if the address space has no free
    ///   pool slot. The table page is released again.
    pub fn new_in(
        slot: &'a mut MaybeUninit<Self>,
        base_address: VirtualAddress,
        size: u32,
        frame_pool: &'a FramePool<'a>,
        address_space: &'a AddressSpace<'a, M>,
    ) -> Result<&'a Self, VmPoolError> {
        if !base_address.is_aligned::<Size4K>() {
            error!("VM pool base {base_address} is not page aligned");
            return Err(VmPoolError::Misaligned(base_address));
        }
        if size <= FRAME_SIZE || !size.is_multiple_of(FRAME_SIZE) {
            error!("VM pool at {base_address}: invalid size {size}");
            return Err(VmPoolError::InvalidSize(size));
        }
        let valid = base_address.as_u32() >= address_space.paging().shared_size()
            && base_address
                .checked_add(size - 1)
                .is_some_and(|last| !recursive::is_window(last));
        if !valid {
            error!("VM pool {base_address}..+{size} overlaps reserved memory");
            return Err(VmPoolError::InvalidRange {
                base: base_address,
                size,
            });
        }

        address_space.back_page(base_address)?;
        // SAFETY: The page was just backed in the current space and no pool
        // refers to it yet.
        let entries: &mut RegionPage = unsafe { address_space.paging().mmu().virt_to_mut(base_address) };
        entries[0] = Region {
            base: base_address,
            size: FRAME_SIZE,
        };

        let pool: &'a Self = slot.write(Self {
            base: base_address,
            size,
            frame_pool,
            address_space,
            state: SpinMutex::new(TableState {
                len: 1,
                available: size - FRAME_SIZE,
            }),
        });
        if let Err(e) = address_space.register_pool(pool) {
            if let Err(undo) = address_space.free_page(base_address.page()) {
                warn!("leaking region table page at {base_address}: {undo}");
            }
            return Err(e.into());
        }

        debug!("VM pool {base_address}..+{size} backed by frame pool {}", frame_pool.base_frame_no());
        Ok(pool)
    }

    /// Reserves a region of at least `size` bytes and returns its base.
    ///
    /// The size is rounded up to whole pages. No memory is mapped; the pages
    /// are backed on first access.
    ///
    /// # Errors
    /// - [`VmPoolError::OutOfSpace`] if `size` is zero, exceeds the available
    ///   size, or does not fit after the last region.
    /// - [`VmPoolError::RegionTableFull`] if no region entry is left.
    /// - [`VmPoolError::AddressSpace`] if the address space is not active.
    pub fn allocate(&self, size: u32) -> Result<VirtualAddress, VmPoolError> {
        let mut state = self.state.lock_irq();
        self.address_space.ensure_active()?;
        let available = state.available;
        let out_of_space = VmPoolError::OutOfSpace {
            requested: size,
            available,
        };

        let Some(rounded) = size
            .checked_next_multiple_of(FRAME_SIZE)
            .filter(|&r| r != 0 && r <= available)
        else {
            error!("VM pool {}: {out_of_space}", self.base);
            return Err(out_of_space);
        };

        let len = state.len;
        if len == REGIONS_PER_POOL {
            error!("VM pool {}: region table full", self.base);
            return Err(VmPoolError::RegionTableFull);
        }

        // SAFETY: Lock held and the space is active.
        let entries = unsafe { self.table_page() };
        let start = entries[len - 1].end();
        let pool_end = u64::from(self.base.as_u32()) + u64::from(self.size);
        if start + u64::from(rounded) > pool_end {
            error!("VM pool {}: no room after the last region for {rounded} bytes", self.base);
            return Err(out_of_space);
        }

        // Below `pool_end`, which fits in 32 bits.
        #[allow(clippy::cast_possible_truncation)]
        let base = VirtualAddress::new(start as u32);
        entries[len] = Region { base, size: rounded };
        state.len += 1;
        state.available -= rounded;

        trace!("VM pool {}: allocated {base}..+{rounded}", self.base);
        Ok(base)
    }

    /// Releases the region starting at `start` and returns how many of its
    /// pages were mapped.
    ///
    /// Every page of the region is unmapped and its frame released; the
    /// address space is reloaded afterwards.
    ///
    /// # Errors
    /// - [`VmPoolError::NotLegitimate`] if `start` is not inside a region.
    /// - [`VmPoolError::NoSuchRegion`] if no region other than the first
    ///   starts exactly at `start`.
    /// - [`VmPoolError::AddressSpace`] if the address space is not current
    ///   or a frame cannot be released.
    pub fn release(&self, start: VirtualAddress) -> Result<u32, VmPoolError> {
        self.address_space.ensure_active()?;
        if !self.is_legitimate(start) {
            error!("VM pool {}: release of {start} outside every region", self.base);
            return Err(VmPoolError::NotLegitimate(start));
        }

        let mut state = self.state.lock_irq();
        // SAFETY: Lock held and the space is active.
        let entries = unsafe { self.table_page() };
        let Some(index) = (1..state.len).find(|&i| entries[i].base == start) else {
            error!("VM pool {}: no region starts at {start}", self.base);
            return Err(VmPoolError::NoSuchRegion(start));
        };
        let region = entries[index];

        let mut mapped = 0;
        let mut page = VirtualPage::<Size4K>::containing_address(region.base);
        for _ in 0..region.size / FRAME_SIZE {
            if self.address_space.free_page(page)? {
                mapped += 1;
            }
            let Some(next) = page.next() else {
                break;
            };
            page = next;
        }

        let len = state.len;
        entries.copy_within(index + 1..len, index);
        state.len -= 1;
        state.available += region.size;
        drop(state);

        self.address_space.load();
        trace!("VM pool {}: released {start}..+{}, {mapped} pages were mapped", self.base, region.size);
        Ok(mapped)
    }

    /// Whether `address` lies in one of the pool's regions.
    ///
    /// Each region counts with an inclusive upper bound, see
    /// [`Region::contains`]. `false` while the address space is not active,
    /// because the table is out of reach then.
    #[must_use]
    pub fn is_legitimate(&self, address: VirtualAddress) -> bool {
        let state = self.state.lock_irq();
        if self.address_space.ensure_active().is_err() {
            return false;
        }
        // SAFETY: Lock held and the space is active.
        let entries = unsafe { self.table_page() };
        entries[..state.len].iter().any(|r| r.contains(address))
    }

    #[inline]
    #[must_use]
    pub const fn base_address(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Bytes not covered by any region.
    #[must_use]
    pub fn available_size(&self) -> u32 {
        self.state.lock_irq().available
    }

    /// Number of regions, including the first page.
    #[must_use]
    pub fn region_count(&self) -> usize {
        self.state.lock_irq().len
    }

    /// A snapshot of the regions in address order.
    ///
    /// Empty while the address space is not active.
    pub fn regions(&self) -> impl Iterator<Item = Region> + use<'a, M> {
        let state = self.state.lock_irq();
        let snapshot: RegionPage = if self.address_space.ensure_active().is_ok() {
            // SAFETY: Lock held and the space is active.
            *unsafe { self.table_page() }
        } else {
            [Region::EMPTY; REGIONS_PER_POOL]
        };
        snapshot.into_iter().take(state.len)
    }

    /// The frame pool this pool was created with.
    #[inline]
    #[must_use]
    pub const fn frame_pool(&self) -> &'a FramePool<'a> {
        self.frame_pool
    }

    #[inline]
    #[must_use]
    pub const fn address_space(&self) -> &'a AddressSpace<'a, M> {
        self.address_space
    }

    /// The region table in the pool's first page.
    ///
    /// # Safety
    /// The pool lock must be held while the reference is used, and the
    /// address space must be current with paging on.
    unsafe fn table_page(&self) -> &'a mut RegionPage {
        // SAFETY: The first page is backed in `new_in` and never released;
        // the rest is forwarded from the caller.
        unsafe { self.address_space.paging().mmu().virt_to_mut(self.base) }
    }
}

impl<M: Mmu> core::fmt::Debug for VmPool<'_, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmPool")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("available", &self.available_size())
            .field("regions", &self.region_count())
            .finish_non_exhaustive()
    }
}
