//! # Process-wide paging state
//!
//! [`Paging`] bundles what every [`AddressSpace`](crate::AddressSpace) needs
//! to know about the machine:
//!
//! - the [`Mmu`] that performs translation,
//! - the *kernel pool*, which supplies page directories and page tables,
//! - the *process pool*, which supplies the frames behind demand-paged memory,
//! - the frame pool registry used to release frames by number,
//! - the size of the shared region identity-mapped into every address space.
//!
//! It also records which page directory is current and whether translation
//! has been switched on. Both transitions happen once during boot.
//!
//! ### Semantics
//! - The shared region starts at address zero and is rounded up to whole
//!   pages. It must stay below the recursive window at `0xFFC0_0000`.
//! - [`Paging::enable_paging`] is idempotent.

use crate::mmu::Mmu;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_alloc::frame_alloc::{FramePool, FramePoolRegistry};
use kernel_info::memory::{FRAME_SIZE, RECURSIVE_TABLES_BASE};
use kernel_memory_addresses::{FrameNumber, PageSize, Size4M};
use kernel_sync::SpinMutex;
use log::{debug, error};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    #[error("shared region of {0} bytes reaches into the recursive window")]
    SharedRegionTooLarge(u32),
    #[error("paging cannot be enabled before a page directory is loaded")]
    NoDirectoryLoaded,
}

pub struct Paging<'a, M: Mmu> {
    mmu: &'a M,
    frame_pools: &'a FramePoolRegistry<'a>,
    kernel_pool: &'a FramePool<'a>,
    process_pool: &'a FramePool<'a>,
    shared_size: u32,
    current: SpinMutex<Option<FrameNumber>>,
    enabled: AtomicBool,
}

impl<'a, M: Mmu> Paging<'a, M> {
    /// Sets up the paging configuration.
    ///
    /// `shared_region_size` is rounded up to a multiple of the page size.
    ///
    /// # Errors
    /// [`PagingError::SharedRegionTooLarge`] if the rounded shared region
    /// would overlap the recursive window.
    pub fn init_global(
        mmu: &'a M,
        frame_pools: &'a FramePoolRegistry<'a>,
        kernel_pool: &'a FramePool<'a>,
        process_pool: &'a FramePool<'a>,
        shared_region_size: u32,
    ) -> Result<Self, PagingError> {
        let shared_size = shared_region_size
            .checked_next_multiple_of(FRAME_SIZE)
            .filter(|&size| size <= RECURSIVE_TABLES_BASE.as_u32())
            .ok_or_else(|| {
                error!("shared region of {shared_region_size} bytes does not fit below the recursive window");
                PagingError::SharedRegionTooLarge(shared_region_size)
            })?;

        debug!(
            "paging: shared region {shared_size} bytes, kernel pool {}, process pool {}",
            kernel_pool.base_frame_no(),
            process_pool.base_frame_no()
        );

        Ok(Self {
            mmu,
            frame_pools,
            kernel_pool,
            process_pool,
            shared_size,
            current: SpinMutex::new(None),
            enabled: AtomicBool::new(false),
        })
    }

    /// Switches on address translation, once.
    ///
    /// # Errors
    /// [`PagingError::NoDirectoryLoaded`] if no address space has been
    /// [loaded](crate::AddressSpace::load) yet.
    pub fn enable_paging(&self) -> Result<(), PagingError> {
        if self.is_enabled() {
            return Ok(());
        }

        let Some(directory) = self.current_directory() else {
            error!("enable_paging without a loaded page directory");
            return Err(PagingError::NoDirectoryLoaded);
        };

        // SAFETY: Every directory built by `AddressSpace::new` identity maps
        // the shared region, which holds the executing kernel.
        unsafe { self.mmu.enable_paging() };
        self.enabled.store(true, Ordering::Release);
        debug!("paging enabled with directory {directory}");
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub const fn mmu(&self) -> &'a M {
        self.mmu
    }

    #[inline]
    #[must_use]
    pub const fn frame_pools(&self) -> &'a FramePoolRegistry<'a> {
        self.frame_pools
    }

    /// Pool for page directories and page tables.
    #[inline]
    #[must_use]
    pub const fn kernel_pool(&self) -> &'a FramePool<'a> {
        self.kernel_pool
    }

    /// Pool for the frames behind demand-paged memory.
    #[inline]
    #[must_use]
    pub const fn process_pool(&self) -> &'a FramePool<'a> {
        self.process_pool
    }

    /// Size of the identity-mapped shared region in bytes.
    #[inline]
    #[must_use]
    pub const fn shared_size(&self) -> u32 {
        self.shared_size
    }

    /// Number of page tables needed to identity map the shared region.
    #[inline]
    #[must_use]
    pub const fn shared_tables(&self) -> u32 {
        self.shared_size.div_ceil(Size4M::SIZE)
    }

    /// Directory frame of the current address space, if one was loaded.
    #[must_use]
    pub fn current_directory(&self) -> Option<FrameNumber> {
        *self.current.lock_irq()
    }

    pub(crate) fn set_current(&self, directory: FrameNumber) {
        *self.current.lock_irq() = Some(directory);
    }
}

impl<M: Mmu> core::fmt::Debug for Paging<'_, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Paging")
            .field("shared_size", &self.shared_size)
            .field("current", &self.current_directory())
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}
