//! # Frame pool registry
//!
//! Frames are released by number alone: the page-fault path and
//! `free_page` know which frame backs a page, but not which pool it came
//! from. The registry resolves a frame number to its owning pool by range.

use super::{FrameAllocError, FramePool};
use kernel_info::memory::MAX_FRAME_POOLS;
use kernel_memory_addresses::FrameNumber;
use kernel_sync::SpinMutex;
use log::{debug, error};

/// The kernel's registry of frame pools, populated during boot.
pub static FRAME_POOLS: FramePoolRegistry<'static> = FramePoolRegistry::new();

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("frame pool registry is full ({MAX_FRAME_POOLS} pools)")]
    Full,
    #[error("frames {first}..+{count} overlap an already registered pool")]
    Overlap { first: FrameNumber, count: u32 },
}

struct Pools<'a> {
    slots: [Option<&'a FramePool<'a>>; MAX_FRAME_POOLS],
    len: usize,
}

impl<'a> Pools<'a> {
    fn iter(&self) -> impl Iterator<Item = &'a FramePool<'a>> + '_ {
        self.slots[..self.len].iter().flatten().copied()
    }
}

/// Fixed-capacity set of frame pools with disjoint ranges, in registration order.
pub struct FramePoolRegistry<'a> {
    pools: SpinMutex<Pools<'a>>,
}

impl Default for FramePoolRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> FramePoolRegistry<'a> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pools: SpinMutex::new(Pools {
                slots: [None; MAX_FRAME_POOLS],
                len: 0,
            }),
        }
    }

    /// Adds `pool` to the registry.
    ///
    /// # Errors
    /// [`RegistryError::Overlap`] if its range intersects a registered pool,
    /// [`RegistryError::Full`] if there is no free slot.
    pub fn register(&self, pool: &'a FramePool<'a>) -> Result<(), RegistryError> {
        let mut pools = self.pools.lock_irq();
        let (first, count) = (pool.base_frame_no(), pool.frame_count());
        if pools.iter().any(|p| p.overlaps(first, count)) {
            return Err(RegistryError::Overlap { first, count });
        }
        let len = pools.len;
        if len == MAX_FRAME_POOLS {
            return Err(RegistryError::Full);
        }
        pools.slots[len] = Some(pool);
        pools.len += 1;
        debug!("registered frame pool {first}..+{count} in slot {len}");
        Ok(())
    }

    /// The pool whose range contains `frame`.
    #[must_use]
    pub fn pool_for(&self, frame: FrameNumber) -> Option<&'a FramePool<'a>> {
        self.pools.lock_irq().iter().find(|p| p.contains(frame))
    }

    /// Releases the run headed by `frame` in whichever pool owns it.
    ///
    /// # Errors
    /// [`FrameAllocError::NoOwningPool`] if no registered pool contains
    /// `frame`, otherwise whatever [`FramePool::release_frames`] reports.
    pub fn release_frames(&self, frame: FrameNumber) -> Result<u32, FrameAllocError> {
        let Some(pool) = self.pool_for(frame) else {
            error!("release of frame {frame}: no owning pool");
            return Err(FrameAllocError::NoOwningPool(frame));
        };
        pool.release_frames(frame)
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.lock_irq().len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
