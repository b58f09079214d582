//! # Contiguous physical frame pools
//!
//! A [`FramePool`] manages a fixed range of physical frames and hands out
//! contiguous runs of them. Every frame carries a 2-bit [`FrameState`] in a
//! [`FrameStateMap`]; the first frame of a run is marked
//! [`HeadOfSequence`](FrameState::HeadOfSequence), the others
//! [`Allocated`](FrameState::Allocated). Releasing a run therefore only needs
//! the first frame number.
//!
//! ### Bitmap placement
//!
//! The map needs [`needed_info_frames`] frames. It lives either
//!
//! - in the pool's own first frames (*self-hosted*); those frames are
//!   allocated as a run at construction, or
//! - in externally supplied info frames, typically taken from another pool.
//!
//! ### Semantics
//! - Frame numbers are global, never pool-relative.
//! - [`FramePool::get_frames`] is first-fit, scanning from the lowest frame.
//! - All mutations happen inside an interrupt-masked critical section.
//!
//! ### Invariants
//! - `free_count()` equals the number of `Free` frames in the map.
//! - Every `HeadOfSequence` frame is followed by the `Allocated` frames of its
//!   run, and by nothing else.
//!
//! ### Examples
//! ```rust
//! # use kernel_alloc::frame_alloc::FramePool;
//! # use kernel_memory_addresses::FrameNumber;
//! let mut bitmap = [0u8; 256];
//! let pool = FramePool::new(FrameNumber::new(1024), 1024, Some(FrameNumber::new(600)), &mut bitmap).unwrap();
//!
//! let run = pool.get_frames(3).unwrap();
//! assert_eq!(run, FrameNumber::new(1024));
//! assert_eq!(pool.free_count(), 1021);
//!
//! assert_eq!(pool.release_frames(run), Ok(3));
//! assert_eq!(pool.free_count(), 1024);
//! ```

mod registry;
mod state_map;

pub use registry::{FRAME_POOLS, FramePoolRegistry, RegistryError};
pub use state_map::{FrameState, FrameStateMap};

use crate::phys_mapper::PhysMapper;
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::FrameNumber;
use kernel_sync::SpinMutex;
use log::{debug, error, trace, warn};

/// Number of frames needed to hold the state map of `frames` frames.
///
/// One frame describes `4 * 4096` frames.
///
/// ```rust
/// # use kernel_alloc::frame_alloc::needed_info_frames;
/// assert_eq!(needed_info_frames(1), 1);
/// assert_eq!(needed_info_frames(16_384), 1);
/// assert_eq!(needed_info_frames(16_385), 2);
/// ```
#[inline]
#[must_use]
pub const fn needed_info_frames(frames: u32) -> u32 {
    frames.div_ceil(FrameStateMap::FRAMES_PER_BYTE * FRAME_SIZE)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("a frame pool needs at least one frame")]
    ZeroFrames,
    #[error("bitmap storage too small: need {needed} bytes, got {got}")]
    StorageTooSmall { needed: usize, got: usize },
    #[error("frames {first}..+{count} are outside the pool")]
    OutOfRange { first: FrameNumber, count: u32 },
    #[error("frame {0} is not the head of an allocated run")]
    NotHead(FrameNumber),
    #[error("no registered pool owns frame {0}")]
    NoOwningPool(FrameNumber),
}

struct PoolState<'a> {
    map: FrameStateMap<'a>,
    free: u32,
}

/// A pool of contiguous physical frames with a 2-bit-per-frame state map.
pub struct FramePool<'a> {
    base: FrameNumber,
    count: u32,
    info: Option<FrameNumber>,
    state: SpinMutex<PoolState<'a>>,
}

impl<'a> FramePool<'a> {
    /// Creates a pool over frames `base .. base + count`.
    ///
    /// `storage` is the memory of the state map and must hold at least
    /// `ceil(count / 4)` bytes. With `info == None` the pool is self-hosted:
    /// its first [`needed_info_frames`] frames are taken for the map and
    /// marked as one allocated run.
    ///
    /// # Errors
    /// [`FrameAllocError::ZeroFrames`] or [`FrameAllocError::StorageTooSmall`].
    pub fn new(
        base: FrameNumber,
        count: u32,
        info: Option<FrameNumber>,
        storage: &'a mut [u8],
    ) -> Result<Self, FrameAllocError> {
        if count == 0 {
            return Err(FrameAllocError::ZeroFrames);
        }

        let got = storage.len();
        let mut map = FrameStateMap::new(storage, count).ok_or(FrameAllocError::StorageTooSmall {
            needed: FrameStateMap::bytes_for(count),
            got,
        })?;
        map.fill(0..count, FrameState::Free);

        let mut free = count;
        if info.is_none() {
            let own = needed_info_frames(count);
            map.set(0, FrameState::HeadOfSequence);
            map.fill(1..own, FrameState::Allocated);
            free -= own;
        }

        debug!(
            "frame pool {base}..+{count}: {free} free, bitmap {}",
            match info {
                Some(_) => "external",
                None => "self-hosted",
            }
        );

        Ok(Self {
            base,
            count,
            info,
            state: SpinMutex::new(PoolState { map, free }),
        })
    }

    /// Creates a pool whose state map is located in physical memory.
    ///
    /// The map lives in the info frames starting at `info`, or in the pool's
    /// own first frames if `info` is `None`.
    ///
    /// # Errors
    /// As for [`FramePool::new`].
    ///
    /// # Safety
    /// The map frames must be reachable through `mapper`, must not be used by
    /// anything else for `'a`, and an external info range must already be
    /// reserved in the pool it was taken from.
    pub unsafe fn from_phys<M: PhysMapper>(
        mapper: &M,
        base: FrameNumber,
        count: u32,
        info: Option<FrameNumber>,
    ) -> Result<Self, FrameAllocError> {
        let location = info.unwrap_or(base);
        let len = needed_info_frames(count) as usize * FRAME_SIZE as usize;
        // SAFETY: Caller guarantees the frames are mapped and exclusively ours.
        let storage = unsafe { mapper.phys_to_bytes(location.base(), len) };
        Self::new(base, count, info, storage)
    }

    /// First frame of the pool.
    #[inline]
    #[must_use]
    pub const fn base_frame_no(&self) -> FrameNumber {
        self.base
    }

    /// Number of frames in the pool, including bitmap and reserved frames.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.count
    }

    /// Location of an external state map, if any.
    #[inline]
    #[must_use]
    pub const fn info_frame_no(&self) -> Option<FrameNumber> {
        self.info
    }

    /// Number of frames currently `Free`.
    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.state.lock_irq().free
    }

    /// Whether `frame` falls into this pool's range.
    #[inline]
    #[must_use]
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        frame.as_u32() >= self.base.as_u32() && frame.as_u32() - self.base.as_u32() < self.count
    }

    /// Whether this pool's range intersects `first .. first + count`.
    #[must_use]
    pub fn overlaps(&self, first: FrameNumber, count: u32) -> bool {
        let a0 = u64::from(self.base.as_u32());
        let a1 = a0 + u64::from(self.count);
        let b0 = u64::from(first.as_u32());
        let b1 = b0 + u64::from(count);
        a0 < b1 && b0 < a1
    }

    /// State of `frame`, or `None` if it is outside the pool.
    #[must_use]
    pub fn state_of(&self, frame: FrameNumber) -> Option<FrameState> {
        self.contains(frame)
            .then(|| self.state.lock_irq().map.get(frame - self.base))
    }

    /// Allocates `n` contiguous frames and returns the first one.
    ///
    /// Scans from the lowest frame and takes the first run of `n` free
    /// frames. Returns `None`, without changing anything, if `n` is zero or
    /// no such run exists.
    pub fn get_frames(&self, n: u32) -> Option<FrameNumber> {
        if n == 0 {
            return None;
        }

        let mut state = self.state.lock_irq();
        if n > state.free {
            warn!("frame pool {}: {n} frames requested, {} free", self.base, state.free);
            return None;
        }

        let Some(start) = first_fit(&state.map, n) else {
            warn!("frame pool {}: no run of {n} free frames", self.base);
            return None;
        };

        state.map.set(start, FrameState::HeadOfSequence);
        state.map.fill(start + 1..start + n, FrameState::Allocated);
        state.free -= n;

        let first = self.base + start;
        trace!("frame pool {}: allocated {first}..+{n}", self.base);
        Some(first)
    }

    /// Reserves `n` frames starting at `first` without searching.
    ///
    /// Used for firmware holes and similar ranges that must never be handed
    /// out. The frames are marked as one allocated run. `n == 0` does nothing.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfRange`] if the range is not inside the pool.
    pub fn mark_inaccessible(&self, first: FrameNumber, n: u32) -> Result<(), FrameAllocError> {
        if n == 0 {
            return Ok(());
        }
        let in_range = self.contains(first)
            && first
                .checked_add(n - 1)
                .is_some_and(|last| self.contains(last));
        if !in_range {
            return Err(FrameAllocError::OutOfRange { first, count: n });
        }

        let start = first - self.base;
        let mut state = self.state.lock_irq();
        let was_free = (start..start + n).fold(0, |k, i| {
            k + u32::from(state.map.get(i) == FrameState::Free)
        });
        debug_assert_eq!(was_free, n, "reserved range was not free");

        state.map.set(start, FrameState::HeadOfSequence);
        state.map.fill(start + 1..start + n, FrameState::Allocated);
        state.free -= was_free;

        debug!("frame pool {}: reserved {first}..+{n}", self.base);
        Ok(())
    }

    /// Releases the run whose head is `first` and returns its length.
    ///
    /// Frees the head and every following `Allocated` frame, stopping at the
    /// first frame that is `Free` or the head of another run, or at the end
    /// of the pool.
    ///
    /// # Errors
    /// [`FrameAllocError::NotHead`] if `first` is outside the pool or not the
    /// head of a run. Nothing is changed in that case.
    pub fn release_frames(&self, first: FrameNumber) -> Result<u32, FrameAllocError> {
        if !self.contains(first) {
            error!("frame pool {}: release of foreign frame {first}", self.base);
            return Err(FrameAllocError::NotHead(first));
        }

        let start = first - self.base;
        let mut state = self.state.lock_irq();
        let head = state.map.get(start);
        if head != FrameState::HeadOfSequence {
            error!("frame pool {}: release of {first} in state {head:?}", self.base);
            return Err(FrameAllocError::NotHead(first));
        }

        state.map.set(start, FrameState::Free);
        let mut released = 1;
        let mut i = start + 1;
        while i < self.count && state.map.get(i) == FrameState::Allocated {
            state.map.set(i, FrameState::Free);
            released += 1;
            i += 1;
        }
        state.free += released;

        trace!("frame pool {}: released {first}..+{released}", self.base);
        Ok(released)
    }

    #[cfg(test)]
    fn with_map<R>(&self, f: impl FnOnce(&mut FrameStateMap<'a>) -> R) -> R {
        f(&mut self.state.lock().map)
    }
}

/// Pool-relative index of the lowest run of `n` free frames.
fn first_fit(map: &FrameStateMap<'_>, n: u32) -> Option<u32> {
    let mut run = 0;
    for i in 0..map.len() {
        if map.get(i) == FrameState::Free {
            run += 1;
            if run == n {
                return Some(i + 1 - n);
            }
        } else {
            run = 0;
        }
    }
    None
}

impl core::fmt::Debug for FramePool<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FramePool")
            .field("base", &self.base)
            .field("count", &self.count)
            .field("info", &self.info)
            .field("free", &self.free_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_for(count: u32) -> Vec<u8> {
        vec![0xFF; FrameStateMap::bytes_for(count)]
    }

    fn assert_free_count_invariant(pool: &FramePool<'_>) {
        let counted = pool.with_map(|m| m.count(FrameState::Free));
        assert_eq!(pool.free_count(), counted);
    }

    #[test]
    fn self_hosted_pool_reserves_its_bitmap() {
        let mut s = storage_for(1024);
        let pool = FramePool::new(FrameNumber::new(0), 1024, None, &mut s).unwrap();
        assert_eq!(pool.free_count(), 1023);
        assert_eq!(pool.state_of(FrameNumber::new(0)), Some(FrameState::HeadOfSequence));
        assert_eq!(pool.state_of(FrameNumber::new(1)), Some(FrameState::Free));
        assert_free_count_invariant(&pool);
    }

    #[test]
    fn large_self_hosted_pool_reserves_several_frames() {
        let count = 40_000;
        let mut s = storage_for(count);
        let pool = FramePool::new(FrameNumber::new(0), count, None, &mut s).unwrap();
        assert_eq!(needed_info_frames(count), 3);
        assert_eq!(pool.free_count(), count - 3);
        assert_eq!(pool.state_of(FrameNumber::new(2)), Some(FrameState::Allocated));
        assert_eq!(pool.get_frames(1), Some(FrameNumber::new(3)));
        assert_eq!(pool.release_frames(FrameNumber::new(0)), Ok(3));
    }

    #[test]
    fn construction_errors() {
        let mut s = storage_for(8);
        assert_eq!(
            FramePool::new(FrameNumber::new(0), 0, None, &mut s).unwrap_err(),
            FrameAllocError::ZeroFrames
        );
        assert_eq!(
            FramePool::new(FrameNumber::new(0), 9, None, &mut s).unwrap_err(),
            FrameAllocError::StorageTooSmall { needed: 3, got: 2 }
        );
    }

    #[test]
    fn zero_and_oversized_requests_change_nothing() {
        let mut s = storage_for(16);
        let pool = FramePool::new(FrameNumber::new(100), 16, Some(FrameNumber::new(1)), &mut s).unwrap();
        assert_eq!(pool.get_frames(0), None);
        assert_eq!(pool.get_frames(17), None);
        assert_eq!(pool.free_count(), 16);
        assert_free_count_invariant(&pool);
    }

    #[test]
    fn runs_are_contiguous_and_marked() {
        let mut s = storage_for(32);
        let pool = FramePool::new(FrameNumber::new(64), 32, Some(FrameNumber::new(1)), &mut s).unwrap();
        let a = pool.get_frames(4).unwrap();
        let b = pool.get_frames(2).unwrap();
        assert_eq!(a, FrameNumber::new(64));
        assert_eq!(b, FrameNumber::new(68));
        assert_eq!(pool.state_of(a), Some(FrameState::HeadOfSequence));
        for k in 1..4 {
            assert_eq!(pool.state_of(a + k), Some(FrameState::Allocated));
        }
        assert_eq!(pool.state_of(b), Some(FrameState::HeadOfSequence));
        assert_free_count_invariant(&pool);
    }

    #[test]
    fn release_stops_at_next_head() {
        let mut s = storage_for(16);
        let pool = FramePool::new(FrameNumber::new(0), 16, Some(FrameNumber::new(99)), &mut s).unwrap();
        let a = pool.get_frames(3).unwrap();
        let b = pool.get_frames(3).unwrap();
        assert_eq!(pool.release_frames(a), Ok(3));
        assert_eq!(pool.state_of(b), Some(FrameState::HeadOfSequence));
        assert_eq!(pool.free_count(), 13);
        assert_free_count_invariant(&pool);
    }

    #[test]
    fn release_of_body_or_free_frame_is_rejected() {
        let mut s = storage_for(16);
        let pool = FramePool::new(FrameNumber::new(0), 16, Some(FrameNumber::new(99)), &mut s).unwrap();
        let a = pool.get_frames(3).unwrap();
        assert_eq!(pool.release_frames(a + 1), Err(FrameAllocError::NotHead(a + 1)));
        assert_eq!(pool.release_frames(a + 5), Err(FrameAllocError::NotHead(a + 5)));
        assert_eq!(
            pool.release_frames(FrameNumber::new(16)),
            Err(FrameAllocError::NotHead(FrameNumber::new(16)))
        );
        assert_eq!(pool.free_count(), 13);
    }

    #[test]
    fn corrupt_entries_are_rejected() {
        let mut s = storage_for(8);
        let pool = FramePool::new(FrameNumber::new(0), 8, Some(FrameNumber::new(99)), &mut s).unwrap();
        pool.with_map(|m| m.raw_bytes_mut()[0] = 0xFF);
        assert_eq!(pool.state_of(FrameNumber::new(0)), Some(FrameState::Corrupt));
        assert_eq!(
            pool.release_frames(FrameNumber::new(0)),
            Err(FrameAllocError::NotHead(FrameNumber::new(0)))
        );
    }

    #[test]
    fn release_at_pool_end() {
        let mut s = storage_for(8);
        let pool = FramePool::new(FrameNumber::new(8), 8, Some(FrameNumber::new(0)), &mut s).unwrap();
        assert!(pool.mark_inaccessible(FrameNumber::new(8), 4).is_ok());
        let tail = pool.get_frames(4).unwrap();
        assert_eq!(tail, FrameNumber::new(12));
        assert_eq!(pool.get_frames(1), None);
        assert_eq!(pool.release_frames(tail), Ok(4));
        assert_free_count_invariant(&pool);
    }

    #[test]
    fn first_fit_skips_fragmented_holes() {
        let mut s = storage_for(16);
        let pool = FramePool::new(FrameNumber::new(0), 16, Some(FrameNumber::new(99)), &mut s).unwrap();
        let a = pool.get_frames(2).unwrap();
        let _b = pool.get_frames(2).unwrap();
        pool.release_frames(a).unwrap();
        // the two-frame hole at 0 is too small for three
        assert_eq!(pool.get_frames(3), Some(FrameNumber::new(4)));
        assert_eq!(pool.get_frames(2), Some(FrameNumber::new(0)));
    }

    #[test]
    fn mark_inaccessible_rejects_foreign_ranges() {
        let mut s = storage_for(16);
        let pool = FramePool::new(FrameNumber::new(16), 16, Some(FrameNumber::new(0)), &mut s).unwrap();
        assert_eq!(
            pool.mark_inaccessible(FrameNumber::new(30), 4),
            Err(FrameAllocError::OutOfRange { first: FrameNumber::new(30), count: 4 })
        );
        assert_eq!(
            pool.mark_inaccessible(FrameNumber::new(8), 2),
            Err(FrameAllocError::OutOfRange { first: FrameNumber::new(8), count: 2 })
        );
        assert_eq!(pool.mark_inaccessible(FrameNumber::new(20), 0), Ok(()));
        assert_eq!(pool.free_count(), 16);
    }

    #[test]
    fn overlap_detection() {
        let mut s = storage_for(16);
        let pool = FramePool::new(FrameNumber::new(16), 16, Some(FrameNumber::new(0)), &mut s).unwrap();
        assert!(pool.overlaps(FrameNumber::new(31), 1));
        assert!(pool.overlaps(FrameNumber::new(0), 17));
        assert!(!pool.overlaps(FrameNumber::new(32), 10));
        assert!(!pool.overlaps(FrameNumber::new(0), 16));
    }
}
