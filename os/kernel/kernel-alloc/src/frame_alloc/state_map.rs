//! # Packed frame state bitmap
//!
//! Two bits per frame, four frames per byte. Frame `i` occupies bits
//! `2 * (i % 4)` and `2 * (i % 4) + 1` of byte `i / 4`:
//!
//! ```text
//!  byte i/4:  7 6 | 5 4 | 3 2 | 1 0
//!            f+3  | f+2 | f+1 |  f      (f = 4 * (i / 4))
//! ```
//!
//! The map knows nothing about allocation policy; [`FramePool`](super::FramePool)
//! builds the first-fit search on top of it.

use core::ops::Range;

/// State of a single frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum FrameState {
    /// Available for allocation.
    Free = 0b00,
    /// Body of an allocated run (any frame but the first).
    Allocated = 0b01,
    /// First frame of an allocated run, including single-frame runs.
    HeadOfSequence = 0b10,
    /// The bit pattern `0b11`. Never written by a pool, only ever read back
    /// from damaged memory.
    Corrupt = 0b11,
}

impl FrameState {
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Free,
            0b01 => Self::Allocated,
            0b10 => Self::HeadOfSequence,
            _ => Self::Corrupt,
        }
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

/// A 2-bit-per-frame state map over borrowed bytes.
pub struct FrameStateMap<'a> {
    bytes: &'a mut [u8],
    len: u32,
}

impl<'a> FrameStateMap<'a> {
    /// Number of frames one byte describes.
    pub const FRAMES_PER_BYTE: u32 = 4;

    /// Bytes required to describe `frames` frames.
    #[inline]
    #[must_use]
    pub const fn bytes_for(frames: u32) -> usize {
        frames.div_ceil(Self::FRAMES_PER_BYTE) as usize
    }

    /// Wraps `bytes` as the state map of `len` frames.
    ///
    /// Returns `None` if `bytes` cannot hold `len` entries. The existing
    /// contents are kept; use [`fill`](Self::fill) to initialise.
    #[must_use]
    pub fn new(bytes: &'a mut [u8], len: u32) -> Option<Self> {
        if bytes.len() < Self::bytes_for(len) {
            return None;
        }
        Some(Self { bytes, len })
    }

    /// Number of frames described.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    const fn locate(index: u32) -> (usize, u32) {
        ((index / Self::FRAMES_PER_BYTE) as usize, 2 * (index % Self::FRAMES_PER_BYTE))
    }

    /// State of frame `index`.
    ///
    /// # Panics
    /// If `index >= self.len()`.
    #[inline]
    #[must_use]
    pub fn get(&self, index: u32) -> FrameState {
        assert!(index < self.len, "frame index {index} out of range");
        let (byte, shift) = Self::locate(index);
        FrameState::from_bits(self.bytes[byte] >> shift)
    }

    /// Sets frame `index` to `state`.
    ///
    /// # Panics
    /// If `index >= self.len()`.
    #[inline]
    pub fn set(&mut self, index: u32, state: FrameState) {
        assert!(index < self.len, "frame index {index} out of range");
        let (byte, shift) = Self::locate(index);
        let b = &mut self.bytes[byte];
        *b = (*b & !(0b11 << shift)) | (state.into_bits() << shift);
    }

    /// Sets every frame in `range` to `state`.
    pub fn fill(&mut self, range: Range<u32>, state: FrameState) {
        for i in range {
            self.set(i, state);
        }
    }

    /// Number of frames currently in `state`.
    #[must_use]
    pub fn count(&self, state: FrameState) -> u32 {
        (0..self.len).fold(0, |n, i| n + u32::from(self.get(i) == state))
    }

    #[cfg(test)]
    pub(crate) fn raw_bytes_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}
