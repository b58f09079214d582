use crate::{MemoryAddress, MemoryAddressOffset, PageSize, Size4K, Size4M, VirtualPage};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Virtual memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes **virtual** addresses.
/// This type carries intent and prevents accidentally mixing virtual and
/// physical addresses.
///
/// On i386 with two-level paging a virtual address decomposes as
///
/// ```text
///  31        22 21        12 11          0
/// +------------+------------+-------------+
/// |  dir index | table index|   offset    |
/// +------------+------------+-------------+
/// ```
///
/// ### Semantics
/// - [`VirtualAddress::directory_index`] is bits 31..22, [`VirtualAddress::table_index`]
///   bits 21..12; [`VirtualAddress::from_indices`] is their exact inverse.
/// - Use [`VirtualAddress::page`] / [`VirtualAddress::offset`] / [`VirtualAddress::split`]
///   to derive the page base and in-page offset for a concrete [`PageSize`].
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let va = VirtualAddress::new(0x0040_3123);
/// assert_eq!(va.directory_index(), 1);
/// assert_eq!(va.table_index(), 3);
/// assert_eq!(VirtualAddress::from_indices(1, 3, 0x123), va);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(pub(crate) MemoryAddress);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u32) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.as_u32()
    }

    /// Compose an address from its directory index, table index, and offset.
    ///
    /// Out-of-range components are masked to their field width.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn from_indices(directory: u16, table: u16, offset: u16) -> Self {
        let d = (directory as u32 & 0x3FF) << Size4M::SHIFT;
        let t = (table as u32 & 0x3FF) << Size4K::SHIFT;
        let o = offset as u32 & (Size4K::SIZE - 1);
        Self::new(d | t | o)
    }

    /// Page directory index (bits 31..22).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn directory_index(self) -> u16 {
        (self.as_u32() >> Size4M::SHIFT) as u16
    }

    /// Page table index (bits 21..12).
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn table_index(self) -> u16 {
        ((self.as_u32() >> Size4K::SHIFT) & 0x3FF) as u16
    }

    #[inline]
    #[must_use]
    pub const fn page<S: PageSize>(self) -> VirtualPage<S> {
        VirtualPage::<S>(self.0.page::<S>())
    }

    #[inline]
    #[must_use]
    pub const fn offset<S: PageSize>(self) -> MemoryAddressOffset<S> {
        self.0.offset::<S>()
    }

    #[inline]
    #[must_use]
    pub const fn split<S: PageSize>(self) -> (VirtualPage<S>, MemoryAddressOffset<S>) {
        (self.page::<S>(), self.offset::<S>())
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned<S: PageSize>(self) -> bool {
        self.0.is_aligned::<S>()
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(a) => Some(Self(a)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.as_u32())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.as_u32())
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl<S> From<VirtualPage<S>> for VirtualAddress
where
    S: PageSize,
{
    fn from(value: VirtualPage<S>) -> Self {
        value.base()
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}
