//! # Virtual and Physical Memory Addresses
//!
//! Zero-cost newtypes over `u64` so virtual and physical addresses cannot be
//! mixed up, plus [`PhysicalPage`] for a 4 KiB page frame handle.

use crate::{PAGE_SIZE, align_down};
use core::fmt;
use core::ops::{Add, AddAssign};

/// A **virtual** (page-table translated) kernel address.
///
/// No canonicality or alignment is implied by the type.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

/// A **physical** memory address (machine bus address).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

/// Handle to one 4 KiB physical page frame.
///
/// ### Invariants
/// - The base address is always 4 KiB-aligned.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(PhysicalAddress);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0.is_multiple_of(PAGE_SIZE)
    }

    /// Round down to the containing page base.
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> Self {
        Self(align_down(self.0, PAGE_SIZE))
    }

    /// Byte offset inside the containing 4 KiB page.
    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn page_offset(self) -> u64 {
        self.0 & (PAGE_SIZE - 1)
    }

    /// The frame containing this address.
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage {
        PhysicalPage(Self(align_down(self.0, PAGE_SIZE)))
    }
}

impl PhysicalPage {
    /// Wrap an already aligned frame base.
    ///
    /// ### Debug assertions
    /// - Asserts 4 KiB alignment in debug builds.
    #[inline]
    #[must_use]
    pub const fn from_addr(base: PhysicalAddress) -> Self {
        debug_assert!(base.0.is_multiple_of(PAGE_SIZE), "frame base not 4 KiB aligned");
        Self(base)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        self.0
    }

    /// Address of byte `offset` inside this frame.
    #[inline]
    #[must_use]
    pub const fn at(self, offset: u64) -> PhysicalAddress {
        debug_assert!(offset < PAGE_SIZE);
        PhysicalAddress(self.0.0 + offset)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame(0x{:016X})", self.0.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Add<u64> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_split() {
        let va = VirtualAddress::new(0xFFFF_C900_0000_1234);
        assert_eq!(va.page_base().as_u64(), 0xFFFF_C900_0000_1000);
        assert_eq!(va.page_offset(), 0x234);
        assert!(!va.is_page_aligned());
        assert!(va.page_base().is_page_aligned());

        let pa = PhysicalAddress::new(0x0030_0042);
        assert_eq!(pa.page().base().as_u64(), 0x0030_0000);
        assert_eq!(pa.page().at(0x42), pa);
    }

    #[test]
    fn checked_add_overflows() {
        assert!(VirtualAddress::new(u64::MAX).checked_add(1).is_none());
        assert_eq!(
            VirtualAddress::new(0x1000).checked_add(0x1000),
            Some(VirtualAddress::new(0x2000))
        );
    }
}
