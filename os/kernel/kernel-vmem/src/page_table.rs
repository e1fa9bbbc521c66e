//! # Page Table Geometry
//!
//! One table type serves all four levels: every x86-64 paging structure is a
//! 4 KiB-aligned array of 512 [`PageEntryBits`]. What differs per level is
//! which virtual-address bits select the entry and how much address space one
//! entry spans; that lives in [`Level`].
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```

use crate::PageEntryBits;
use crate::addresses::VirtualAddress;

/// Entries per table at every level.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Paging level, from the root down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Level {
    /// Page Map Level 4, the root.
    Pml4,
    /// Page Directory Pointer Table.
    Pdpt,
    /// Page Directory.
    Pd,
    /// Page Table; its entries are the leaves.
    Pt,
}

/// Index into one table (`0..512`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

/// A 4 KiB paging structure: 512 entries.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

impl Level {
    /// Number of low VA bits below this level's index field.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pml4 => 39,
            Self::Pdpt => 30,
            Self::Pd => 21,
            Self::Pt => 12,
        }
    }

    /// Bytes of virtual address space covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn entry_span(self) -> u64 {
        1 << self.shift()
    }

    #[inline]
    #[must_use]
    pub const fn index_of(self, va: VirtualAddress) -> TableIndex {
        TableIndex::new(((va.as_u64() >> self.shift()) & 0x1FF) as u16)
    }

    /// The level below, or `None` for the leaf table.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pd => Some(Self::Pt),
            Self::Pt => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        matches!(self, Self::Pt)
    }

    /// Start of the next entry's span after `va`, or `None` past the top of the address space.
    #[inline]
    #[must_use]
    pub const fn next_boundary(self, va: VirtualAddress) -> Option<VirtualAddress> {
        let mask = !(self.entry_span() - 1);
        match (va.as_u64() & mask).checked_add(self.entry_span()) {
            Some(v) => Some(VirtualAddress::new(v)),
            None => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pml4 => "pml4",
            Self::Pdpt => "pdpt",
            Self::Pd => "pd",
            Self::Pt => "pt",
        }
    }
}

impl TableIndex {
    /// ### Debug assertions
    /// - Asserts `v < 512` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntryBits::new(); ENTRIES_PER_TABLE],
        }
    }

    /// Reset every entry to non-present.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::new());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageEntryBits {
        self.entries[i.as_usize()]
    }

    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageEntryBits) {
        self.entries[i.as_usize()] = e;
    }

    /// Number of populated entries.
    #[must_use]
    pub fn populated(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_none()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_ok() {
        let va = VirtualAddress::new(0xFFFF_C900_4020_3000);
        assert_eq!(Level::Pml4.index_of(va).as_usize(), 0x192);
        assert_eq!(Level::Pdpt.index_of(va).as_usize(), 1);
        assert_eq!(Level::Pd.index_of(va).as_usize(), 1);
        assert_eq!(Level::Pt.index_of(va).as_usize(), 3);
    }

    #[test]
    fn boundaries() {
        let va = VirtualAddress::new(0x20_1234);
        assert_eq!(Level::Pt.next_boundary(va), Some(VirtualAddress::new(0x20_2000)));
        assert_eq!(Level::Pd.next_boundary(va), Some(VirtualAddress::new(0x40_0000)));
        assert_eq!(
            Level::Pml4.next_boundary(VirtualAddress::new(u64::MAX)),
            None
        );
    }

    #[test]
    fn levels_descend_to_leaf() {
        let mut level = Level::Pml4;
        let mut depth = 1;
        while let Some(next) = level.next() {
            level = next;
            depth += 1;
        }
        assert!(level.is_leaf());
        assert_eq!(depth, 4);
    }
}
