//! Storage for the frame handles owned by an `Alloc` area.
//!
//! Small arrays live on the heap. Arrays larger than one page are themselves
//! vmalloc'd; their handles are then stored as little-endian physical
//! addresses inside that mapping. Bit 0 of a stored handle marks the slot
//! as occupied, so frame 0 stays representable and a zeroed slot means
//! "no frame".

use crate::VmallocError;
use alloc::vec::Vec;
use kernel_vmem::{PAGE_SIZE, PhysMapper, PhysicalAddress, PhysicalPage, VirtualAddress};
use log::error;

/// Bytes per stored handle.
pub(crate) const HANDLE_SIZE: u64 = size_of::<u64>() as u64;

const HANDLES_PER_PAGE: usize = (PAGE_SIZE / HANDLE_SIZE) as usize;

/// Set on every stored handle; frame bases are page-aligned so bit 0 is free.
const SLOT_OCCUPIED: u64 = 1;

#[derive(Debug, Default)]
pub(crate) enum PageArray {
    #[default]
    Empty,
    /// Handles in a heap vector, filled front to back.
    Inline(Vec<PhysicalPage>),
    /// Handles in a separate vmalloc area at `base`.
    Vmapped {
        base: VirtualAddress,
        len: usize,
        /// Frames backing the handle area, in address order.
        backing: Vec<PhysicalPage>,
    },
}

impl PageArray {
    /// Whether `count` handles fit into one page.
    #[inline]
    pub(crate) const fn fits_inline(count: usize) -> bool {
        count <= HANDLES_PER_PAGE
    }

    /// An empty heap array with room for exactly `count` handles.
    pub(crate) fn inline(count: usize) -> Result<Self, VmallocError> {
        let mut v = Vec::new();
        v.try_reserve_exact(count)
            .map_err(|_| VmallocError::OutOfMemory)?;
        Ok(Self::Inline(v))
    }

    /// Number of bytes a vmalloc'd array of `count` handles needs.
    #[inline]
    pub(crate) const fn bytes_for(count: usize) -> u64 {
        count as u64 * HANDLE_SIZE
    }

    /// Start of the vmalloc'd handle area, if any.
    #[inline]
    pub(crate) const fn vmapped_base(&self) -> Option<VirtualAddress> {
        match self {
            Self::Vmapped { base, .. } => Some(*base),
            _ => None,
        }
    }

    pub(crate) fn get<M: PhysMapper>(&self, mapper: &M, index: usize) -> Option<PhysicalPage> {
        match self {
            Self::Empty => None,
            Self::Inline(pages) => pages.get(index).copied(),
            Self::Vmapped { len, backing, .. } => {
                if index >= *len {
                    return None;
                }
                let mut raw = [0; HANDLE_SIZE as usize];
                // SAFETY: slots never straddle a frame; the backing frames stay
                // allocated for as long as this array exists.
                unsafe { mapper.copy_from_phys(slot_address(backing, index), &mut raw) };
                let raw = u64::from_le_bytes(raw);
                (raw & SLOT_OCCUPIED != 0).then(|| {
                    PhysicalPage::from_addr(PhysicalAddress::new(raw & !SLOT_OCCUPIED))
                })
            }
        }
    }

    /// Store the handle for slot `index`. Slots are filled in order.
    pub(crate) fn set<M: PhysMapper>(&mut self, mapper: &M, index: usize, page: PhysicalPage) {
        match self {
            Self::Empty => error!("vmalloc: dropping {page:?} stored into an empty page array"),
            Self::Inline(pages) => {
                debug_assert_eq!(index, pages.len());
                debug_assert!(pages.len() < pages.capacity());
                pages.push(page);
            }
            Self::Vmapped { len, backing, .. } => {
                debug_assert!(index < *len);
                let raw = (page.base().as_u64() | SLOT_OCCUPIED).to_le_bytes();
                // SAFETY: see `get`.
                unsafe { mapper.copy_to_phys(slot_address(backing, index), &raw) };
            }
        }
    }

    /// The first `count` stored handles, stopping early at an empty slot.
    pub(crate) fn iter<'a, M: PhysMapper>(
        &'a self,
        mapper: &'a M,
        count: usize,
    ) -> impl Iterator<Item = PhysicalPage> + 'a {
        (0..count).map_while(move |i| self.get(mapper, i))
    }
}

fn slot_address(backing: &[PhysicalPage], index: usize) -> PhysicalAddress {
    let frame = backing[index / HANDLES_PER_PAGE];
    frame.at((index % HANDLES_PER_PAGE) as u64 * HANDLE_SIZE)
}
