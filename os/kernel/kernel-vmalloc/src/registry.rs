//! # Area Registry
//!
//! Ordered set of reserved [`VirtualArea`]s keyed by start address. Ranges
//! (guard pages included) never overlap.
//!
//! Placement is first-fit in address order: the candidate starts at the
//! aligned window start and is pushed past every area it collides with.

use crate::VmallocError;
use crate::area::{AreaKind, AreaSpan, VirtualArea};
use alloc::collections::BTreeMap;
use kernel_info::memory::IOREMAP_MAX_ORDER;
use kernel_vmem::{PAGE_SHIFT, PAGE_SIZE, VirtualAddress, checked_align_up};
use log::trace;

#[derive(Debug, Default)]
pub struct AreaRegistry {
    areas: BTreeMap<u64, VirtualArea>,
}

impl AreaKind {
    /// Start alignment for an area of `size` bytes.
    ///
    /// I/O remappings are aligned to the next power of two above `size`,
    /// clamped to `[PAGE_SIZE, 1 << IOREMAP_MAX_ORDER]`; everything else is
    /// page-aligned.
    #[must_use]
    pub const fn alignment(self, size: u64) -> u64 {
        match self {
            Self::IoRemap => {
                let fls = u64::BITS - size.leading_zeros();
                let bit = if fls > IOREMAP_MAX_ORDER {
                    IOREMAP_MAX_ORDER
                } else if fls < PAGE_SHIFT {
                    PAGE_SHIFT
                } else {
                    fls
                };
                1 << bit
            }
            Self::Alloc | Self::Map => PAGE_SIZE,
        }
    }
}

impl AreaRegistry {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            areas: BTreeMap::new(),
        }
    }

    /// Reserve `size` bytes (rounded up to pages, plus one guard page) inside
    /// `[start, end)`.
    ///
    /// # Errors
    /// [`VmallocError::OutOfSpace`] if no gap is large enough or the
    /// arithmetic would overflow.
    pub fn reserve(
        &mut self,
        size: u64,
        kind: AreaKind,
        start: VirtualAddress,
        end: VirtualAddress,
    ) -> Result<AreaSpan, VmallocError> {
        let no_space = VmallocError::OutOfSpace { size };
        debug_assert!(start < end, "empty placement window");
        if size == 0 {
            return Err(no_space);
        }

        let align = kind.alignment(size);
        let padded = checked_align_up(size, PAGE_SIZE)
            .and_then(|s| s.checked_add(PAGE_SIZE))
            .ok_or(no_space)?;
        let limit = end.as_u64().checked_sub(padded).ok_or(no_space)?;
        let mut addr = checked_align_up(start.as_u64(), align).ok_or(no_space)?;

        for area in self.areas.values() {
            let area_start = area.address.as_u64();
            if area_start < addr {
                if area.end() >= addr {
                    addr = checked_align_up(area.end(), align).ok_or(no_space)?;
                }
                continue;
            }
            let candidate_end = addr.checked_add(padded).ok_or(no_space)?;
            if candidate_end <= area_start {
                break;
            }
            addr = checked_align_up(area.end(), align).ok_or(no_space)?;
            if addr > limit {
                return Err(no_space);
            }
        }

        if addr > limit {
            return Err(no_space);
        }

        let area = VirtualArea::new(VirtualAddress::new(addr), padded, kind);
        let span = area.span();
        trace!("vmalloc: reserved {span}");
        self.areas.insert(addr, area);
        Ok(span)
    }

    /// Detach the area starting exactly at `address`.
    ///
    /// # Errors
    /// [`VmallocError::NotFound`] if no area starts there.
    pub fn remove(&mut self, address: VirtualAddress) -> Result<VirtualArea, VmallocError> {
        self.areas
            .remove(&address.as_u64())
            .ok_or(VmallocError::NotFound(address))
    }

    #[must_use]
    pub fn get(&self, address: VirtualAddress) -> Option<&VirtualArea> {
        self.areas.get(&address.as_u64())
    }

    pub(crate) fn get_mut(&mut self, address: VirtualAddress) -> Option<&mut VirtualArea> {
        self.areas.get_mut(&address.as_u64())
    }

    /// The area whose reservation (guard page included) covers `va`.
    #[must_use]
    pub fn find_containing(&self, va: VirtualAddress) -> Option<&VirtualArea> {
        self.areas
            .range(..=va.as_u64())
            .next_back()
            .map(|(_, area)| area)
            .filter(|area| area.contains(va))
    }

    /// Areas in increasing address order.
    pub fn iter(&self) -> impl Iterator<Item = &VirtualArea> {
        self.areas.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.areas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }
}
