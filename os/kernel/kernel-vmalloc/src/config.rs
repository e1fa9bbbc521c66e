//! Runtime placement window.

use crate::VmallocError;
use kernel_info::memory::{VMALLOC_END, VMALLOC_START};
use kernel_vmem::{PAGE_SIZE, VirtualAddress};

/// The virtual range `[start, end)` handed out by the allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VmallocConfig {
    start: VirtualAddress,
    end: VirtualAddress,
}

impl VmallocConfig {
    /// Validate a window: page-aligned bounds with room for at least one
    /// page and its guard page.
    ///
    /// # Errors
    /// [`VmallocError::InvalidWindow`] otherwise.
    pub fn new(start: VirtualAddress, end: VirtualAddress) -> Result<Self, VmallocError> {
        let valid = start.is_page_aligned()
            && end.is_page_aligned()
            && end
                .as_u64()
                .checked_sub(start.as_u64())
                .is_some_and(|len| len >= 2 * PAGE_SIZE);
        if valid {
            Ok(Self { start, end })
        } else {
            Err(VmallocError::InvalidWindow { start, end })
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// Exclusive end.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.as_u64() - self.start.as_u64()
    }
}

impl Default for VmallocConfig {
    fn default() -> Self {
        Self {
            start: VirtualAddress::new(VMALLOC_START),
            end: VirtualAddress::new(VMALLOC_END),
        }
    }
}
