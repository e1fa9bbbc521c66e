//! Reserved virtual ranges and what backs them.

use crate::page_array::PageArray;
use core::fmt;
use kernel_vmem::{PAGE_SIZE, PhysicalAddress, VirtualAddress};

/// How a [`VirtualArea`] was created and who owns its backing frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AreaKind {
    /// Device memory mapped with [`ioremap`](crate::Vmalloc::ioremap); frames are not owned.
    IoRemap,
    /// Memory from [`vmalloc`](crate::Vmalloc::vmalloc); the area owns its frames.
    Alloc,
    /// Caller-provided frames mapped with [`vmap`](crate::Vmalloc::vmap).
    Map,
}

impl fmt::Display for AreaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IoRemap => "ioremap",
            Self::Alloc => "vmalloc",
            Self::Map => "vmap",
        })
    }
}

/// One reserved range of the vmalloc window.
///
/// `size` always includes one trailing guard page that is never mapped.
#[derive(Debug)]
pub struct VirtualArea {
    pub(crate) address: VirtualAddress,
    pub(crate) size: u64,
    pub(crate) kind: AreaKind,
    pub(crate) pages: PageArray,
    pub(crate) page_count: usize,
    pub(crate) phys_addr: Option<PhysicalAddress>,
}

impl VirtualArea {
    pub(crate) const fn new(address: VirtualAddress, size: u64, kind: AreaKind) -> Self {
        Self {
            address,
            size,
            kind,
            pages: PageArray::Empty,
            page_count: 0,
            phys_addr: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> VirtualAddress {
        self.address
    }

    /// Reserved size including the guard page.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> AreaKind {
        self.kind
    }

    /// Frames owned by this area.
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        self.page_count
    }

    #[inline]
    #[must_use]
    pub const fn phys_addr(&self) -> Option<PhysicalAddress> {
        self.phys_addr
    }

    /// Exclusive end of the reservation, guard page included.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.address.as_u64() + self.size
    }

    /// Exclusive end of the part that may be mapped; the guard page starts here.
    #[inline]
    #[must_use]
    pub const fn mapped_end(&self) -> VirtualAddress {
        VirtualAddress::new(self.end() - PAGE_SIZE)
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.address.as_u64() && va.as_u64() < self.end()
    }

    #[must_use]
    pub const fn span(&self) -> AreaSpan {
        AreaSpan {
            address: self.address,
            size: self.size,
            kind: self.kind,
            page_count: self.page_count,
            phys_addr: self.phys_addr,
        }
    }
}

/// A copy of an area's bookkeeping, safe to hold without the registry lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AreaSpan {
    pub address: VirtualAddress,
    pub size: u64,
    pub kind: AreaKind,
    pub page_count: usize,
    pub phys_addr: Option<PhysicalAddress>,
}

impl AreaSpan {
    #[inline]
    #[must_use]
    pub const fn mapped_end(&self) -> VirtualAddress {
        VirtualAddress::new(self.address.as_u64() + self.size - PAGE_SIZE)
    }
}

/// One `/proc/vmallocinfo`-style line.
impl fmt::Display for AreaSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-0x{:016X} {:>10} {}",
            self.address,
            self.address.as_u64() + self.size,
            self.size,
            self.kind
        )?;
        if self.page_count > 0 {
            write!(f, " pages={}", self.page_count)?;
        }
        if let Some(pa) = self.phys_addr {
            write!(f, " phys={pa}")?;
        }
        Ok(())
    }
}
