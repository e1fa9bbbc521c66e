use bitfield_struct::bitfield;

/// Allocation policy handed through to the physical page allocator.
///
/// The vmalloc layer never interprets these bits beyond passing them on,
/// except that page-handle arrays never ask for high memory.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct GfpFlags {
    /// The allocator may sleep waiting for reclamation.
    pub may_block: bool,
    /// The allocator may start I/O to reclaim memory.
    pub may_io: bool,
    /// The allocator may call into filesystems to reclaim memory.
    pub may_fs: bool,
    /// High memory (not permanently mapped) is acceptable.
    pub highmem: bool,
    /// Hand out zero-filled pages.
    pub zero: bool,
    /// Restrict to 32-bit addressable physical memory.
    pub dma32: bool,
    #[bits(26)]
    __reserved: u32,
}

impl GfpFlags {
    /// Frames handed out under [`dma32`](Self::dma32) lie below this address.
    pub const DMA32_LIMIT: u64 = 1 << 32;

    /// Regular, blocking kernel allocation.
    #[inline]
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new()
            .with_may_block(true)
            .with_may_io(true)
            .with_may_fs(true)
    }

    /// Kernel allocation that accepts high memory (the `vmalloc` default).
    #[inline]
    #[must_use]
    pub const fn kernel_highmem() -> Self {
        Self::kernel().with_highmem(true)
    }

    #[inline]
    #[must_use]
    pub const fn without_highmem(self) -> Self {
        self.with_highmem(false)
    }
}
