use crate::addresses::{PhysicalAddress, PhysicalPage};
use bitfield_struct::bitfield;

/// One 64-bit x86-64 paging-structure entry, valid at every level.
///
/// Directory entries (PML4E, PDPTE, PDE) point at the next table; leaf
/// entries (PTE) map one 4 KiB page. The vmalloc window never uses huge
/// pages, so `large_page` must stay clear on every entry this crate writes.
///
/// ### Bit layout
///
/// | Bits   | Field              |
/// |--------|--------------------|
/// | 0      | present            |
/// | 1      | writable           |
/// | 2      | user_access        |
/// | 3      | write_through      |
/// | 4      | cache_disabled     |
/// | 5      | accessed           |
/// | 6      | dirty              |
/// | 7      | large_page (PS)    |
/// | 8      | global_translation |
/// | 9–11   | OS available       |
/// | 12–51  | frame address      |
/// | 52–62  | OS available / PKU |
/// | 63     | no_execute         |
///
/// ### Example
/// ```rust
/// # use kernel_vmem::{PageEntryBits, PhysicalAddress, PhysicalPage};
/// let frame = PhysicalPage::from_addr(PhysicalAddress::new(0x12_3000));
/// let e = PageEntryBits::leaf(frame, PageEntryBits::page_kernel());
/// assert!(e.present());
/// assert_eq!(e.frame(), frame);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    pub present: bool,
    pub writable: bool,
    pub user_access: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub accessed: bool,
    pub dirty: bool,
    pub large_page: bool,
    pub global_translation: bool,
    #[bits(3)]
    pub os_available_low: u8,
    /// Physical address bits [51:12].
    #[bits(40)]
    phys_addr_bits_51_12: u64,
    #[bits(11)]
    pub os_available_high: u16,
    pub no_execute: bool,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_51_12(phys.as_u64() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_51_12() << 12)
    }

    /// The frame referenced by this entry (next table or mapped page).
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> PhysicalPage {
        PhysicalPage::from_addr(self.physical_address())
    }

    /// `true` for an all-zero entry, i.e. one that was never populated.
    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.into_bits() == 0
    }

    /// A populated directory entry that cannot point at a kernel table:
    /// not present, a huge page, or user-accessible.
    #[inline]
    #[must_use]
    pub const fn is_bad_directory(self) -> bool {
        !self.is_none() && (!self.present() || self.large_page() || self.user_access())
    }

    /// Build a present 4 KiB leaf for `frame` with `prot`.
    #[inline]
    #[must_use]
    pub const fn leaf(frame: PhysicalPage, prot: Self) -> Self {
        let mut e = prot.with_present(true).with_large_page(false);
        e.set_physical_address(frame.base());
        e
    }

    /// Build a directory entry pointing at the next-level `table`.
    #[inline]
    #[must_use]
    pub const fn table(table: PhysicalPage) -> Self {
        let mut e = Self::kernel_table();
        e.set_physical_address(table.base());
        e
    }

    /// Flags for kernel directory entries.
    #[inline]
    #[must_use]
    pub const fn kernel_table() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_accessed(true)
            .with_dirty(true)
    }

    /// Default protection for kernel data: read/write, no-execute, global.
    #[inline]
    #[must_use]
    pub const fn page_kernel() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_accessed(true)
            .with_dirty(true)
            .with_global_translation(true)
            .with_no_execute(true)
    }

    /// Kernel read/write/execute.
    #[inline]
    #[must_use]
    pub const fn page_kernel_exec() -> Self {
        Self::page_kernel().with_no_execute(false)
    }

    /// Kernel read-only data.
    #[inline]
    #[must_use]
    pub const fn page_kernel_ro() -> Self {
        Self::page_kernel().with_writable(false)
    }

    /// Uncached kernel mapping, used for device memory.
    #[inline]
    #[must_use]
    pub const fn page_kernel_nocache() -> Self {
        Self::page_kernel()
            .with_cache_disabled(true)
            .with_write_through(true)
    }
}
