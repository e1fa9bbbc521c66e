//! # Kernel Page-Table Support
//!
//! Building blocks for mapping kernel virtual address ranges onto physical
//! page frames on x86-64 with 4-level paging.
//!
//! ## What you get
//! - [`VirtualAddress`]/[`PhysicalAddress`] newtypes and [`PhysicalPage`] frame handles.
//! - [`PageEntryBits`], the bit layout shared by all paging levels.
//! - [`PageTable`] and [`Level`] describing table geometry.
//! - [`AddressSpace`], the kernel page-table tree, behind the [`TableTree`] trait.
//! - The [`walker`]: populate, clear, and translate linear address ranges.
//! - Collaborator traits the walker and the allocators above it build on:
//!   [`FrameAlloc`], [`PhysMapper`], and [`TlbFlush`].
//! - [`sim::SimulatedMemory`], an in-memory stand-in for physical RAM used
//!   for hosted runs and tests.
//!
//! ## Walk
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  4 KiB page
//! ```
//!
//! Directory tables are allocated on demand while mapping and never freed;
//! kernel page tables live as long as the kernel.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

extern crate alloc;

pub mod address_space;
mod addresses;
mod gfp;
mod page_entry_bits;
mod page_table;
pub mod sim;
pub mod walker;

pub use crate::address_space::{AddressSpace, Child, TableTree};
pub use crate::addresses::{PhysicalAddress, PhysicalPage, VirtualAddress};
pub use crate::gfp::GfpFlags;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{ENTRIES_PER_TABLE, Level, PageTable, TableIndex};
pub use crate::walker::MapError;

/// Re-export constants as info module.
pub use kernel_info::memory as info;
pub use kernel_info::memory::{PAGE_SHIFT, PAGE_SIZE};

/// Source of physical 4 KiB page frames.
///
/// Used both for data pages and for page-table directories. Implementations
/// must be safe to call from several CPUs at once; returned frames **must** be
/// 4 KiB aligned.
pub trait FrameAlloc {
    /// Allocate one frame according to `gfp`. Returns `None` on out-of-memory.
    fn alloc_page(&self, gfp: GfpFlags) -> Option<PhysicalPage>;

    /// Return a frame previously handed out by [`alloc_page`](Self::alloc_page).
    fn free_page(&self, page: PhysicalPage);

    /// Number of frames the allocator manages in total.
    fn total_pages(&self) -> u64;
}

/// Converts physical addresses to pointers usable in the current address
/// space (identity map, HHDM, or a simulated RAM in tests).
pub trait PhysMapper {
    /// Pointer to the byte at `pa`.
    ///
    /// The pointer is valid at least up to the end of the containing frame.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped as writable and hold a valid `T`.
    /// - The caller must guarantee no other reference to the same bytes is
    ///   alive for `'a`.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr(pa).cast::<T>() }
    }

    /// Copy `dst.len()` bytes starting at `pa`.
    ///
    /// # Safety
    /// The range must stay inside the frame containing `pa`.
    #[inline]
    unsafe fn copy_from_phys(&self, pa: PhysicalAddress, dst: &mut [u8]) {
        debug_assert!(pa.page_offset() + dst.len() as u64 <= PAGE_SIZE);
        unsafe {
            core::ptr::copy_nonoverlapping(self.phys_to_ptr(pa), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Copy `src` into physical memory starting at `pa`.
    ///
    /// # Safety
    /// The range must stay inside the frame containing `pa`.
    #[inline]
    unsafe fn copy_to_phys(&self, pa: PhysicalAddress, src: &[u8]) {
        debug_assert!(pa.page_offset() + src.len() as u64 <= PAGE_SIZE);
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr(), self.phys_to_ptr(pa), src.len());
        }
    }

    /// Fill one frame with zeros.
    ///
    /// # Safety
    /// The frame must not be referenced elsewhere.
    #[inline]
    unsafe fn zero_frame(&self, page: PhysicalPage) {
        unsafe {
            core::ptr::write_bytes(self.phys_to_ptr(page.base()), 0, PAGE_SIZE as usize);
        }
    }
}

/// Translation-cache maintenance around kernel mapping changes.
///
/// `end` is exclusive in all three calls.
pub trait TlbFlush {
    /// Make freshly installed entries in `[start, end)` visible.
    fn flush_range_after_map(&self, start: VirtualAddress, end: VirtualAddress);

    /// Write back caches for `[start, end)` before its entries are cleared.
    fn flush_range_before_unmap(&self, start: VirtualAddress, end: VirtualAddress);

    /// Drop every cached translation for `[start, end)`.
    fn flush_kernel_range(&self, start: VirtualAddress, end: VirtualAddress);
}

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`, or `None` on overflow.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_vmem::checked_align_up;
/// assert_eq!(checked_align_up(1, 4096), Some(4096));
/// assert_eq!(checked_align_up(4096, 4096), Some(4096));
/// assert_eq!(checked_align_up(u64::MAX, 4096), None);
/// ```
#[inline(always)]
#[must_use]
pub const fn checked_align_up(x: u64, a: u64) -> Option<u64> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}
