//! # Allocation Engine
//!
//! [`Vmalloc`] owns the area registry and the kernel page-table tree and ties
//! them to the frame allocator, the physical mapper, and TLB maintenance.
//!
//! ## Locking
//!
//! - The registry sits behind a reader/writer spin lock. Reservation, removal,
//!   and page attachment take it exclusively; lookups and the copy helpers
//!   share it.
//! - The page tables sit behind a spin lock of their own.
//! - When both are needed the registry is locked first.
//!
//! Removal keeps the registry write lock across "flush, unmap, flush,
//! detach". Frames are returned to the allocator only after that, so neither
//! a stale translation nor a reused address can reach a freed frame.

use crate::area::{AreaKind, AreaSpan, VirtualArea};
use crate::page_array::PageArray;
use crate::registry::AreaRegistry;
use crate::{VmallocConfig, VmallocError};
use alloc::vec::Vec;
use kernel_sync::{RwSpinLock, SpinLock};
use kernel_vmem::address_space::AddressSpace;
use kernel_vmem::walker::{map_range, translate, unmap_range};
use kernel_vmem::{
    FrameAlloc, GfpFlags, PAGE_SIZE, PageEntryBits, PhysMapper, PhysicalAddress, PhysicalPage,
    TlbFlush, VirtualAddress, checked_align_up,
};
use log::{debug, error, trace, warn};

/// How deep handle arrays may nest: an allocation's array may itself be
/// vmalloc'd, and so may that array's array, but no further.
pub const MAX_ARRAY_DEPTH: usize = 2;

/// The kernel's virtually contiguous memory allocator.
pub struct Vmalloc<'m, M: PhysMapper, A: FrameAlloc, F: TlbFlush> {
    registry: RwSpinLock<AreaRegistry>,
    tables: SpinLock<AddressSpace<'m, M>>,
    mapper: &'m M,
    frames: &'m A,
    tlb: &'m F,
    config: VmallocConfig,
}

impl<'m, M: PhysMapper, A: FrameAlloc, F: TlbFlush> Vmalloc<'m, M, A, F> {
    /// Create an allocator with a fresh, empty kernel page-table tree.
    ///
    /// # Errors
    /// [`VmallocError::OutOfMemory`] if the root table cannot be allocated.
    pub fn new(
        config: VmallocConfig,
        mapper: &'m M,
        frames: &'m A,
        tlb: &'m F,
    ) -> Result<Self, VmallocError> {
        let space = AddressSpace::new(mapper, frames)?;
        Ok(Self::with_space(config, space, mapper, frames, tlb))
    }

    /// Create an allocator over an existing kernel PML4.
    pub const fn with_root(
        config: VmallocConfig,
        root: PhysicalPage,
        mapper: &'m M,
        frames: &'m A,
        tlb: &'m F,
    ) -> Self {
        Self::with_space(config, AddressSpace::from_root(mapper, root), mapper, frames, tlb)
    }

    const fn with_space(
        config: VmallocConfig,
        space: AddressSpace<'m, M>,
        mapper: &'m M,
        frames: &'m A,
        tlb: &'m F,
    ) -> Self {
        Self {
            registry: RwSpinLock::new(AreaRegistry::new()),
            tables: SpinLock::new(space),
            mapper,
            frames,
            tlb,
            config,
        }
    }

    #[inline]
    pub const fn config(&self) -> &VmallocConfig {
        &self.config
    }

    #[inline]
    pub fn root_page(&self) -> PhysicalPage {
        self.tables.lock().root_page()
    }

    /// Reserve `size` bytes (plus a guard page) in the configured window.
    ///
    /// # Errors
    /// [`VmallocError::OutOfSpace`] if the window has no large enough gap.
    pub fn get_vm_area(&self, size: u64, kind: AreaKind) -> Result<AreaSpan, VmallocError> {
        self.get_vm_area_in(size, kind, self.config.start(), self.config.end())
    }

    /// Reserve `size` bytes (plus a guard page) in `[start, end)`.
    ///
    /// # Errors
    /// [`VmallocError::OutOfSpace`] if the range has no large enough gap.
    pub fn get_vm_area_in(
        &self,
        size: u64,
        kind: AreaKind,
        start: VirtualAddress,
        end: VirtualAddress,
    ) -> Result<AreaSpan, VmallocError> {
        self.registry
            .write()
            .reserve(size, kind, start, end)
            .inspect_err(|_| warn!("vmalloc: allocation failed, no virtual space for {size:#x} bytes"))
    }

    /// Unmap the area starting at `address` and remove it from the registry.
    ///
    /// Frames are not released; the detached area is handed back to
    /// [`teardown`](Self::teardown), which does that once the translations are gone.
    ///
    /// # Errors
    /// [`VmallocError::NotFound`] if no area starts at `address`.
    pub(crate) fn remove_vm_area(&self, address: VirtualAddress) -> Result<VirtualArea, VmallocError> {
        let mut registry = self.registry.write();
        let Some(area) = registry.get(address) else {
            return Err(VmallocError::NotFound(address));
        };

        let (start, end) = (area.address(), area.mapped_end());
        self.tlb.flush_range_before_unmap(start, end);
        let cleared = unmap_range(&mut *self.tables.lock(), start, end);
        self.tlb.flush_kernel_range(start, end);
        trace!("vmalloc: unmapped {cleared} pages at {start}");

        registry.remove(address)
    }

    /// Map the area starting at `address` onto frames pulled from `pages`.
    ///
    /// On error the entries installed so far stay in place; tear the area
    /// down to get rid of them.
    ///
    /// # Errors
    /// - [`VmallocError::NotFound`] if no area starts at `address`.
    /// - [`VmallocError::OutOfMemory`] if a directory cannot be allocated or
    ///   `pages` runs out.
    ///
    /// # Panics
    /// If any page of the area is already mapped.
    pub fn map_vm_area<I>(
        &self,
        address: VirtualAddress,
        prot: PageEntryBits,
        pages: &mut I,
    ) -> Result<(), VmallocError>
    where
        I: Iterator<Item = PhysicalPage>,
    {
        let span = self
            .registry
            .read()
            .get(address)
            .map(VirtualArea::span)
            .ok_or(VmallocError::NotFound(address))?;

        let end = span.mapped_end();
        {
            let mut tables = self.tables.lock();
            map_range(&mut *tables, self.frames, address, end, prot, pages)?;
        }
        self.tlb.flush_range_after_map(address, end);
        Ok(())
    }

    /// Allocate `size` bytes of virtually contiguous kernel memory.
    ///
    /// Uses the regular kernel policy (high memory allowed) and
    /// [`PageEntryBits::page_kernel`] protection.
    ///
    /// # Errors
    /// See [`vmalloc_with`](Self::vmalloc_with).
    pub fn vmalloc(&self, size: u64) -> Result<VirtualAddress, VmallocError> {
        self.vmalloc_with(size, GfpFlags::kernel_highmem(), PageEntryBits::page_kernel())
    }

    /// Like [`vmalloc`](Self::vmalloc), but the memory is executable.
    ///
    /// # Errors
    /// See [`vmalloc_with`](Self::vmalloc_with).
    pub fn vmalloc_exec(&self, size: u64) -> Result<VirtualAddress, VmallocError> {
        self.vmalloc_with(size, GfpFlags::kernel_highmem(), PageEntryBits::page_kernel_exec())
    }

    /// Like [`vmalloc`](Self::vmalloc), but backed only by frames below
    /// [`GfpFlags::DMA32_LIMIT`].
    ///
    /// # Errors
    /// See [`vmalloc_with`](Self::vmalloc_with).
    pub fn vmalloc_32(&self, size: u64) -> Result<VirtualAddress, VmallocError> {
        self.vmalloc_with(size, GfpFlags::kernel().with_dma32(true), PageEntryBits::page_kernel())
    }

    /// Allocate `size` bytes with an explicit frame policy and protection.
    ///
    /// May block; must not be called from interrupt context.
    ///
    /// # Errors
    /// - [`VmallocError::OutOfMemory`] for a zero size, a size larger than
    ///   all of physical memory, or when frames run out.
    /// - [`VmallocError::OutOfSpace`] if the window is exhausted.
    pub fn vmalloc_with(
        &self,
        size: u64,
        gfp: GfpFlags,
        prot: PageEntryBits,
    ) -> Result<VirtualAddress, VmallocError> {
        self.allocate(size, gfp, prot, 0)
    }

    fn allocate(
        &self,
        size: u64,
        gfp: GfpFlags,
        prot: PageEntryBits,
        depth: usize,
    ) -> Result<VirtualAddress, VmallocError> {
        let size = checked_align_up(size, PAGE_SIZE).ok_or(VmallocError::OutOfMemory)?;
        let pages = size / PAGE_SIZE;
        if pages == 0 || pages > self.frames.total_pages() {
            return Err(VmallocError::OutOfMemory);
        }
        let count = usize::try_from(pages).map_err(|_| VmallocError::OutOfMemory)?;

        let address = self.get_vm_area(size, AreaKind::Alloc)?.address;

        let mut array = match self.alloc_page_array(count, gfp, depth) {
            Ok(array) => array,
            Err(e) => {
                self.unwind(address);
                return Err(e);
            }
        };

        let mut obtained = 0;
        while obtained < count {
            let Some(page) = self.frames.alloc_page(gfp) else {
                break;
            };
            array.set(self.mapper, obtained, page);
            obtained += 1;
        }

        let mapped = if obtained == count {
            self.map_vm_area(address, prot, &mut array.iter(self.mapper, count))
        } else {
            warn!("vmalloc: only {obtained} of {count} pages available");
            Err(VmallocError::OutOfMemory)
        };

        self.attach(address, array, obtained);
        match mapped {
            Ok(()) => {
                debug!("vmalloc: {size:#x} bytes at {address}");
                Ok(address)
            }
            Err(e) => {
                self.unwind(address);
                Err(e)
            }
        }
    }

    /// Storage for `count` frame handles; vmalloc'd if it exceeds one page.
    fn alloc_page_array(
        &self,
        count: usize,
        gfp: GfpFlags,
        depth: usize,
    ) -> Result<PageArray, VmallocError> {
        if PageArray::fits_inline(count) {
            return PageArray::inline(count);
        }
        if depth >= MAX_ARRAY_DEPTH {
            warn!("vmalloc: page array for {count} pages nests too deep");
            return Err(VmallocError::OutOfMemory);
        }

        let bytes = PageArray::bytes_for(count);
        let base = self.allocate(
            bytes,
            gfp.without_highmem().with_zero(true),
            PageEntryBits::page_kernel(),
            depth + 1,
        )?;

        let backing = match self.backing_frames(base) {
            Ok(backing) => backing,
            Err(e) => {
                self.unwind(base);
                return Err(e);
            }
        };
        for &frame in &backing {
            // SAFETY: the frames belong to the area just allocated above and
            // nothing else has seen them yet.
            unsafe { self.mapper.zero_frame(frame) };
        }

        Ok(PageArray::Vmapped {
            base,
            len: count,
            backing,
        })
    }

    /// Frames backing the `Alloc` area at `base`, in address order.
    fn backing_frames(&self, base: VirtualAddress) -> Result<Vec<PhysicalPage>, VmallocError> {
        let registry = self.registry.read();
        let area = registry.get(base).ok_or(VmallocError::NotFound(base))?;
        let mut frames = Vec::new();
        frames
            .try_reserve_exact(area.page_count())
            .map_err(|_| VmallocError::OutOfMemory)?;
        frames.extend(area.pages.iter(self.mapper, area.page_count()));
        Ok(frames)
    }

    fn attach(&self, address: VirtualAddress, pages: PageArray, page_count: usize) {
        let mut registry = self.registry.write();
        if let Some(area) = registry.get_mut(address) {
            area.pages = pages;
            area.page_count = page_count;
        } else {
            error!("vmalloc: area at {address} vanished before its pages were attached");
        }
    }

    /// Teardown after a failed allocation.
    fn unwind(&self, address: VirtualAddress) {
        if let Err(e) = self.teardown(address, true) {
            error!("vmalloc: unwinding failed allocation at {address}: {e}");
        }
    }

    /// Remove and unmap the area at `address`; release its frames and handle
    /// array if `release_pages` is set.
    fn teardown(&self, address: VirtualAddress, release_pages: bool) -> Result<(), VmallocError> {
        let area = self.remove_vm_area(address)?;
        if release_pages {
            self.release(area);
        }
        Ok(())
    }

    fn release(&self, area: VirtualArea) {
        for page in area.pages.iter(self.mapper, area.page_count) {
            self.frames.free_page(page);
        }
        if let Some(base) = area.pages.vmapped_base() {
            self.unwind(base);
        }
        trace!(
            "vmalloc: released {} pages of {}",
            area.page_count,
            area.address()
        );
    }

    /// Release the memory returned by [`vmalloc`](Self::vmalloc).
    ///
    /// A null address is ignored. Unknown or misaligned addresses are
    /// reported and otherwise ignored. May block; must not be called from
    /// interrupt context.
    pub fn vfree(&self, address: VirtualAddress) {
        if address.as_u64() == 0 {
            return;
        }
        if !address.is_page_aligned() {
            error!("vmalloc: trying to vfree() bad address ({address})");
            debug_assert!(address.is_page_aligned(), "vfree() of misaligned address {address}");
            return;
        }
        if let Err(VmallocError::NotFound(_)) = self.teardown(address, true) {
            error!("vmalloc: trying to vfree() nonexistent vm area ({address})");
        }
    }

    /// Map `pages` contiguously into the vmalloc window.
    ///
    /// The frames stay owned by the caller.
    ///
    /// # Errors
    /// - [`VmallocError::OutOfMemory`] for an empty slice, more pages than
    ///   physical memory holds, or a failed directory allocation.
    /// - [`VmallocError::OutOfSpace`] if the window is exhausted.
    pub fn vmap(
        &self,
        pages: &[PhysicalPage],
        prot: PageEntryBits,
    ) -> Result<VirtualAddress, VmallocError> {
        let count = pages.len() as u64;
        if count == 0 || count > self.frames.total_pages() {
            return Err(VmallocError::OutOfMemory);
        }

        let address = self.get_vm_area(count * PAGE_SIZE, AreaKind::Map)?.address;
        if let Err(e) = self.map_vm_area(address, prot, &mut pages.iter().copied()) {
            if let Err(e) = self.teardown(address, false) {
                error!("vmalloc: unwinding failed vmap at {address}: {e}");
            }
            return Err(e);
        }
        Ok(address)
    }

    /// Undo a [`vmap`](Self::vmap). The frames are not released.
    pub fn vunmap(&self, address: VirtualAddress) {
        if !address.is_page_aligned() {
            error!("vmalloc: trying to vunmap() bad address ({address})");
            debug_assert!(address.is_page_aligned(), "vunmap() of misaligned address {address}");
            return;
        }
        if let Err(VmallocError::NotFound(_)) = self.teardown(address, false) {
            error!("vmalloc: trying to vunmap() nonexistent vm area ({address})");
        }
    }

    /// Map `size` bytes of device memory at `phys` into the vmalloc window.
    ///
    /// The returned address carries `phys`'s offset within its page.
    ///
    /// # Errors
    /// - [`VmallocError::OutOfMemory`] for an empty or wrapping range, or a
    ///   failed directory allocation.
    /// - [`VmallocError::OutOfSpace`] if the window is exhausted.
    pub fn ioremap(
        &self,
        phys: PhysicalAddress,
        size: u64,
        prot: PageEntryBits,
    ) -> Result<VirtualAddress, VmallocError> {
        let last = phys
            .as_u64()
            .checked_add(size)
            .filter(|_| size > 0)
            .ok_or(VmallocError::OutOfMemory)?;
        let offset = phys.page_offset();
        let first = phys.page();
        let span_end = checked_align_up(last, PAGE_SIZE).ok_or(VmallocError::OutOfMemory)?;
        let size = span_end - first.base().as_u64();

        let address = self.get_vm_area(size, AreaKind::IoRemap)?.address;
        if let Some(area) = self.registry.write().get_mut(address) {
            area.phys_addr = Some(first.base());
        }

        let mut frames = (0..size / PAGE_SIZE)
            .map(|i| PhysicalPage::from_addr(first.base() + i * PAGE_SIZE));
        if let Err(e) = self.map_vm_area(address, prot, &mut frames) {
            if let Err(e) = self.teardown(address, false) {
                error!("vmalloc: unwinding failed ioremap at {address}: {e}");
            }
            return Err(e);
        }

        debug!("vmalloc: ioremap {phys} ({size:#x} bytes) at {address}");
        Ok(address + offset)
    }

    /// Undo an [`ioremap`](Self::ioremap). `address` may carry the in-page offset.
    pub fn iounmap(&self, address: VirtualAddress) {
        let base = address.page_base();
        if let Err(VmallocError::NotFound(_)) = self.teardown(base, false) {
            error!("vmalloc: trying to iounmap() nonexistent vm area ({address})");
        }
    }

    /// Physical address currently mapped at `va`.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        translate(&mut *self.tables.lock(), va)
    }

    /// The area whose reservation covers `va`.
    #[must_use]
    pub fn find_area(&self, va: VirtualAddress) -> Option<AreaSpan> {
        self.registry.read().find_containing(va).map(VirtualArea::span)
    }

    /// Snapshot of all areas in address order.
    #[must_use]
    pub fn area_spans(&self) -> Vec<AreaSpan> {
        self.registry.read().iter().map(VirtualArea::span).collect()
    }

    pub(crate) fn registry(&self) -> &RwSpinLock<AreaRegistry> {
        &self.registry
    }

    pub(crate) fn mapper(&self) -> &M {
        self.mapper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_vmem::sim::SimulatedMemory;

    type SimVmalloc<'m> = Vmalloc<'m, SimulatedMemory, SimulatedMemory, SimulatedMemory>;

    fn vm(mem: &SimulatedMemory) -> SimVmalloc<'_> {
        Vmalloc::new(VmallocConfig::default(), mem, mem, mem).expect("vmalloc")
    }

    #[test]
    fn page_array_nesting_is_capped() {
        let mem = SimulatedMemory::new(1100);
        let vm = vm(&mem);
        let baseline = mem.allocated_pages();

        let res = vm.allocate(
            513 * PAGE_SIZE,
            GfpFlags::kernel(),
            PageEntryBits::page_kernel(),
            MAX_ARRAY_DEPTH,
        );
        assert_eq!(res, Err(VmallocError::OutOfMemory));
        assert!(vm.area_spans().is_empty());
        assert_eq!(mem.allocated_pages(), baseline);
    }

    #[test]
    fn page_array_one_level_below_the_cap() {
        let mem = SimulatedMemory::new(1100);
        let vm = vm(&mem);

        let addr = vm
            .allocate(
                513 * PAGE_SIZE,
                GfpFlags::kernel(),
                PageEntryBits::page_kernel(),
                MAX_ARRAY_DEPTH - 1,
            )
            .expect("alloc");
        let spans = vm.area_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(vm.find_area(addr).map(|s| s.page_count), Some(513));

        vm.vfree(addr);
        assert!(vm.area_spans().is_empty());
    }
}
