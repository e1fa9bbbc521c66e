//! # Simulated Physical Memory
//!
//! A fixed pool of 4 KiB frames living in ordinary heap memory, standing in
//! for RAM, the frame allocator, and TLB maintenance on hosted builds.
//!
//! - Frames get fake physical addresses starting at [`SimulatedMemory::DEFAULT_BASE`].
//! - [`fail_after`](SimulatedMemory::fail_after) injects allocation failures.
//! - [`GfpFlags::dma32`] requests only see frames below [`GfpFlags::DMA32_LIMIT`].
//! - Every allocation, free, and flush is appended to an event log so the
//!   ordering of page release against TLB maintenance can be checked.
//!
//! ```rust
//! # use kernel_vmem::sim::SimulatedMemory;
//! # use kernel_vmem::{FrameAlloc, GfpFlags};
//! let mem = SimulatedMemory::new(4);
//! let page = mem.alloc_page(GfpFlags::kernel()).unwrap();
//! assert_eq!(mem.allocated_pages(), 1);
//! mem.free_page(page);
//! assert_eq!(mem.allocated_pages(), 0);
//! ```

use crate::{
    FrameAlloc, GfpFlags, PAGE_SIZE, PhysMapper, PhysicalAddress, PhysicalPage, TlbFlush,
    VirtualAddress,
};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_sync::SpinLock;

/// Something that happened to the simulated machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SimEvent {
    Alloc(PhysicalPage),
    Free(PhysicalPage),
    FlushAfterMap(VirtualAddress, VirtualAddress),
    FlushBeforeUnmap(VirtualAddress, VirtualAddress),
    FlushKernelRange(VirtualAddress, VirtualAddress),
}

#[repr(C, align(4096))]
struct SimFrame(UnsafeCell<[u8; PAGE_SIZE as usize]>);

struct SimState {
    /// Free frame indices; popped from the back.
    free: Vec<usize>,
    in_use: Vec<bool>,
    /// Remaining successful allocations before failures start.
    budget: Option<usize>,
    events: Vec<SimEvent>,
}

/// In-memory RAM implementing [`FrameAlloc`], [`PhysMapper`], and [`TlbFlush`].
pub struct SimulatedMemory {
    base: u64,
    frames: Box<[SimFrame]>,
    state: SpinLock<SimState>,
}

// SAFETY: frame contents are only reached through raw pointers handed out by
// `phys_to_ptr`; callers synchronize access the same way they would for real
// RAM. All bookkeeping sits behind the spin lock.
unsafe impl Sync for SimulatedMemory {}

impl SimulatedMemory {
    /// Physical address of the first simulated frame.
    pub const DEFAULT_BASE: u64 = 0x10_0000;

    /// A pool of `frames` zeroed frames at [`DEFAULT_BASE`](Self::DEFAULT_BASE).
    #[must_use]
    pub fn new(frames: usize) -> Self {
        Self::with_base(Self::DEFAULT_BASE, frames)
    }

    /// A pool of `frames` zeroed frames at physical address `base`.
    ///
    /// ### Debug assertions
    /// - Asserts `base` is 4 KiB aligned.
    #[must_use]
    pub fn with_base(base: u64, frames: usize) -> Self {
        debug_assert!(base.is_multiple_of(PAGE_SIZE));
        let pool: Box<[SimFrame]> = (0..frames)
            .map(|_| SimFrame(UnsafeCell::new([0; PAGE_SIZE as usize])))
            .collect();
        Self {
            base,
            frames: pool,
            state: SpinLock::new(SimState {
                free: (0..frames).rev().collect(),
                in_use: alloc::vec![false; frames],
                budget: None,
                events: Vec::new(),
            }),
        }
    }

    /// Let `n` more allocations succeed, then fail every following one.
    pub fn fail_after(&self, n: usize) {
        self.state.lock().budget = Some(n);
    }

    /// Stop injecting allocation failures.
    pub fn clear_failure(&self) {
        self.state.lock().budget = None;
    }

    /// Frames currently handed out.
    #[must_use]
    pub fn allocated_pages(&self) -> usize {
        let state = self.state.lock();
        state.in_use.len() - state.free.len()
    }

    #[must_use]
    pub fn is_allocated(&self, page: PhysicalPage) -> bool {
        self.index_of(page.base())
            .is_some_and(|i| self.state.lock().in_use[i])
    }

    /// Snapshot of the event log.
    #[must_use]
    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Physical page of frame number `index`.
    #[must_use]
    pub const fn frame(&self, index: usize) -> PhysicalPage {
        PhysicalPage::from_addr(PhysicalAddress::new(self.base + index as u64 * PAGE_SIZE))
    }

    fn index_of(&self, pa: PhysicalAddress) -> Option<usize> {
        let offset = pa.as_u64().checked_sub(self.base)?;
        let index = usize::try_from(offset / PAGE_SIZE).ok()?;
        (index < self.frames.len()).then_some(index)
    }

    fn record(&self, event: SimEvent) {
        self.state.lock().events.push(event);
    }
}

impl FrameAlloc for SimulatedMemory {
    fn alloc_page(&self, gfp: GfpFlags) -> Option<PhysicalPage> {
        let mut state = self.state.lock();
        if let Some(budget) = state.budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }

        let index = if gfp.dma32() {
            let below = |&i: &usize| self.frame(i).base().as_u64() < GfpFlags::DMA32_LIMIT;
            let slot = state.free.iter().rposition(below)?;
            state.free.remove(slot)
        } else {
            state.free.pop()?
        };
        state.in_use[index] = true;
        let page = self.frame(index);
        state.events.push(SimEvent::Alloc(page));

        if gfp.zero() {
            // SAFETY: the frame was free until now.
            unsafe { self.zero_frame(page) };
        }
        Some(page)
    }

    /// # Panics
    /// On a frame outside the pool or one that is not allocated.
    fn free_page(&self, page: PhysicalPage) {
        let Some(index) = self.index_of(page.base()) else {
            panic!("freeing frame {page:?} outside simulated memory");
        };
        let mut state = self.state.lock();
        assert!(state.in_use[index], "double free of frame {page:?}");
        state.in_use[index] = false;
        state.free.push(index);
        state.events.push(SimEvent::Free(page));
    }

    fn total_pages(&self) -> u64 {
        self.frames.len() as u64
    }
}

impl PhysMapper for SimulatedMemory {
    /// # Panics
    /// If `pa` lies outside the simulated pool.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        let Some(index) = self.index_of(pa) else {
            panic!("physical address {pa} outside simulated memory");
        };
        let frame = self.frames[index].0.get().cast::<u8>();
        // SAFETY: the in-page offset stays inside the frame.
        unsafe { frame.add(pa.page_offset() as usize) }
    }
}

impl TlbFlush for SimulatedMemory {
    fn flush_range_after_map(&self, start: VirtualAddress, end: VirtualAddress) {
        self.record(SimEvent::FlushAfterMap(start, end));
    }

    fn flush_range_before_unmap(&self, start: VirtualAddress, end: VirtualAddress) {
        self.record(SimEvent::FlushBeforeUnmap(start, end));
    }

    fn flush_kernel_range(&self, start: VirtualAddress, end: VirtualAddress) {
        self.record(SimEvent::FlushKernelRange(start, end));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_allocation_is_base_frame() {
        let mem = SimulatedMemory::new(2);
        let page = mem.alloc_page(GfpFlags::kernel()).expect("frame");
        assert_eq!(page.base().as_u64(), SimulatedMemory::DEFAULT_BASE);
        assert!(mem.is_allocated(page));
    }

    #[test]
    fn exhaustion_and_budget() {
        let mem = SimulatedMemory::new(3);
        mem.fail_after(1);
        assert!(mem.alloc_page(GfpFlags::kernel()).is_some());
        assert!(mem.alloc_page(GfpFlags::kernel()).is_none());
        mem.clear_failure();
        assert!(mem.alloc_page(GfpFlags::kernel()).is_some());
        assert!(mem.alloc_page(GfpFlags::kernel()).is_some());
        assert!(mem.alloc_page(GfpFlags::kernel()).is_none());
        assert_eq!(mem.allocated_pages(), 3);
    }

    #[test]
    fn zero_flag_clears_reused_frame() {
        let mem = SimulatedMemory::new(1);
        let page = mem.alloc_page(GfpFlags::kernel()).expect("frame");
        unsafe { mem.copy_to_phys(page.at(8), &[0xAA; 4]) };
        mem.free_page(page);

        let page = mem.alloc_page(GfpFlags::kernel().with_zero(true)).expect("frame");
        let mut buf = [0xFF; 4];
        unsafe { mem.copy_from_phys(page.at(8), &mut buf) };
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn dma32_skips_frames_above_4gib() {
        // Frame 0 sits just below the limit, frame 1 starts on it.
        let mem = SimulatedMemory::with_base(GfpFlags::DMA32_LIMIT - PAGE_SIZE, 3);
        let dma32 = GfpFlags::kernel().with_dma32(true);

        assert_eq!(mem.alloc_page(dma32), Some(mem.frame(0)));
        assert_eq!(mem.alloc_page(dma32), None);
        assert_eq!(mem.alloc_page(GfpFlags::kernel()), Some(mem.frame(1)));

        mem.free_page(mem.frame(0));
        assert_eq!(mem.alloc_page(dma32), Some(mem.frame(0)));
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mem = SimulatedMemory::new(1);
        let page = mem.alloc_page(GfpFlags::kernel()).expect("frame");
        mem.free_page(page);
        mem.free_page(page);
    }
}
