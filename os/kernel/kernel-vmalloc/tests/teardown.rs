use kernel_vmalloc::{AreaKind, Vmalloc, VmallocConfig, VmallocError};
use kernel_vmem::sim::{SimEvent, SimulatedMemory};
use kernel_vmem::{
    FrameAlloc, GfpFlags, PAGE_SIZE, PageEntryBits, PhysicalAddress, PhysicalPage, VirtualAddress,
};
use std::sync::atomic::{AtomicUsize, Ordering};

fn vm(mem: &SimulatedMemory) -> Vmalloc<'_, SimulatedMemory, SimulatedMemory, SimulatedMemory> {
    Vmalloc::new(VmallocConfig::default(), mem, mem, mem).expect("vmalloc")
}

#[test]
fn double_free_is_harmless() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let addr = vm.vmalloc(2 * PAGE_SIZE).expect("alloc");
    let frames = mem.allocated_pages();

    vm.vfree(addr);
    assert_eq!(mem.allocated_pages(), frames - 2);
    vm.vfree(addr);
    assert_eq!(mem.allocated_pages(), frames - 2);
    assert!(vm.area_spans().is_empty());
}

#[test]
fn free_of_unknown_or_null_address_is_noop() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let addr = vm.vmalloc(PAGE_SIZE).expect("alloc");

    vm.vfree(VirtualAddress::new(0));
    vm.vfree(addr + 2 * PAGE_SIZE);
    vm.vunmap(addr + 2 * PAGE_SIZE);
    vm.iounmap(addr + 2 * PAGE_SIZE);
    assert_eq!(vm.area_spans().len(), 1);
    assert!(vm.translate(addr).is_some());
}

#[test]
#[cfg_attr(debug_assertions, should_panic(expected = "misaligned"))]
fn misaligned_free_is_rejected() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let addr = vm.vmalloc(PAGE_SIZE).expect("alloc");

    vm.vfree(addr + 1);
    assert_eq!(vm.area_spans().len(), 1);
    assert!(vm.translate(addr).is_some());
}

#[test]
fn page_exhaustion_unwinds_everything() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let baseline = mem.allocated_pages();

    mem.fail_after(2);
    assert_eq!(vm.vmalloc(4 * PAGE_SIZE), Err(VmallocError::OutOfMemory));
    mem.clear_failure();

    assert_eq!(mem.allocated_pages(), baseline);
    assert!(vm.area_spans().is_empty());

    // The window is reusable afterwards.
    let addr = vm.vmalloc(4 * PAGE_SIZE).expect("alloc");
    assert_eq!(addr, vm.config().start());
}

#[test]
fn directory_failure_unwinds_everything() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let baseline = mem.allocated_pages();

    // All four data pages succeed, the first directory does not.
    mem.fail_after(4);
    assert_eq!(vm.vmalloc(4 * PAGE_SIZE), Err(VmallocError::OutOfMemory));
    mem.clear_failure();

    assert_eq!(mem.allocated_pages(), baseline);
    assert!(vm.area_spans().is_empty());
    assert_eq!(vm.translate(vm.config().start()), None);
}

#[test]
fn frames_are_released_after_the_flush() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let addr = vm.vmalloc(3 * PAGE_SIZE).expect("alloc");
    let end = addr + 3 * PAGE_SIZE;

    let events = mem.events();
    let last_alloc = events
        .iter()
        .rposition(|e| matches!(e, SimEvent::Alloc(_)))
        .expect("alloc events");
    let mapped = events
        .iter()
        .position(|e| *e == SimEvent::FlushAfterMap(addr, end))
        .expect("flush after map");
    assert!(mapped > last_alloc);

    mem.clear_events();
    vm.vfree(addr);
    let events = mem.events();
    assert_eq!(events[0], SimEvent::FlushBeforeUnmap(addr, end));
    assert_eq!(events[1], SimEvent::FlushKernelRange(addr, end));
    assert_eq!(
        events[2..]
            .iter()
            .filter(|e| matches!(e, SimEvent::Free(_)))
            .count(),
        3
    );
    assert_eq!(events.len(), 5);
}

#[test]
fn vunmap_keeps_frames() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let frame = mem.alloc_page(GfpFlags::kernel()).expect("frame");

    let addr = vm.vmap(&[frame], PageEntryBits::page_kernel_ro()).expect("vmap");
    mem.clear_events();
    vm.vunmap(addr);

    assert!(mem.is_allocated(frame));
    assert!(!mem.events().iter().any(|e| matches!(e, SimEvent::Free(_))));
    assert!(vm.area_spans().is_empty());
}

#[test]
fn large_allocation_uses_vmapped_page_array() {
    let mem = SimulatedMemory::new(1200);
    let vm = vm(&mem);
    let pages = 600;

    let addr = vm.vmalloc(pages * PAGE_SIZE).expect("alloc");
    let spans = vm.area_spans();
    assert_eq!(spans.len(), 2);
    assert_eq!(spans[0].address, addr);
    assert_eq!(spans[0].page_count, 600);
    // 600 handles of 8 bytes need two pages of their own.
    assert_eq!(spans[1].kind, AreaKind::Alloc);
    assert_eq!(spans[1].page_count, 2);

    let last = addr + (pages - 1) * PAGE_SIZE;
    assert_eq!(vm.vwrite(&[0x42; 16], last), 16);
    let mut buf = [0; 16];
    assert_eq!(vm.vread(&mut buf, last), 16);
    assert_eq!(buf, [0x42; 16]);

    let with_directories = mem.allocated_pages();
    vm.vfree(addr);
    assert!(vm.area_spans().is_empty());
    assert_eq!(mem.allocated_pages(), with_directories - 602);
    assert_eq!(vm.translate(addr), None);
}

#[test]
fn large_allocation_unwinds_page_array() {
    let mem = SimulatedMemory::new(1200);
    let vm = vm(&mem);
    let warm = vm.vmalloc(600 * PAGE_SIZE).expect("alloc");
    vm.vfree(warm);
    let baseline = mem.allocated_pages();

    // The handle array (2 pages) succeeds, the data pages run out midway.
    mem.fail_after(100);
    assert_eq!(vm.vmalloc(600 * PAGE_SIZE), Err(VmallocError::OutOfMemory));
    mem.clear_failure();

    assert_eq!(mem.allocated_pages(), baseline);
    assert!(vm.area_spans().is_empty());
}

/// Holds back one frame and hands it out on a chosen later call.
struct DeferredFrame<'a> {
    mem: &'a SimulatedMemory,
    held: PhysicalPage,
    /// Calls left before `held` is returned; `usize::MAX` disarms.
    countdown: AtomicUsize,
}

impl FrameAlloc for DeferredFrame<'_> {
    fn alloc_page(&self, gfp: GfpFlags) -> Option<PhysicalPage> {
        match self.countdown.load(Ordering::Relaxed) {
            usize::MAX => self.mem.alloc_page(gfp),
            0 => {
                self.countdown.store(usize::MAX, Ordering::Relaxed);
                Some(self.held)
            }
            n => {
                self.countdown.store(n - 1, Ordering::Relaxed);
                self.mem.alloc_page(gfp)
            }
        }
    }

    fn free_page(&self, page: PhysicalPage) {
        self.mem.free_page(page);
    }

    fn total_pages(&self) -> u64 {
        self.mem.total_pages()
    }
}

#[test]
fn frame_at_physical_zero_in_large_allocation() {
    let mem = SimulatedMemory::with_base(0, 1300);
    let zero = mem.alloc_page(GfpFlags::kernel()).expect("frame");
    assert_eq!(zero.base(), PhysicalAddress::new(0));

    let frames = DeferredFrame {
        mem: &mem,
        held: zero,
        countdown: AtomicUsize::new(usize::MAX),
    };
    let vm = Vmalloc::new(VmallocConfig::default(), &mem, &frames, &mem).expect("vmalloc");

    // Create the directories first so the next run allocates only array and data pages.
    let warm = vm.vmalloc(600 * PAGE_SIZE).expect("alloc");
    vm.vfree(warm);
    let baseline = mem.allocated_pages();

    // Two calls go to the handle array, the fifth lands on data page 2.
    frames.countdown.store(4, Ordering::Relaxed);
    let addr = vm.vmalloc(600 * PAGE_SIZE).expect("alloc with frame 0");
    assert_eq!(vm.find_area(addr).map(|s| s.page_count), Some(600));
    assert_eq!(vm.translate(addr + 2 * PAGE_SIZE), Some(PhysicalAddress::new(0)));

    vm.vfree(addr);
    assert!(!mem.is_allocated(zero));
    assert_eq!(mem.allocated_pages(), baseline - 1);
    assert!(vm.area_spans().is_empty());
}
