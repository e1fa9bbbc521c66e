use kernel_vmalloc::{AreaKind, Vmalloc, VmallocConfig};
use kernel_vmem::sim::SimulatedMemory;
use kernel_vmem::{PAGE_SIZE, VirtualAddress};

const WINDOW: u64 = 0xffff_c900_0000_0000;

fn vm(mem: &SimulatedMemory) -> Vmalloc<'_, SimulatedMemory, SimulatedMemory, SimulatedMemory> {
    let config = VmallocConfig::new(
        VirtualAddress::new(WINDOW),
        VirtualAddress::new(WINDOW + 0x20_0000),
    )
    .expect("window");
    Vmalloc::new(config, mem, mem, mem).expect("vmalloc")
}

#[test]
fn gaps_read_as_zero() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let a = vm.vmalloc(0x2000).expect("alloc");
    let b = vm.vmalloc(0x1000).expect("alloc");
    assert_eq!(b.as_u64() - a.as_u64(), 0x3000);

    assert_eq!(vm.vwrite(&[0xA5; 0x2000], a), 0x2000);
    assert_eq!(vm.vwrite(&[0x5A; 0x1000], b), 0x1000);

    let mut buf = vec![0xEE_u8; 0x5000];
    assert_eq!(vm.vread(&mut buf, a), 0x4000);
    assert!(buf[..0x2000].iter().all(|&x| x == 0xA5));
    assert!(buf[0x2000..0x3000].iter().all(|&x| x == 0), "guard page reads as zero");
    assert!(buf[0x3000..0x4000].iter().all(|&x| x == 0x5A));
    assert!(buf[0x4000..].iter().all(|&x| x == 0xEE), "bytes past the last area untouched");
}

#[test]
fn read_starting_before_first_area() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let config = vm.config();
    let a = vm.vmalloc(0x1000).expect("alloc");
    vm.vwrite(&[7; 0x1000], a);

    let mut buf = [0xEE_u8; 0x200];
    let start = VirtualAddress::new(config.start().as_u64() - 0x100);
    assert_eq!(vm.vread(&mut buf, start), 0x200);
    assert_eq!(&buf[..0x100], &[0; 0x100][..]);
    assert_eq!(&buf[0x100..], &[7; 0x100][..]);
}

#[test]
fn unaligned_copies_cross_pages() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let a = vm.vmalloc(3 * PAGE_SIZE).expect("alloc");

    let pattern: Vec<u8> = (0..0x1800_u32).map(|i| (i % 251) as u8).collect();
    let at = a + 0x0F00;
    assert_eq!(vm.vwrite(&pattern, at), pattern.len());

    let mut back = vec![0; pattern.len()];
    assert_eq!(vm.vread(&mut back, at), pattern.len());
    assert_eq!(back, pattern);

    // Each page is backed by a different frame.
    let frames: Vec<_> = (0..3)
        .map(|i| vm.translate(a + i * PAGE_SIZE).expect("mapped").page())
        .collect();
    assert_ne!(frames[0], frames[1]);
    assert_ne!(frames[1], frames[2]);
}

#[test]
fn writes_skip_gaps_and_stop_at_last_area() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let a = vm.vmalloc(0x1000).expect("alloc");
    let b = vm.vmalloc(0x1000).expect("alloc");

    assert_eq!(vm.vwrite(&[0x11; 0x8000], a), 0x3000);
    assert_eq!(vm.translate(a + 0x1000), None);

    let mut buf = [0; 0x1000];
    vm.vread(&mut buf, b);
    assert!(buf.iter().all(|&x| x == 0x11));
}

#[test]
fn unmapped_reservation_reads_zero() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);
    let span = vm.get_vm_area(0x2000, AreaKind::Map).expect("reserve");

    assert_eq!(vm.vwrite(&[0xFF; 0x2000], span.address), 0x2000);
    let mut buf = [0xEE; 0x2000];
    assert_eq!(vm.vread(&mut buf, span.address), 0x2000);
    assert!(buf.iter().all(|&x| x == 0));
}

#[test]
fn empty_registry_and_wrapping_requests() {
    let mem = SimulatedMemory::new(64);
    let vm = vm(&mem);

    let mut buf = [0xEE; 0x100];
    assert_eq!(vm.vread(&mut buf, VirtualAddress::new(WINDOW)), 0);
    assert!(buf.iter().all(|&x| x == 0xEE));

    vm.vmalloc(0x1000).expect("alloc");
    let top = VirtualAddress::new(u64::MAX - 0x7F);
    assert_eq!(vm.vread(&mut buf, top), 0);
    assert_eq!(vm.vwrite(&buf, top), 0);
}
