//! # Memory Layout

/// log2 of the base page size.
pub const PAGE_SHIFT: u32 = 12;

/// Base page size in bytes (4 KiB).
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// End of userspace VA range after which Kernel space begins.
pub const LAST_USERSPACE_ADDRESS: u64 = 0xffff_0000_0000_0000;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// First address of the dynamic kernel mapping window (vmalloc, vmap, ioremap).
pub const VMALLOC_START: u64 = 0xffff_c900_0000_0000;

/// Exclusive end of the dynamic kernel mapping window (32 TiB after the start).
pub const VMALLOC_END: u64 = 0xffff_e900_0000_0000;

/// Largest alignment order used for I/O remappings (128 pages).
pub const IOREMAP_MAX_ORDER: u32 = 7 + PAGE_SHIFT;

/// Where the kernel executes (VMA), matches the linker script.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(HHDM_BASE >= LAST_USERSPACE_ADDRESS);
    assert!(VMALLOC_START > HHDM_BASE);
    assert!(VMALLOC_START < VMALLOC_END);
    assert!(VMALLOC_START.is_multiple_of(PAGE_SIZE));
    assert!(VMALLOC_END.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_BASE > VMALLOC_END);
    assert!(IOREMAP_MAX_ORDER >= PAGE_SHIFT);
};
