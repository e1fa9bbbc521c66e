//! # Kernel Memory Layout Configuration
//!
//! Compile-time constants describing the parts of the kernel virtual address
//! space that the memory subsystems have to agree on. Every crate that
//! reserves, maps, or walks kernel addresses takes its numbers from here so
//! the layout has a single source of truth.
//!
//! ## Virtual Memory Architecture
//!
//! ```text
//! Virtual Address Space Layout (64-bit):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │         User Space              │
//! LAST_USERSPACE_ADDRESS├─────────────────────────────────┤ 0xffff_0000_0000_0000
//!                       │        Guard Region             │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//! VMALLOC_START         ├─────────────────────────────────┤ 0xffff_c900_0000_0000
//!                       │   vmalloc / vmap / ioremap      │
//!                       │   (dynamic kernel mappings)     │
//! VMALLOC_END           ├─────────────────────────────────┤ 0xffff_e900_0000_0000
//!                       │           unused                │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel Text & Data        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! The window between [`VMALLOC_START`](memory::VMALLOC_START) and
//! [`VMALLOC_END`](memory::VMALLOC_END) is the only range the vmalloc
//! allocator hands out by default. Tests build allocators over smaller,
//! private windows instead.
//!
//! ## Compile-Time Checks
//!
//! Layout relations are verified with `const` assertions, so an inconsistent
//! edit fails the build rather than corrupting the address space at runtime.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
