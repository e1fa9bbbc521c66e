//! # Kernel vmalloc
//!
//! Virtually contiguous kernel memory backed by physically scattered frames.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Vmalloc                          │
//! │    • vmalloc / vfree, vmap / vunmap                 │
//! │    • ioremap / iounmap                              │
//! │    • vread / vwrite                                 │
//! └───────────┬─────────────────────────┬───────────────┘
//!             │                         │
//! ┌───────────▼───────────┐ ┌───────────▼───────────────┐
//! │     AreaRegistry      │ │   kernel-vmem walker      │
//! │ • first-fit placement │ │ • 4-level populate/clear  │
//! │ • guard pages         │ │ • on-demand directories   │
//! └───────────────────────┘ └───────────┬───────────────┘
//!                                       │
//!                 FrameAlloc · PhysMapper · TlbFlush
//! ```
//!
//! ## Memory Layout
//!
//! Areas are placed in `[VMALLOC_START, VMALLOC_END)` (see `kernel-info`)
//! unless a [`VmallocConfig`] says otherwise. Every area is followed by one
//! unmapped guard page so overruns fault instead of corrupting a neighbour.
//!
//! ```text
//! VMALLOC_START                                               VMALLOC_END
//! │ area A │ guard │ area B        │ guard │      free      │ area C │ guard │
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use kernel_vmalloc::{Vmalloc, VmallocConfig};
//! use kernel_vmem::sim::SimulatedMemory;
//!
//! let mem = SimulatedMemory::new(64);
//! let vm = Vmalloc::new(VmallocConfig::default(), &mem, &mem, &mem).unwrap();
//!
//! let addr = vm.vmalloc(3 * 4096).unwrap();
//! assert_eq!(vm.vwrite(b"hello", addr), 5);
//!
//! let mut buf = [0; 5];
//! vm.vread(&mut buf, addr);
//! assert_eq!(&buf, b"hello");
//!
//! vm.vfree(addr);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod area;
mod config;
mod copy;
mod error;
mod global;
mod page_array;
pub mod registry;
mod vmalloc;

pub use crate::area::{AreaKind, AreaSpan, VirtualArea};
pub use crate::config::VmallocConfig;
pub use crate::error::VmallocError;
pub use crate::global::GlobalVmalloc;
pub use crate::registry::AreaRegistry;
pub use crate::vmalloc::{MAX_ARRAY_DEPTH, Vmalloc};
