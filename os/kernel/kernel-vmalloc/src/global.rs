//! Process-wide allocator instance.

use crate::{Vmalloc, VmallocError};
use kernel_sync::SyncOnceCell;
use kernel_vmem::{FrameAlloc, PhysMapper, TlbFlush};

/// A [`Vmalloc`] installed once during early boot and never torn down.
///
/// ```rust
/// # use kernel_vmalloc::{GlobalVmalloc, Vmalloc, VmallocConfig, VmallocError};
/// # use kernel_vmem::sim::SimulatedMemory;
/// static VMALLOC: GlobalVmalloc<SimulatedMemory, SimulatedMemory, SimulatedMemory> =
///     GlobalVmalloc::new();
///
/// assert_eq!(VMALLOC.get().err(), Some(VmallocError::Uninitialized));
///
/// let mem: &'static SimulatedMemory = Box::leak(Box::new(SimulatedMemory::new(16)));
/// let vm = Vmalloc::new(VmallocConfig::default(), mem, mem, mem).unwrap();
/// VMALLOC.init(vm).unwrap();
///
/// let addr = VMALLOC.get().unwrap().vmalloc(100).unwrap();
/// VMALLOC.get().unwrap().vfree(addr);
/// ```
pub struct GlobalVmalloc<M, A, F>
where
    M: PhysMapper + 'static,
    A: FrameAlloc + 'static,
    F: TlbFlush + 'static,
{
    cell: SyncOnceCell<Vmalloc<'static, M, A, F>>,
}

impl<M, A, F> GlobalVmalloc<M, A, F>
where
    M: PhysMapper + 'static,
    A: FrameAlloc + 'static,
    F: TlbFlush + 'static,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: SyncOnceCell::new(),
        }
    }

    /// Install the instance.
    ///
    /// # Errors
    /// [`VmallocError::AlreadyInitialized`] if an instance was installed before.
    pub fn init(&self, vmalloc: Vmalloc<'static, M, A, F>) -> Result<&Vmalloc<'static, M, A, F>, VmallocError> {
        self.cell
            .set(vmalloc)
            .map_err(|_| VmallocError::AlreadyInitialized)
    }

    /// The installed instance.
    ///
    /// # Errors
    /// [`VmallocError::Uninitialized`] before [`init`](Self::init).
    pub fn get(&self) -> Result<&Vmalloc<'static, M, A, F>, VmallocError> {
        self.cell.get().ok_or(VmallocError::Uninitialized)
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.cell.is_initialized()
    }
}

impl<M, A, F> Default for GlobalVmalloc<M, A, F>
where
    M: PhysMapper + 'static,
    A: FrameAlloc + 'static,
    F: TlbFlush + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
