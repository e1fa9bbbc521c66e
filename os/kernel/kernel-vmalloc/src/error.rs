use kernel_vmem::{MapError, VirtualAddress};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmallocError {
    /// No gap in the window is large enough for the request plus its guard page.
    #[error("no free virtual range for {size:#x} bytes")]
    OutOfSpace { size: u64 },
    #[error("out of memory")]
    OutOfMemory,
    #[error("no vm area starts at {0}")]
    NotFound(VirtualAddress),
    #[error("invalid vmalloc window {start}..{end}")]
    InvalidWindow {
        start: VirtualAddress,
        end: VirtualAddress,
    },
    #[error("vmalloc is not initialized")]
    Uninitialized,
    #[error("vmalloc is already initialized")]
    AlreadyInitialized,
}

impl From<MapError> for VmallocError {
    fn from(value: MapError) -> Self {
        match value {
            MapError::DirectoryAlloc | MapError::PagesExhausted => Self::OutOfMemory,
        }
    }
}
