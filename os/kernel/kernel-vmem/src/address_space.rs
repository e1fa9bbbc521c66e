//! # Kernel Address Space (x86-64, PML4-rooted)
//!
//! The kernel page-table tree, seen through the [`TableTree`] trait so the
//! [`walker`](crate::walker) can be written once over [`Level`] instead of
//! once per table type.
//!
//! ## Design
//!
//! - Directory entries are created with [`PageEntryBits::kernel_table`];
//!   leaf protection always comes from the caller.
//! - New directory frames come from the [`FrameAlloc`] and are zeroed through
//!   the [`PhysMapper`] before they are linked.
//! - Keeps `unsafe` confined to viewing a physical frame as a [`PageTable`].
//!
//! ## Safety
//!
//! - Mutating live mappings requires TLB maintenance; that is the job of the
//!   layer above (see [`TlbFlush`](crate::TlbFlush)).
//! - The provided `PhysMapper` must yield **writable** views of table frames.

use crate::page_table::{Level, PageTable, TableIndex};
use crate::walker::MapError;
use crate::{FrameAlloc, GfpFlags, PageEntryBits, PhysMapper, PhysicalPage};
use log::error;

/// What a directory entry points at.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Child {
    /// Never populated.
    None,
    /// A next-level table.
    Table(PhysicalPage),
    /// Non-empty but malformed (not present, huge, or user-accessible).
    Bad(PageEntryBits),
}

/// A page-table tree the walker can traverse and populate.
pub trait TableTree {
    /// Frame holding the top-level table.
    fn root(&self) -> PhysicalPage;

    /// Read entry `index` of `table`.
    fn entry(&mut self, table: PhysicalPage, index: TableIndex) -> PageEntryBits;

    /// Overwrite entry `index` of `table`.
    fn set_entry(&mut self, table: PhysicalPage, index: TableIndex, entry: PageEntryBits);

    /// Allocate and zero a fresh table frame.
    ///
    /// # Errors
    /// [`MapError::DirectoryAlloc`] if the allocator is out of frames.
    fn new_table<A: FrameAlloc>(&mut self, alloc: &A) -> Result<PhysicalPage, MapError>;

    /// Look up the table referenced by entry `index` of a `level` table.
    fn child(&mut self, level: Level, table: PhysicalPage, index: TableIndex) -> Child {
        debug_assert!(!level.is_leaf(), "leaf entries have no children");
        let e = self.entry(table, index);
        if e.is_none() {
            Child::None
        } else if e.is_bad_directory() {
            Child::Bad(e)
        } else {
            Child::Table(e.frame())
        }
    }

    /// Like [`child`](Self::child), but allocates and links a new table if
    /// the entry is empty.
    ///
    /// A malformed entry is reported and replaced by a fresh table.
    ///
    /// # Errors
    /// [`MapError::DirectoryAlloc`] if a new table is needed and cannot be
    /// allocated; the entry is left untouched in that case.
    fn child_or_create<A: FrameAlloc>(
        &mut self,
        level: Level,
        table: PhysicalPage,
        index: TableIndex,
        alloc: &A,
    ) -> Result<PhysicalPage, MapError> {
        match self.child(level, table, index) {
            Child::Table(next) => Ok(next),
            Child::None => {
                let next = self.new_table(alloc)?;
                self.set_entry(table, index, PageEntryBits::table(next));
                Ok(next)
            }
            Child::Bad(e) => {
                error!(
                    "vmalloc: bad {} entry {:#018x} at index {}, replacing",
                    level.name(),
                    e.into_bits(),
                    index.as_usize()
                );
                let next = self.new_table(alloc)?;
                self.set_entry(table, index, PageEntryBits::table(next));
                Ok(next)
            }
        }
    }
}

/// Handle to the kernel page-table tree.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage, // PML4 frame
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Allocate a zeroed PML4 and wrap it.
    ///
    /// # Errors
    /// [`MapError::DirectoryAlloc`] if no frame is available.
    pub fn new<A: FrameAlloc>(mapper: &'m M, alloc: &A) -> Result<Self, MapError> {
        let root = alloc_table(mapper, alloc)?;
        Ok(Self { root, mapper })
    }

    /// If you already know the root frame (e.g., the live kernel PML4),
    /// use the explicit constructor.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage) -> Self {
        Self { root, mapper }
    }

    /// Physical page of the PML4.
    #[inline]
    pub const fn root_page(&self) -> PhysicalPage {
        self.root
    }

    #[inline]
    fn table_mut(&mut self, page: PhysicalPage) -> &mut PageTable {
        // SAFETY: table frames are only ever reached through this tree, which
        // the caller keeps behind the page-table lock.
        unsafe { self.mapper.phys_to_mut::<PageTable>(page.base()) }
    }
}

impl<M: PhysMapper> TableTree for AddressSpace<'_, M> {
    #[inline]
    fn root(&self) -> PhysicalPage {
        self.root
    }

    #[inline]
    fn entry(&mut self, table: PhysicalPage, index: TableIndex) -> PageEntryBits {
        self.table_mut(table).get(index)
    }

    #[inline]
    fn set_entry(&mut self, table: PhysicalPage, index: TableIndex, entry: PageEntryBits) {
        self.table_mut(table).set(index, entry);
    }

    fn new_table<A: FrameAlloc>(&mut self, alloc: &A) -> Result<PhysicalPage, MapError> {
        alloc_table(self.mapper, alloc)
    }
}

fn alloc_table<M: PhysMapper, A: FrameAlloc>(mapper: &M, alloc: &A) -> Result<PhysicalPage, MapError> {
    let page = alloc.alloc_page(GfpFlags::kernel()).ok_or(MapError::DirectoryAlloc)?;
    // SAFETY: the frame was just handed out and nothing else references it.
    unsafe { mapper.zero_frame(page) };
    Ok(page)
}
