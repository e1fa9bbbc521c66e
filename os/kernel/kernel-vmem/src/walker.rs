//! # Page-Table Walker
//!
//! Populates, clears, and translates linear kernel address ranges through
//! any [`TableTree`]. One recursive routine serves all four levels.
//!
//! ## Mapping
//!
//! For every 4 KiB slot in `[start, end)` the walker descends from the root,
//! creating directories on demand, pulls the next frame from a page provider
//! and installs a present leaf with the requested protection.
//!
//! ## Unmapping
//!
//! Leaves are cleared; frames are *not* freed (they belong to whoever mapped
//! them). Directories stay in place. Malformed directory entries are logged,
//! reset, and skipped so the rest of the range is still processed.

use crate::address_space::{Child, TableTree};
use crate::page_table::{Level, TableIndex};
use crate::{FrameAlloc, PageEntryBits, PhysicalAddress, PhysicalPage, VirtualAddress};
use log::error;

/// Failure while populating a range.
///
/// Entries installed before the failure are left in place; the caller is
/// expected to unmap the whole range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory while allocating a page-table directory")]
    DirectoryAlloc,
    #[error("page provider ran out before the range was filled")]
    PagesExhausted,
}

/// Walk state for one table: the range still to process below it.
#[derive(Copy, Clone, Debug)]
struct Cursor {
    level: Level,
    table: PhysicalPage,
    start: VirtualAddress,
    end: VirtualAddress,
}

impl Cursor {
    const fn root(table: PhysicalPage, start: VirtualAddress, end: VirtualAddress) -> Self {
        Self {
            level: Level::Pml4,
            table,
            start,
            end,
        }
    }

    /// Split the range at entry boundaries of this level.
    fn chunks(self) -> impl Iterator<Item = (TableIndex, VirtualAddress, VirtualAddress)> {
        let Self { level, end, .. } = self;
        let first = Some(self.start).filter(|&s| s < end);
        core::iter::successors(first, move |&addr| {
            level.next_boundary(addr).filter(|&next| next < end)
        })
        .map(move |addr| {
            let chunk_end = level.next_boundary(addr).map_or(end, |next| next.min(end));
            (level.index_of(addr), addr, chunk_end)
        })
    }

    /// The range of one chunk, one level down in `table`.
    const fn child(level: Level, table: PhysicalPage, start: VirtualAddress, end: VirtualAddress) -> Self {
        Self {
            level,
            table,
            start,
            end,
        }
    }
}

/// Map every page in `[start, end)` to the next frame from `pages`.
///
/// Returns the number of leaves installed.
///
/// # Errors
/// - [`MapError::DirectoryAlloc`] if a directory could not be allocated.
/// - [`MapError::PagesExhausted`] if `pages` ended early.
///
/// # Panics
/// If a leaf in the range is already populated. Overwriting a live kernel
/// mapping would silently leak or alias memory.
pub fn map_range<T, A, I>(
    tree: &mut T,
    alloc: &A,
    start: VirtualAddress,
    end: VirtualAddress,
    prot: PageEntryBits,
    pages: &mut I,
) -> Result<usize, MapError>
where
    T: TableTree,
    A: FrameAlloc,
    I: Iterator<Item = PhysicalPage>,
{
    debug_assert!(start.is_page_aligned() && end.is_page_aligned());
    let cursor = Cursor::root(tree.root(), start, end);
    map_level(tree, alloc, cursor, prot, pages)
}

fn map_level<T, A, I>(
    tree: &mut T,
    alloc: &A,
    cursor: Cursor,
    prot: PageEntryBits,
    pages: &mut I,
) -> Result<usize, MapError>
where
    T: TableTree,
    A: FrameAlloc,
    I: Iterator<Item = PhysicalPage>,
{
    let mut mapped = 0;
    for (index, start, end) in cursor.chunks() {
        if let Some(next) = cursor.level.next() {
            let table = tree.child_or_create(cursor.level, cursor.table, index, alloc)?;
            mapped += map_level(tree, alloc, Cursor::child(next, table, start, end), prot, pages)?;
            continue;
        }

        let old = tree.entry(cursor.table, index);
        if !old.is_none() {
            error!(
                "vmalloc: page already exists at {start} (entry {:#018x})",
                old.into_bits()
            );
            panic!("attempt to map over live kernel page at {start}");
        }

        let frame = pages.next().ok_or(MapError::PagesExhausted)?;
        tree.set_entry(cursor.table, index, PageEntryBits::leaf(frame, prot));
        mapped += 1;
    }
    Ok(mapped)
}

/// Clear every leaf in `[start, end)`. Returns the number of present leaves removed.
pub fn unmap_range<T: TableTree>(tree: &mut T, start: VirtualAddress, end: VirtualAddress) -> usize {
    debug_assert!(start.is_page_aligned() && end.is_page_aligned());
    let cursor = Cursor::root(tree.root(), start, end);
    unmap_level(tree, cursor)
}

fn unmap_level<T: TableTree>(tree: &mut T, cursor: Cursor) -> usize {
    let mut cleared = 0;
    for (index, start, end) in cursor.chunks() {
        let Some(next) = cursor.level.next() else {
            let old = tree.entry(cursor.table, index);
            if old.is_none() {
                continue;
            }
            tree.set_entry(cursor.table, index, PageEntryBits::new());
            if old.present() {
                cleared += 1;
            } else {
                error!(
                    "vmalloc: non-present kernel pte {:#018x} at {start}",
                    old.into_bits()
                );
            }
            continue;
        };

        match tree.child(cursor.level, cursor.table, index) {
            Child::None => {}
            Child::Bad(e) => {
                error!(
                    "vmalloc: bad {} entry {:#018x} covering {start}, clearing",
                    cursor.level.name(),
                    e.into_bits()
                );
                tree.set_entry(cursor.table, index, PageEntryBits::new());
            }
            Child::Table(table) => {
                cleared += unmap_level(tree, Cursor::child(next, table, start, end));
            }
        }
    }
    cleared
}

/// Translate `va` to the physical address it maps to, without allocating.
#[must_use]
pub fn translate<T: TableTree>(tree: &mut T, va: VirtualAddress) -> Option<PhysicalAddress> {
    let mut table = tree.root();
    let mut level = Level::Pml4;
    loop {
        let index = level.index_of(va);
        let Some(next) = level.next() else {
            let e = tree.entry(table, index);
            return e.present().then(|| e.frame().at(va.page_offset()));
        };
        let Child::Table(child) = tree.child(level, table, index) else {
            return None;
        };
        table = child;
        level = next;
    }
}
