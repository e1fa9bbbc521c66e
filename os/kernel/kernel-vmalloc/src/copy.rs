//! # Copy Helpers
//!
//! Byte-wise access to the vmalloc window for debuggers and `/dev/kmem`-like
//! readers. Both helpers walk the registry in address order:
//!
//! - bytes between areas are zero-filled (read) or skipped (write),
//! - bytes inside an area go through the page tables one page at a time,
//!   and unmapped pages (such as the tail of a partial mapping) read as zero,
//! - bytes past the last area are left alone.
//!
//! Guard pages are never part of an area here.

use crate::Vmalloc;
use core::cmp::min;
use kernel_vmem::{FrameAlloc, PAGE_SIZE, PhysMapper, PhysicalAddress, TlbFlush, VirtualAddress};

/// Part of a copy request, relative to the start of the caller's buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Piece {
    /// Not covered by any area.
    Gap { offset: usize, len: usize },
    /// One page's worth (or less) of an area; `pa` is `None` if unmapped.
    Page {
        offset: usize,
        len: usize,
        pa: Option<PhysicalAddress>,
    },
}

impl<M: PhysMapper, A: FrameAlloc, F: TlbFlush> Vmalloc<'_, M, A, F> {
    /// Copy from the vmalloc window starting at `address` into `buf`.
    ///
    /// Returns the number of bytes of `buf` that were filled; anything past
    /// the last area is untouched.
    pub fn vread(&self, buf: &mut [u8], address: VirtualAddress) -> usize {
        let count = clamp_count(address, buf.len());
        self.walk(address, count, |piece| match piece {
            Piece::Gap { offset, len } => buf[offset..offset + len].fill(0),
            Piece::Page { offset, len, pa } => {
                let dst = &mut buf[offset..offset + len];
                match pa {
                    // SAFETY: `walk` never hands out a piece crossing a page.
                    Some(pa) => unsafe { self.mapper().copy_from_phys(pa, dst) },
                    None => dst.fill(0),
                }
            }
        })
    }

    /// Copy `buf` into the vmalloc window starting at `address`.
    ///
    /// Gaps between areas and unmapped pages are skipped. Returns the number
    /// of bytes of `buf` that were consumed.
    pub fn vwrite(&self, buf: &[u8], address: VirtualAddress) -> usize {
        let count = clamp_count(address, buf.len());
        self.walk(address, count, |piece| {
            if let Piece::Page {
                offset,
                len,
                pa: Some(pa),
            } = piece
            {
                // SAFETY: `walk` never hands out a piece crossing a page.
                unsafe { self.mapper().copy_to_phys(pa, &buf[offset..offset + len]) };
            }
        })
    }

    /// Split `[address, address + count)` into gaps and per-page pieces,
    /// holding the registry read lock throughout.
    fn walk(&self, address: VirtualAddress, count: usize, mut visit: impl FnMut(Piece)) -> usize {
        let mut addr = address.as_u64();
        let mut done = 0;

        let registry = self.registry().read();
        for area in registry.iter() {
            if done == count {
                break;
            }
            let start = area.address().as_u64();
            let end = area.mapped_end().as_u64();
            if end <= addr {
                continue;
            }

            if addr < start {
                let len = to_len(start - addr, count - done);
                visit(Piece::Gap { offset: done, len });
                done += len;
                addr += len as u64;
                if done == count {
                    break;
                }
            }

            while addr < end && done < count {
                let in_page = PAGE_SIZE - (addr % PAGE_SIZE);
                let len = to_len(min(in_page, end - addr), count - done);
                let pa = self.translate(VirtualAddress::new(addr));
                visit(Piece::Page { offset: done, len, pa });
                done += len;
                addr += len as u64;
            }
        }
        done
    }
}

/// Shorten `len` so that `address + len` does not wrap.
fn clamp_count(address: VirtualAddress, len: usize) -> usize {
    let addr = address.as_u64();
    if addr.checked_add(len as u64).is_some() {
        len
    } else {
        // `addr` is non-zero here, so the distance to the top fits.
        to_len(u64::MAX - addr + 1, len)
    }
}

/// `min(bytes, cap)` as a buffer length.
fn to_len(bytes: u64, cap: usize) -> usize {
    usize::try_from(bytes).map_or(cap, |b| min(b, cap))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_only_when_wrapping() {
        assert_eq!(clamp_count(VirtualAddress::new(0x1000), 0x100), 0x100);
        assert_eq!(clamp_count(VirtualAddress::new(u64::MAX - 0xF), 0x100), 0x10);
        assert_eq!(clamp_count(VirtualAddress::new(0), usize::MAX), usize::MAX);
    }

    #[test]
    fn to_len_caps() {
        assert_eq!(to_len(10, 4), 4);
        assert_eq!(to_len(3, 4), 3);
        assert_eq!(to_len(u64::MAX, 7), 7);
    }
}
