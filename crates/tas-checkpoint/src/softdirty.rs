//! Soft-dirty page tracking for incremental snapshots (spec.md §3
//! "Soft-dirty bit", §4.8 "Incremental mode").
//!
//! The kernel sets bit 55 of each `/proc/pid/pagemap` entry whenever a page
//! has been written since the soft-dirty bits were last cleared. Writing
//! `4` to `/proc/pid/clear_refs` clears them. A first (full) checkpoint
//! always dumps every selected region outright; later incremental
//! checkpoints use this to skip pages that can't have changed.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::memory_region::PAGE_SIZE;

const PAGEMAP_ENTRY_LEN: u64 = 8;
const SOFT_DIRTY_BIT: u64 = 1 << 55;
const PRESENT_BIT: u64 = 1 << 63;

/// Clear the soft-dirty bits for every page of the current process
/// (`echo 4 > /proc/self/clear_refs`).
pub fn clear_soft_dirty() -> std::io::Result<()> {
    let mut f = OpenOptions::new().write(true).open("/proc/self/clear_refs")?;
    f.write_all(b"4")
}

/// Report, for each page covering `[start, end)`, whether it has been
/// written since the last [`clear_soft_dirty`] call. Page size is assumed
/// to be 4 KiB, matching every architecture this crate targets.
pub fn soft_dirty_pages(start: usize, end: usize) -> std::io::Result<Vec<bool>> {
    let mut pagemap = File::open("/proc/self/pagemap")?;
    let page_count = (end - start) / PAGE_SIZE;
    let mut dirty = Vec::with_capacity(page_count);

    let first_page = start / PAGE_SIZE;
    pagemap.seek(SeekFrom::Start(first_page as u64 * PAGEMAP_ENTRY_LEN))?;

    let mut buf = [0u8; PAGEMAP_ENTRY_LEN as usize];
    for _ in 0..page_count {
        pagemap.read_exact(&mut buf)?;
        let entry = u64::from_le_bytes(buf);
        let is_dirty = entry & PRESENT_BIT != 0 && entry & SOFT_DIRTY_BIT != 0;
        dirty.push(is_dirty);
    }
    Ok(dirty)
}

/// Whether any page in `[start, end)` is soft-dirty; used by the region
/// selection policy (spec.md §4.8) to decide whether a file-private or
/// previously-clean anonymous-private region needs dumping this round.
pub fn any_dirty(start: usize, end: usize) -> std::io::Result<bool> {
    Ok(soft_dirty_pages(start, end)?.into_iter().any(|d| d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_soft_dirty_on_self_does_not_error() {
        // /proc/self/clear_refs is writable by the current process by
        // definition, so this only fails in unusual sandboxes without
        // /proc mounted at all.
        if std::path::Path::new("/proc/self/clear_refs").exists() {
            clear_soft_dirty().unwrap();
        }
    }

    #[test]
    fn reading_pagemap_for_a_live_stack_page_does_not_panic() {
        if !std::path::Path::new("/proc/self/pagemap").exists() {
            return;
        }
        let local = 0u8;
        let addr = &local as *const u8 as usize;
        let page_start = addr & !0xfff;
        let _ = soft_dirty_pages(page_start, page_start + 4096);
    }
}
