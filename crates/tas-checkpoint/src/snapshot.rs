//! On-disk snapshot format (spec.md §4.8, §6) and the in-memory [`Snapshot`]
//! aggregate, including the incremental reference chain (spec.md §4.8
//! "Incremental mode": "record only dirty pages plus a reference to the
//! previous snapshot for the rest... a load walks the reference chain
//! newest-first, applying each page at most once").
//!
//! Grounded on `SaveState.h`'s `frame_count` / `n_sections` / `total_size` /
//! `sections` / `threads` layout, generalized from "one unique_ptr vector of
//! StateSection plus a vector of ThreadInfo" into three flat on-disk
//! sections (header, threads, regions) followed by one contiguous
//! `pages.bin` blob, so a snapshot can be written and read without building
//! up the whole page contents in memory twice. The in-memory chain has no
//! on-disk analogue in `SaveState.h` (the original never kept more than one
//! live state per slot); `write_to`/`read_from` always flatten the chain
//! into a self-contained full snapshot before touching a writer, matching
//! the single-file-per-slot layout spec.md §4.8 actually describes.

use std::io::{self, Read, Write};

use tas_protocol::VirtualTime;
use tas_threads::registry::Tid;

use crate::error::{RestoreError, SnapshotError};
use crate::memory_region::{Backing, Permissions, PAGE_SIZE};

/// First 8 bytes of every snapshot file.
pub const MAGIC: [u8; 8] = *b"TASSAVE1";

pub const FORMAT_VERSION: u32 = 1;

/// One saved thread's register state (spec.md §4.8 "threads section").
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub tid: Tid,
    pub is_main: bool,
    pub registers: Vec<u8>,
}

/// One page captured for a region, by its region-relative page index
/// (region-relative rather than absolute so a region that migrates between
/// captures can still be matched against `start`/`end`).
#[derive(Debug, Clone, Copy)]
pub struct PageEntry {
    pub page_index: u32,
    /// Byte offset of this page's `PAGE_SIZE` bytes within the owning
    /// snapshot's `pages` blob.
    pub data_offset: u64,
}

/// One saved memory region: its `/proc/pid/maps` metadata plus whichever
/// pages *this* snapshot captured fresh. A full snapshot captures every
/// page; an incremental one captures only the pages soft-dirty since its
/// `base` and leaves the rest to be resolved from the chain. Regions
/// skipped entirely by the dump policy never get an entry here at all.
#[derive(Debug, Clone)]
pub struct RegionSnapshot {
    pub start: usize,
    pub end: usize,
    pub perms: Permissions,
    pub backing: Backing,
    pub path: Option<String>,
    pub pages: Vec<PageEntry>,
}

impl RegionSnapshot {
    pub fn page_count(&self) -> usize {
        (self.end - self.start) / PAGE_SIZE
    }
}

/// A complete (or incremental, chained to a base) checkpoint.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub frame_count: u64,
    pub virtual_time: VirtualTime,
    pub threads: Vec<ThreadSnapshot>,
    pub regions: Vec<RegionSnapshot>,
    /// Concatenated page bytes referenced by `regions[*].pages[*].data_offset`.
    pub pages: Vec<u8>,
    /// The snapshot this one is incremental against (spec.md §4.8: "a
    /// reference to the previous snapshot for the rest"). `None` for a full
    /// capture.
    pub base: Option<Box<Snapshot>>,
}

impl Snapshot {
    pub fn new(frame_count: u64, virtual_time: VirtualTime) -> Self {
        Snapshot { frame_count, virtual_time, threads: Vec::new(), regions: Vec::new(), pages: Vec::new(), base: None }
    }

    pub fn total_size(&self) -> u64 {
        self.pages.len() as u64
    }

    /// Record a full capture of `data` (one entry per `PAGE_SIZE` chunk,
    /// page index 0-based from the region's start). Used by a non-incremental
    /// save, where every selected region is dumped in full.
    pub fn push_region_full(&mut self, start: usize, end: usize, perms: Permissions, backing: Backing, path: Option<String>, data: &[u8]) {
        let mut pages = Vec::with_capacity(data.len() / PAGE_SIZE);
        for (i, chunk) in data.chunks(PAGE_SIZE).enumerate() {
            let data_offset = self.pages.len() as u64;
            self.pages.extend_from_slice(chunk);
            pages.push(PageEntry { page_index: i as u32, data_offset });
        }
        self.regions.push(RegionSnapshot { start, end, perms, backing, path, pages });
    }

    /// Record only the given `(page_index, page_bytes)` pairs for a region
    /// (an incremental save's soft-dirty subset); pages not listed here are
    /// resolved from `base` at load time. Still adds a `RegionSnapshot`
    /// entry even when `dirty_pages` is empty, so the chain keeps tracking
    /// a region that simply had nothing new to record this round.
    pub fn push_region_sparse(&mut self, start: usize, end: usize, perms: Permissions, backing: Backing, path: Option<String>, dirty_pages: &[(u32, &[u8])]) {
        let mut pages = Vec::with_capacity(dirty_pages.len());
        for &(page_index, data) in dirty_pages {
            let data_offset = self.pages.len() as u64;
            self.pages.extend_from_slice(data);
            pages.push(PageEntry { page_index, data_offset });
        }
        self.regions.push(RegionSnapshot { start, end, perms, backing, path, pages });
    }

    /// Resolve one region's full byte contents, walking this snapshot and
    /// then `base`, `base.base`, ... newest-first, applying each page index
    /// at most once (spec.md §4.8's reference-chain restore rule). Pages no
    /// snapshot in the chain ever recorded stay zeroed — this can only
    /// happen if the chain's root was itself incremental, which
    /// `CheckpointEngine` never produces (every chain is rooted at a full
    /// save, spec.md §4.8 "A first (full) checkpoint always dumps every
    /// selected region outright").
    fn resolve_region_bytes(&self, start: usize, end: usize) -> Vec<u8> {
        let len = end - start;
        let page_count = len / PAGE_SIZE;
        let mut buf = vec![0u8; len];
        let mut filled = vec![false; page_count];
        let mut remaining = page_count;

        let mut current = Some(self);
        while let Some(snap) = current {
            if remaining == 0 {
                break;
            }
            if let Some(region) = snap.regions.iter().find(|r| r.start == start && r.end == end) {
                for page in &region.pages {
                    let idx = page.page_index as usize;
                    if idx >= page_count || filled[idx] {
                        continue;
                    }
                    let src = &snap.pages[page.data_offset as usize..page.data_offset as usize + PAGE_SIZE];
                    buf[idx * PAGE_SIZE..(idx + 1) * PAGE_SIZE].copy_from_slice(src);
                    filled[idx] = true;
                    remaining -= 1;
                }
            }
            current = snap.base.as_deref();
        }
        buf
    }

    /// Whether this snapshot or anything in its base chain already has an
    /// entry for the region `[start, end)`, regardless of whether that
    /// entry captured any pages. Used by incremental saves to decide
    /// whether an otherwise-clean region still needs a (possibly empty)
    /// entry this round to keep the chain from losing track of it.
    pub fn tracks_region(&self, start: usize, end: usize) -> bool {
        let mut current = Some(self);
        while let Some(snap) = current {
            if snap.regions.iter().any(|r| r.start == start && r.end == end) {
                return true;
            }
            current = snap.base.as_deref();
        }
        false
    }

    /// Every region this snapshot's chain knows about, with its fully
    /// resolved byte contents. This is what the checkpoint engine's `load`
    /// and `write_to` both work from — callers never need to walk `base`
    /// themselves.
    pub fn resolved_regions(&self) -> Vec<(RegionSnapshot, Vec<u8>)> {
        self.regions
            .iter()
            .map(|r| {
                let bytes = self.resolve_region_bytes(r.start, r.end);
                (r.clone(), bytes)
            })
            .collect()
    }

    /// Write a flattened (chain-free) copy of this snapshot: header,
    /// threads, then one fully-resolved entry per region, then the
    /// concatenated page blob (spec.md §4.8's on-disk layout, which has no
    /// concept of an incremental chain — only the in-memory engine does).
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), SnapshotError> {
        let to_io = |slot: u32| move |e: io::Error| SnapshotError::Io { slot, source: e };
        w.write_all(&MAGIC).map_err(to_io(0))?;
        w.write_all(&FORMAT_VERSION.to_le_bytes()).map_err(to_io(0))?;
        w.write_all(&self.frame_count.to_le_bytes()).map_err(to_io(0))?;
        w.write_all(&self.virtual_time.secs().to_le_bytes()).map_err(to_io(0))?;
        w.write_all(&self.virtual_time.nanos().to_le_bytes()).map_err(to_io(0))?;

        w.write_all(&(self.threads.len() as u64).to_le_bytes()).map_err(to_io(0))?;
        for t in &self.threads {
            w.write_all(&t.tid.to_le_bytes()).map_err(to_io(0))?;
            w.write_all(&[t.is_main as u8]).map_err(to_io(0))?;
            w.write_all(&(t.registers.len() as u64).to_le_bytes()).map_err(to_io(0))?;
            w.write_all(&t.registers).map_err(to_io(0))?;
        }

        let resolved = self.resolved_regions();
        w.write_all(&(resolved.len() as u64).to_le_bytes()).map_err(to_io(0))?;
        let mut pages = Vec::new();
        for (region, bytes) in &resolved {
            w.write_all(&(region.start as u64).to_le_bytes()).map_err(to_io(0))?;
            w.write_all(&(region.end as u64).to_le_bytes()).map_err(to_io(0))?;
            let perm_byte = (region.perms.read as u8) | ((region.perms.write as u8) << 1) | ((region.perms.exec as u8) << 2);
            w.write_all(&[perm_byte, backing_tag(region.backing)]).map_err(to_io(0))?;
            let path_bytes = region.path.as_deref().unwrap_or("").as_bytes();
            w.write_all(&(path_bytes.len() as u32).to_le_bytes()).map_err(to_io(0))?;
            w.write_all(path_bytes).map_err(to_io(0))?;
            w.write_all(&(pages.len() as u64).to_le_bytes()).map_err(to_io(0))?;
            w.write_all(&(bytes.len() as u64).to_le_bytes()).map_err(to_io(0))?;
            pages.extend_from_slice(bytes);
        }

        w.write_all(&(pages.len() as u64).to_le_bytes()).map_err(to_io(0))?;
        w.write_all(&pages).map_err(to_io(0))?;
        Ok(())
    }

    /// Read back a flattened snapshot written by [`write_to`](Self::write_to).
    /// The result is always a full (chain-free) snapshot: every region's
    /// pages are reconstructed contiguously from the single `pages` blob.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self, RestoreError> {
        let to_io = |slot: u32| move |e: io::Error| RestoreError::Io { slot, source: e };

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic).map_err(to_io(0))?;
        if magic != MAGIC {
            return Err(RestoreError::HeaderMismatch(format!("bad magic {magic:?}")));
        }
        let version = read_u32(r).map_err(to_io(0))?;
        if version != FORMAT_VERSION {
            return Err(RestoreError::HeaderMismatch(format!("unsupported version {version}")));
        }
        let frame_count = read_u64(r).map_err(to_io(0))?;
        let secs = read_u64(r).map_err(to_io(0))?;
        let nanos = read_u32(r).map_err(to_io(0))?;
        let virtual_time = VirtualTime::new(secs, nanos);

        let thread_count = read_u64(r).map_err(to_io(0))?;
        let mut threads = Vec::with_capacity(thread_count as usize);
        for _ in 0..thread_count {
            let tid = read_tid(r).map_err(to_io(0))?;
            let mut is_main_byte = [0u8; 1];
            r.read_exact(&mut is_main_byte).map_err(to_io(0))?;
            let reg_len = read_u64(r).map_err(to_io(0))? as usize;
            let mut registers = vec![0u8; reg_len];
            r.read_exact(&mut registers).map_err(to_io(0))?;
            threads.push(ThreadSnapshot { tid, is_main: is_main_byte[0] != 0, registers });
        }

        let region_count = read_u64(r).map_err(to_io(0))?;
        struct RawRegion {
            start: usize,
            end: usize,
            perms: Permissions,
            backing: Backing,
            path: Option<String>,
            blob_offset: u64,
            blob_len: u64,
        }
        let mut raw_regions = Vec::with_capacity(region_count as usize);
        for _ in 0..region_count {
            let start = read_u64(r).map_err(to_io(0))? as usize;
            let end = read_u64(r).map_err(to_io(0))? as usize;
            let mut flags = [0u8; 2];
            r.read_exact(&mut flags).map_err(to_io(0))?;
            let perms = Permissions { read: flags[0] & 1 != 0, write: flags[0] & 2 != 0, exec: flags[0] & 4 != 0 };
            let backing = backing_from_tag(flags[1]).ok_or_else(|| RestoreError::HeaderMismatch("unknown backing tag".into()))?;
            let path_len = read_u32(r).map_err(to_io(0))? as usize;
            let mut path_buf = vec![0u8; path_len];
            r.read_exact(&mut path_buf).map_err(to_io(0))?;
            let path = if path_buf.is_empty() { None } else { Some(String::from_utf8_lossy(&path_buf).into_owned()) };
            let blob_offset = read_u64(r).map_err(to_io(0))?;
            let blob_len = read_u64(r).map_err(to_io(0))?;
            raw_regions.push(RawRegion { start, end, perms, backing, path, blob_offset, blob_len });
        }

        let pages_len = read_u64(r).map_err(to_io(0))? as usize;
        let mut pages = vec![0u8; pages_len];
        r.read_exact(&mut pages).map_err(to_io(0))?;

        let mut regions = Vec::with_capacity(raw_regions.len());
        let mut flat_pages = Vec::new();
        for raw in raw_regions {
            let region_bytes = &pages[raw.blob_offset as usize..(raw.blob_offset + raw.blob_len) as usize];
            let mut page_entries = Vec::with_capacity(region_bytes.len() / PAGE_SIZE);
            for (i, chunk) in region_bytes.chunks(PAGE_SIZE).enumerate() {
                let data_offset = flat_pages.len() as u64;
                flat_pages.extend_from_slice(chunk);
                page_entries.push(PageEntry { page_index: i as u32, data_offset });
            }
            regions.push(RegionSnapshot { start: raw.start, end: raw.end, perms: raw.perms, backing: raw.backing, path: raw.path, pages: page_entries });
        }

        Ok(Snapshot { frame_count, virtual_time, threads, regions, pages: flat_pages, base: None })
    }
}

fn backing_tag(b: Backing) -> u8 {
    match b {
        Backing::AnonPrivate => 0,
        Backing::AnonShared => 1,
        Backing::FilePrivate => 2,
        Backing::FileShared => 3,
        Backing::Special => 4,
    }
}

fn backing_from_tag(tag: u8) -> Option<Backing> {
    match tag {
        0 => Some(Backing::AnonPrivate),
        1 => Some(Backing::AnonShared),
        2 => Some(Backing::FilePrivate),
        3 => Some(Backing::FileShared),
        4 => Some(Backing::Special),
        _ => None,
    }
}

fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_tid<R: Read>(r: &mut R) -> io::Result<Tid> {
    let mut buf = [0u8; std::mem::size_of::<Tid>()];
    r.read_exact(&mut buf)?;
    Ok(Tid::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_empty_snapshot() {
        let snap = Snapshot::new(42, VirtualTime::new(1, 2));
        let mut buf = Vec::new();
        snap.write_to(&mut buf).unwrap();
        let back = Snapshot::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.frame_count, 42);
        assert_eq!(back.virtual_time, VirtualTime::new(1, 2));
        assert!(back.threads.is_empty());
        assert!(back.regions.is_empty());
    }

    #[test]
    fn round_trips_threads_and_regions_and_page_bytes() {
        let mut snap = Snapshot::new(7, VirtualTime::new(0, 0));
        snap.threads.push(ThreadSnapshot { tid: 1234, is_main: true, registers: vec![0xAB; 27 * 8] });
        let region_a = vec![1u8; PAGE_SIZE];
        snap.push_region_full(0x1000, 0x1000 + PAGE_SIZE, Permissions { read: true, write: true, exec: false }, Backing::AnonPrivate, None, &region_a);
        let region_b = vec![9u8; PAGE_SIZE];
        snap.push_region_full(
            0x5000,
            0x5000 + PAGE_SIZE,
            Permissions { read: true, write: true, exec: false },
            Backing::FileShared,
            Some("/dev/shm/x".into()),
            &region_b,
        );

        let mut buf = Vec::new();
        snap.write_to(&mut buf).unwrap();
        let back = Snapshot::read_from(&mut &buf[..]).unwrap();

        assert_eq!(back.threads.len(), 1);
        assert_eq!(back.threads[0].tid, 1234);
        assert!(back.threads[0].is_main);
        assert_eq!(back.regions.len(), 2);
        assert_eq!(back.regions[1].path.as_deref(), Some("/dev/shm/x"));
        let resolved = back.resolved_regions();
        assert_eq!(resolved[0].1, region_a);
        assert_eq!(resolved[1].1, region_b);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = [0u8; 32];
        let err = Snapshot::read_from(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, RestoreError::HeaderMismatch(_)));
    }

    #[test]
    fn incremental_chain_resolves_untouched_pages_from_base() {
        // Two pages; the base captures both full, the incremental child
        // only overwrites page 1, page 0 must still resolve from base.
        let mut base = Snapshot::new(1, VirtualTime::ZERO);
        let mut full = vec![0u8; 2 * PAGE_SIZE];
        full[..PAGE_SIZE].fill(0xAA);
        full[PAGE_SIZE..].fill(0xBB);
        base.push_region_full(0x2000, 0x2000 + 2 * PAGE_SIZE, Permissions { read: true, write: true, exec: false }, Backing::AnonPrivate, None, &full);

        let mut incremental = Snapshot::new(2, VirtualTime::ZERO);
        let new_page_1 = vec![0xCC; PAGE_SIZE];
        incremental.push_region_sparse(
            0x2000,
            0x2000 + 2 * PAGE_SIZE,
            Permissions { read: true, write: true, exec: false },
            Backing::AnonPrivate,
            None,
            &[(1, &new_page_1)],
        );
        incremental.base = Some(Box::new(base));

        let resolved = incremental.resolved_regions();
        assert_eq!(resolved.len(), 1);
        let (_, bytes) = &resolved[0];
        assert_eq!(&bytes[..PAGE_SIZE], &[0xAAu8; PAGE_SIZE][..], "page 0 must come from the base snapshot");
        assert_eq!(&bytes[PAGE_SIZE..], &[0xCCu8; PAGE_SIZE][..], "page 1 must come from the incremental capture");
    }

    #[test]
    fn incremental_chain_with_no_new_pages_still_tracks_the_region() {
        let mut base = Snapshot::new(1, VirtualTime::ZERO);
        let data = vec![0x11u8; PAGE_SIZE];
        base.push_region_full(0x3000, 0x3000 + PAGE_SIZE, Permissions { read: true, write: true, exec: false }, Backing::AnonPrivate, None, &data);

        let mut incremental = Snapshot::new(2, VirtualTime::ZERO);
        incremental.push_region_sparse(0x3000, 0x3000 + PAGE_SIZE, Permissions { read: true, write: true, exec: false }, Backing::AnonPrivate, None, &[]);
        incremental.base = Some(Box::new(base));

        let resolved = incremental.resolved_regions();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].1, data);
    }
}
