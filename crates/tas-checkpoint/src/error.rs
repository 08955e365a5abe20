//! `SnapshotError`/`RestoreError` (spec.md §7).

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("I/O error writing slot {slot}: {source}")]
    Io { slot: u32, #[source] source: std::io::Error },
    #[error("failed to parse /proc/self/maps: {0}")]
    MapsParse(String),
    #[error("mmap/mprotect failed while capturing region {0:#x}-{1:#x}: {2}")]
    MapFailure(usize, usize, #[source] std::io::Error),
    #[error("no previous snapshot in slot {0} to chain an incremental capture onto")]
    NoBaseSnapshot(u32),
    #[error("checkpoint barrier did not park all {expected} threads within the timeout ({parked} parked)")]
    BarrierTimeout { expected: usize, parked: usize },
}

/// A mid-restore failure leaves the process in an undefined state (spec.md
/// §7: "documented as unrecoverable"). This type exists so the one call site
/// that can produce it is explicit about that contract; callers must not
/// attempt to recover from it.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error("slot {0} has no snapshot to load")]
    NoSuchSlot(u32),
    #[error("snapshot header magic/version mismatch: {0}")]
    HeaderMismatch(String),
    #[error("I/O error reading slot {slot}: {source}")]
    Io { slot: u32, #[source] source: std::io::Error },
    #[error("mmap/mprotect failed while restoring region {0:#x}-{1:#x}: {2}")]
    MapFailure(usize, usize, #[source] std::io::Error),
    #[error("checkpoint barrier did not park all {expected} threads within the timeout ({parked} parked)")]
    BarrierTimeout { expected: usize, parked: usize },
}
