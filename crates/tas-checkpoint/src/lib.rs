//! Fork-free incremental checkpoint/restore engine (spec.md §4.8, component
//! C8).
//!
//! Captures and restores the game's writable memory plus every registered
//! thread's register file, in-process, synchronized to a frame boundary via
//! a signal-based barrier that parks every thread but the one driving the
//! checkpoint. Grounded throughout on `linTAS/SaveState.{h,cpp}`,
//! `linTAS/StateSection.h`, and `library/checkpoint/AltStack.cpp`, adapted
//! from the original's ptrace-based cross-process design to direct
//! in-process memory access, since this agent is a preloaded shared library
//! running inside the game's own address space rather than an external
//! controller attached to it.

pub mod barrier;
pub mod engine;
pub mod error;
pub mod memory_region;
pub mod snapshot;
pub mod softdirty;

pub use barrier::CheckpointBarrier;
pub use engine::CheckpointEngine;
pub use error::{RestoreError, SnapshotError};
pub use memory_region::{read_self_maps, Backing, MemoryRegion, Permissions};
pub use snapshot::{RegionSnapshot, Snapshot, ThreadSnapshot};
