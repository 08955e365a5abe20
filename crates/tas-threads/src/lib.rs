//! Thread registry (spec.md §3 "Thread", §4.7, component C7).
//!
//! Tracks every thread the game has created: identity, role, current state,
//! stack extent, TLS pointer, and the last register file the checkpoint
//! engine (`tas-checkpoint`) saved for it. Entries are created by the
//! intercepted thread-start wrapper and cleared by the exit hook; the
//! checkpoint engine is the only other reader, and only at a checkpoint
//! barrier (spec.md §5).
//!
//! Grounded on `ThreadInfo.h`/`ThreadInfo.cpp` for the tid + register-file +
//! "does this thread need a ptrace attach" shape (`needattach` here becomes
//! moot — the agent is in-process, not a ptrace controller of a separate
//! process — but the tid/register-file pairing carries over directly), with
//! the role/state machine and reader-writer lock (spec.md §5: "protected by
//! a single reader-writer lock") added fresh for the registry's own
//! bookkeeping need.

pub mod registers;
pub mod registry;
pub mod role;
pub mod state;

pub use registers::RegisterFile;
pub use registry::{Thread, ThreadRegistry};
pub use role::ThreadRole;
pub use state::ThreadState;
