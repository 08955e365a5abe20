//! A thread's current execution state (spec.md §3 "Thread").

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    /// Inside an intercepted call that is blocking on the real OS (spec.md
    /// §5: "Any thread calling an intercepted function during a checkpoint
    /// barrier blocks until the barrier releases" relies on distinguishing
    /// this from `AtCheckpointBarrier`).
    BlockedInHook,
    /// Parked inside the checkpoint-barrier signal handler, waiting to be
    /// released (spec.md §4.8 "Barrier"; GLOSSARY "Parked thread").
    AtCheckpointBarrier,
}

impl Default for ThreadState {
    fn default() -> Self {
        ThreadState::Running
    }
}
