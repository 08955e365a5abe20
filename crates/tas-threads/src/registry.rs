//! The thread registry itself (spec.md §4.7).

use std::collections::HashMap;
use std::sync::RwLock;

use crate::registers::RegisterFile;
use crate::role::ThreadRole;
use crate::state::ThreadState;

pub type Tid = libc::pid_t;

/// One registered thread (spec.md §3 "Thread").
#[derive(Debug, Clone)]
pub struct Thread {
    pub tid: Tid,
    pub role: ThreadRole,
    pub state: ThreadState,
    /// `(low, high)` address extent of this thread's stack, used by the
    /// checkpoint engine's "always dump each thread's stack" region-selection
    /// rule (spec.md §4.8).
    pub stack: (usize, usize),
    pub tls_area: usize,
    pub last_saved_registers: RegisterFile,
}

impl Thread {
    fn new(tid: Tid, role: ThreadRole, stack: (usize, usize), tls_area: usize) -> Self {
        Thread {
            tid,
            role,
            state: ThreadState::Running,
            stack,
            tls_area,
            last_saved_registers: RegisterFile::default(),
        }
    }
}

/// Process-wide registry of every thread the game has created (spec.md
/// §4.7), protected by a single reader-writer lock (spec.md §5).
///
/// Invariant (spec.md §3): at any time exactly one thread is the main
/// thread. `main_tid` tracks it separately from the per-thread `role` field
/// so `is_main` is a single atomic-ish read rather than a registry scan.
#[derive(Default)]
pub struct ThreadRegistry {
    threads: RwLock<HashMap<Tid, Thread>>,
    main_tid: RwLock<Option<Tid>>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        ThreadRegistry::default()
    }

    /// Called from the intercepted thread-start wrapper on entry (spec.md
    /// §4.7). The first thread ever registered becomes the main thread
    /// unless a main thread is already set.
    pub fn register_thread(&self, tid: Tid, stack: (usize, usize), tls_area: usize) {
        let mut main_tid = self.main_tid.write().unwrap();
        let role = if main_tid.is_none() {
            *main_tid = Some(tid);
            ThreadRole::Main
        } else {
            ThreadRole::Worker
        };
        drop(main_tid);
        self.threads.write().unwrap().insert(tid, Thread::new(tid, role, stack, tls_area));
    }

    /// Called from the exit hook (spec.md §4.7). If the exiting thread was
    /// the main thread, the registry is left without one until the next
    /// `promote_to_main` call — callers must arrange a new frame-driving
    /// thread first (spec.md §4.7: "A worker thread that performs its first
    /// present becomes the new frame-driving thread").
    pub fn remove_thread(&self, tid: Tid) {
        self.threads.write().unwrap().remove(&tid);
        let mut main_tid = self.main_tid.write().unwrap();
        if *main_tid == Some(tid) {
            *main_tid = None;
        }
    }

    /// Explicit role override, used by engine-specific quirk code (spec.md
    /// §4.7), e.g. tagging the GC finalizer thread so the checkpoint engine
    /// can special-case it.
    pub fn set_role(&self, tid: Tid, role: ThreadRole) {
        if let Some(thread) = self.threads.write().unwrap().get_mut(&tid) {
            thread.role = role;
        }
    }

    pub fn set_state(&self, tid: Tid, state: ThreadState) {
        if let Some(thread) = self.threads.write().unwrap().get_mut(&tid) {
            thread.state = state;
        }
    }

    pub fn save_registers(&self, tid: Tid, registers: RegisterFile) {
        if let Some(thread) = self.threads.write().unwrap().get_mut(&tid) {
            thread.last_saved_registers = registers;
        }
    }

    pub fn is_main(&self, tid: Tid) -> bool {
        *self.main_tid.read().unwrap() == Some(tid)
    }

    pub fn main_tid(&self) -> Option<Tid> {
        *self.main_tid.read().unwrap()
    }

    /// A worker thread's first present call migrates frame-driving duties
    /// to it (spec.md §4.7: "games occasionally migrate"). The previous
    /// main thread, if still registered, becomes a plain worker.
    pub fn promote_to_main(&self, tid: Tid) {
        let mut main_tid = self.main_tid.write().unwrap();
        if let Some(previous) = *main_tid {
            if previous != tid {
                if let Some(thread) = self.threads.write().unwrap().get_mut(&previous) {
                    thread.role = ThreadRole::Worker;
                }
            }
        }
        *main_tid = Some(tid);
        if let Some(thread) = self.threads.write().unwrap().get_mut(&tid) {
            thread.role = ThreadRole::Main;
        }
    }

    /// Snapshot of every registered thread, used only at checkpoint barriers
    /// (spec.md §4.7).
    pub fn iter_threads(&self) -> Vec<Thread> {
        self.threads.read().unwrap().values().cloned().collect()
    }

    /// Every registered tid other than `tid`, used to raise the checkpoint
    /// barrier signal (spec.md §4.8 "Barrier").
    pub fn other_tids(&self, tid: Tid) -> Vec<Tid> {
        self.threads.read().unwrap().keys().copied().filter(|&t| t != tid).collect()
    }

    pub fn len(&self) -> usize {
        self.threads.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_registered_thread_becomes_main() {
        let registry = ThreadRegistry::new();
        registry.register_thread(1, (0, 0x1000), 0);
        registry.register_thread(2, (0, 0x1000), 0);
        assert!(registry.is_main(1));
        assert!(!registry.is_main(2));
    }

    #[test]
    fn exactly_one_main_thread_invariant_holds_across_removal() {
        let registry = ThreadRegistry::new();
        registry.register_thread(1, (0, 0x1000), 0);
        registry.remove_thread(1);
        assert_eq!(registry.main_tid(), None);
        registry.register_thread(2, (0, 0x1000), 0);
        assert!(registry.is_main(2));
    }

    #[test]
    fn promote_to_main_demotes_the_previous_main_thread() {
        let registry = ThreadRegistry::new();
        registry.register_thread(1, (0, 0x1000), 0);
        registry.register_thread(2, (0, 0x1000), 0);
        registry.promote_to_main(2);
        assert!(registry.is_main(2));
        assert!(!registry.is_main(1));
    }

    #[test]
    fn other_tids_excludes_the_given_tid() {
        let registry = ThreadRegistry::new();
        registry.register_thread(1, (0, 0x1000), 0);
        registry.register_thread(2, (0, 0x1000), 0);
        registry.register_thread(3, (0, 0x1000), 0);
        let mut others = registry.other_tids(1);
        others.sort();
        assert_eq!(others, vec![2, 3]);
    }

    #[test]
    fn set_role_and_set_state_update_in_place() {
        let registry = ThreadRegistry::new();
        registry.register_thread(5, (0, 0x1000), 0);
        registry.set_role(5, ThreadRole::Finalizer);
        registry.set_state(5, ThreadState::AtCheckpointBarrier);
        let thread = registry.iter_threads().into_iter().find(|t| t.tid == 5).unwrap();
        assert_eq!(thread.role, ThreadRole::Finalizer);
        assert_eq!(thread.state, ThreadState::AtCheckpointBarrier);
    }
}
