//! A thread's role in the game (spec.md §3 "Thread").

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThreadRole {
    Main,
    Worker,
    /// Engine garbage-collector finalizer thread, identified by
    /// game-specific quirk code via [`crate::registry::ThreadRegistry::set_role`]
    /// (spec.md §4.7).
    Finalizer,
    #[default]
    Unknown,
}
