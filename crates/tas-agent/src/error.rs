//! Orchestrator-level errors (spec.md §4.6 "Failure semantics", §7).

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("control link failure (unrecoverable, cannot safely resync): {0}")]
    Control(#[from] tas_control::ControlError),
    #[error("received {tag:?} with a {len}-byte payload, expected {expected}")]
    MalformedMessage { tag: tas_protocol::Tag, len: usize, expected: usize },
    #[error("{0:?} is not a valid message to receive inside the frame-boundary dispatch loop")]
    UnexpectedTag(tas_protocol::Tag),
    #[error(transparent)]
    Env(#[from] crate::env::EnvError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Not a failure: the controller sent `QUIT` (spec.md §4.6 step 5), so
    /// the frame-boundary call returns an error to unwind the caller out of
    /// the game's render loop into orderly shutdown.
    #[error("controller requested shutdown")]
    QuitRequested,
}
