//! Sleep/wait interception router (spec.md §4.4, component C4).
//!
//! Every intercepted sleep/poll/select/wait primitive ends up here to decide
//! one of three things: actually sleep/wait on the real OS, fold the
//! requested duration into the virtual clock via
//! [`tas_timer::deterministic::DeterministicTimer::add_delay`], or return
//! immediately. The router never performs the real syscall itself — that
//! stays in the hook implementation (`tas-hooks`/`tas-agent`), which also
//! owns forwarding whatever error/cancellation the real call produced
//! unchanged (spec.md §4.4 "Cancellation", §7 "intercepted syscalls never
//! raise errors they would not have raised").
//!
//! Grounded on `waitwrappers.cpp`'s `transfer_sleep`-driven `poll`/`select`/
//! `ppoll`/`pselect`/`epoll_wait` overrides and `sleepwrappers.h`'s
//! `transfer_sleep` declaration for the sleep half.

pub mod condvar;
pub mod sleep;
pub mod wait;

pub use condvar::{route_condvar_wait, CondWaiter};
pub use sleep::route_sleep;
pub use wait::{route_finite_wait_result, route_poll_with_audio_fd, AudioWait};
