//! Shared wire types and data model for the determinism agent and its
//! controller: everything that crosses the agent/controller boundary (the
//! control socket or the shared-memory region) lives here so neither side
//! can drift out of sync with the other.

pub mod call_kind;
pub mod framerate;
pub mod input_frame;
pub mod movie_config;
pub mod shared_config;
pub mod virtual_time;
pub mod wire;

pub use call_kind::{CallKind, CallTypeCounter};
pub use framerate::{FrameIncrementCarry, FrameRate};
pub use input_frame::{GamepadState, InputFrame, InputFrameFlags, MouseMode, MouseState};
pub use movie_config::TimetrackConfig;
pub use shared_config::{QuirkFlags, SharedConfig, SleepHandling, WaitHandling};
pub use virtual_time::{RealtimeDelta, VirtualTime};
pub use wire::{Frame, Tag, WireError};
