//! The per-frame authoritative input channel (spec.md §3 "InputFrame", §4.5,
//! component C5).
//!
//! One [`tas_protocol::InputFrame`] is live at a time, replaced wholesale by
//! the frame-boundary orchestrator when an `INPUT_UPDATE` message arrives
//! (spec.md §4.6 step 5) and served unmodified to every intercepted
//! keyboard/mouse/gamepad query until the next replacement. This is what
//! makes the game's view of its inputs independent of real keyboard/mouse
//! timing: within one frame, every query sees the same record.

use std::sync::RwLock;

use tas_protocol::input_frame::{GamepadState, InputFrame, MouseState};

/// Holds the one live [`InputFrame`], gated so only the orchestrator can
/// replace it (spec.md §4.5: "Writes to the record outside the frame
/// boundary are disallowed").
pub struct InputChannel {
    current: RwLock<InputFrame>,
}

impl Default for InputChannel {
    fn default() -> Self {
        InputChannel { current: RwLock::new(InputFrame::default()) }
    }
}

impl InputChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the authoritative frame. Only valid while the caller holds
    /// the agent's `own_code` scope (spec.md §4.2) — i.e. from inside the
    /// frame-boundary orchestrator's controller-message loop, never from a
    /// hook running on behalf of the game. A call outside that scope is
    /// logged and dropped rather than silently corrupting replay.
    pub fn replace_frame(&self, frame: InputFrame) {
        if !tas_globalstate::is_own_code() {
            log::error!("InputChannel::replace_frame called outside the frame boundary; ignoring update");
            return;
        }
        *self.current.write().unwrap() = frame;
    }

    /// A consistent snapshot of the live frame. `InputFrame` is `Copy`, so
    /// every caller within the same frame observes the exact same value
    /// (spec.md §4.5's determinism guarantee) regardless of read ordering.
    pub fn current(&self) -> InputFrame {
        *self.current.read().unwrap()
    }

    pub fn is_key_down(&self, keycode: u16) -> bool {
        self.current().is_key_down(keycode)
    }

    pub fn mouse(&self) -> MouseState {
        self.current().mouse
    }

    pub fn gamepad(&self, index: usize) -> Option<GamepadState> {
        self.current().gamepad(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_outside_own_code_scope_is_rejected() {
        let channel = InputChannel::new();
        let mut frame = InputFrame::default();
        frame.set_key(10, true);
        channel.replace_frame(frame);
        assert!(!channel.is_key_down(10), "write outside own_code scope must be dropped");
    }

    #[test]
    fn write_inside_own_code_scope_is_applied() {
        let channel = InputChannel::new();
        let mut frame = InputFrame::default();
        frame.set_key(10, true);
        {
            let _guard = tas_globalstate::enter_own_code();
            channel.replace_frame(frame);
        }
        assert!(channel.is_key_down(10));
    }

    #[test]
    fn repeated_reads_within_one_frame_are_identical() {
        let channel = InputChannel::new();
        let mut frame = InputFrame::default();
        frame.mouse.x = 42;
        {
            let _guard = tas_globalstate::enter_own_code();
            channel.replace_frame(frame);
        }
        let a = channel.current();
        let b = channel.current();
        assert_eq!(a, b);
    }

    #[test]
    fn disconnected_gamepad_reads_as_none() {
        let channel = InputChannel::new();
        assert!(channel.gamepad(0).is_none());
    }
}
