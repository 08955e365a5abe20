//! The authoritative per-frame input record (spec.md §3, "InputFrame"; §4.5).
//!
//! Field shapes are grounded on `ring_buffer.rs`'s `GamerInputEvent` (a
//! `#[repr(C)]` POD struct shared across a kernel/userspace boundary) — here
//! the boundary is agent/controller rather than kernel/userspace, but the
//! same "plain fixed-width fields, no pointers" requirement applies (this
//! struct crosses the shared-memory region, spec.md §6).

pub const MAX_GAMEPADS: usize = 4;
pub const MAX_GAMEPAD_AXES: usize = 6;

/// Relative pointer mode vs. absolute-position mode for the mouse, matching
/// how libTAS lets a game opt into a relative-motion capture mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MouseMode {
    #[default]
    Absolute = 0,
    Relative = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct MouseState {
    pub x: i32,
    pub y: i32,
    pub buttons: u8,
    pub mode: MouseMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct GamepadState {
    pub connected: bool,
    pub axes: [i16; MAX_GAMEPAD_AXES],
    pub buttons: u32,
}

bitflags::bitflags! {
    /// Miscellaneous per-frame flags (spec.md §3's "flags" field).
    #[derive(Default)]
    pub struct InputFrameFlags: u32 {
        /// This frame carries a per-frame framerate override (variable-rate movies).
        const FRAMERATE_OVERRIDE = 1 << 0;
        /// This frame carries a per-frame realtime override.
        const REALTIME_OVERRIDE = 1 << 1;
        /// The movie has reached its last recorded frame.
        const END_OF_MOVIE = 1 << 2;
    }
}

/// One frame's worth of authoritative input, delivered by the controller at
/// frame entry (spec.md §4.6 step 5, `INPUT_UPDATE`) and served unmodified
/// to every intercepted input query until the next frame boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct InputFrame {
    /// Bitset of up to 256 tracked key codes; bit `n` set means key `n` is down.
    pub keyboard: [u64; 4],
    pub mouse: MouseState,
    pub gamepads: [GamepadState; MAX_GAMEPADS],
    pub flags: InputFrameFlags,
    /// Only meaningful when `FRAMERATE_OVERRIDE` is set.
    pub framerate_num_override: u32,
    pub framerate_den_override: u32,
    /// Only meaningful when `REALTIME_OVERRIDE` is set; nanosecond offset.
    pub realtime_override_nanos: u64,
}

impl InputFrame {
    pub fn is_key_down(&self, keycode: u16) -> bool {
        let word = (keycode / 64) as usize;
        let bit = keycode % 64;
        word < self.keyboard.len() && (self.keyboard[word] >> bit) & 1 == 1
    }

    pub fn set_key(&mut self, keycode: u16, down: bool) {
        let word = (keycode / 64) as usize;
        let bit = keycode % 64;
        if word >= self.keyboard.len() {
            return;
        }
        if down {
            self.keyboard[word] |= 1 << bit;
        } else {
            self.keyboard[word] &= !(1 << bit);
        }
    }

    pub fn gamepad(&self, index: usize) -> Option<&GamepadState> {
        self.gamepads.get(index).filter(|g| g.connected)
    }
}
