//! Payload encoding for the frame-boundary dispatch loop's messages
//! (spec.md §4.6 step 4-5, §6 "Tags").
//!
//! `CONFIG_UPDATE`/`INPUT_UPDATE` payloads are just the raw bytes of the
//! `#[repr(C)]` POD structs they carry (the same "plain fixed-width fields"
//! convention `tas-protocol` already uses for the shared-memory region), so
//! no separate wire format is invented for them here.

use tas_protocol::{InputFrame, SharedConfig, VirtualTime};

use crate::error::AgentError;

/// `{framecount: u64, draw: u8, virtual_time: (u64, u32)}`, spec.md §4.6
/// step 4.
pub struct FrameBegin {
    pub frame_count: u64,
    pub draw: bool,
    pub virtual_time: VirtualTime,
}

impl FrameBegin {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17);
        buf.extend_from_slice(&self.frame_count.to_le_bytes());
        buf.push(self.draw as u8);
        buf.extend_from_slice(&self.virtual_time.secs().to_le_bytes());
        buf.extend_from_slice(&self.virtual_time.nanos().to_le_bytes());
        buf
    }
}

/// `{status: u8}`; `0` is success, `1` is failure, matching the
/// `SAVESTATE_RESULT`/`LOADSTATE_RESULT` tags' "reply with result status"
/// wording (spec.md §4.6 step 5).
pub fn result_ok_bytes() -> Vec<u8> {
    vec![0]
}

pub fn result_err_bytes() -> Vec<u8> {
    vec![1]
}

/// `LOADSTATE_RESULT`'s success payload additionally carries the restored
/// `(frame_count, virtual_time)` so the controller's own bookkeeping stays
/// in sync with the state it just jumped to.
pub fn loadstate_result_ok_bytes(frame_count: u64, virtual_time: VirtualTime) -> Vec<u8> {
    let mut buf = vec![0u8];
    buf.extend_from_slice(&frame_count.to_le_bytes());
    buf.extend_from_slice(&virtual_time.secs().to_le_bytes());
    buf.extend_from_slice(&virtual_time.nanos().to_le_bytes());
    buf
}

pub fn parse_slot(tag: tas_protocol::Tag, payload: &[u8]) -> Result<u32, AgentError> {
    let bytes: [u8; 4] =
        payload.try_into().map_err(|_| AgentError::MalformedMessage { tag, len: payload.len(), expected: 4 })?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn parse_shared_config(payload: &[u8]) -> Result<SharedConfig, AgentError> {
    let expected = std::mem::size_of::<SharedConfig>();
    if payload.len() != expected {
        return Err(AgentError::MalformedMessage { tag: tas_protocol::Tag::ConfigUpdate, len: payload.len(), expected });
    }
    // SAFETY: length was just checked and `SharedConfig` is `#[repr(C)]`/`Copy`/POD.
    Ok(unsafe { std::ptr::read_unaligned(payload.as_ptr().cast::<SharedConfig>()) })
}

pub fn parse_input_frame(payload: &[u8]) -> Result<InputFrame, AgentError> {
    let expected = std::mem::size_of::<InputFrame>();
    if payload.len() != expected {
        return Err(AgentError::MalformedMessage { tag: tas_protocol::Tag::InputUpdate, len: payload.len(), expected });
    }
    // SAFETY: length was just checked and `InputFrame` is `#[repr(C)]`/`Copy`/POD.
    Ok(unsafe { std::ptr::read_unaligned(payload.as_ptr().cast::<InputFrame>()) })
}

pub fn shared_config_to_bytes(config: &SharedConfig) -> Vec<u8> {
    let src = unsafe { std::slice::from_raw_parts((config as *const SharedConfig).cast::<u8>(), std::mem::size_of::<SharedConfig>()) };
    src.to_vec()
}

pub fn input_frame_to_bytes(frame: &InputFrame) -> Vec<u8> {
    let src = unsafe { std::slice::from_raw_parts((frame as *const InputFrame).cast::<u8>(), std::mem::size_of::<InputFrame>()) };
    src.to_vec()
}
