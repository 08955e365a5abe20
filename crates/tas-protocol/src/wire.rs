//! Length-prefixed message framing between the controller and the agent
//! (spec.md §4.9/§6).
//!
//! Grounded on the request/response framing shape of
//! `rust/scx_stats/examples/client.rs` (a line-delimited JSON request sent
//! down a UNIX socket, a JSON reply read back), generalized here from
//! JSON-over-socket to a raw fixed-width binary header followed by a
//! `bincode`-free fixed-layout payload, since spec.md §9 rules out pulling in
//! a JSON/serde-over-async stack for the hot control path.

use std::io::{self, Read, Write};

/// Every message on the wire starts with this 8-byte header:
/// `(tag: u32 little-endian, payload_len: u32 little-endian)`.
pub const HEADER_LEN: usize = 8;

/// Largest payload this protocol accepts in one frame; a HELLO handshake or
/// a SAVESTATE_RESULT error string, not full savestate blobs (those live in
/// the shared-memory region and are referenced by slot index, spec.md §6).
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Tag {
    /// Controller -> agent: first message on a fresh connection.
    Hello = 1,
    /// Controller -> agent: a new `SharedConfig` is ready to be adopted.
    ConfigUpdate = 2,
    /// Controller -> agent: this frame's `InputFrame` is ready.
    InputUpdate = 3,
    /// Agent -> controller: the agent has entered a frame boundary.
    FrameBegin = 4,
    /// Agent -> controller: the agent is about to leave a frame boundary.
    FrameEnd = 5,
    /// Controller -> agent: save the current state into the given slot.
    Savestate = 6,
    /// Controller -> agent: load the given slot's state.
    Loadstate = 7,
    /// Agent -> controller: result of a prior `Savestate` request.
    SavestateResult = 8,
    /// Agent -> controller: result of a prior `Loadstate` request.
    LoadstateResult = 9,
    /// Agent -> controller: the game's window has been created/resized.
    WindowId = 10,
    /// Either direction: tear down the connection.
    Quit = 11,
    /// Agent -> controller: a human-readable diagnostic to surface to the user.
    AlertMsg = 12,
}

impl Tag {
    pub fn from_u32(raw: u32) -> Option<Tag> {
        Some(match raw {
            1 => Tag::Hello,
            2 => Tag::ConfigUpdate,
            3 => Tag::InputUpdate,
            4 => Tag::FrameBegin,
            5 => Tag::FrameEnd,
            6 => Tag::Savestate,
            7 => Tag::Loadstate,
            8 => Tag::SavestateResult,
            9 => Tag::LoadstateResult,
            10 => Tag::WindowId,
            11 => Tag::Quit,
            12 => Tag::AlertMsg,
            _ => return None,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error on control channel: {0}")]
    Io(#[from] io::Error),
    #[error("unrecognized message tag {0}")]
    UnknownTag(u32),
    #[error("payload length {0} exceeds MAX_PAYLOAD_LEN ({MAX_PAYLOAD_LEN})")]
    PayloadTooLarge(u32),
}

/// A single framed message as read off (or about to be written to) the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(tag: Tag, payload: Vec<u8>) -> Self {
        Frame { tag, payload }
    }

    pub fn empty(tag: Tag) -> Self {
        Frame { tag, payload: Vec::new() }
    }

    /// Write this frame's header and payload to `w` in one call; the caller
    /// is responsible for buffering (spec.md §6 assumes a `BufWriter`-wrapped
    /// `UnixStream`, matching `scx_stats`'s own client loop).
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<(), WireError> {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&(self.tag as u32).to_le_bytes());
        header[4..8].copy_from_slice(&(self.payload.len() as u32).to_le_bytes());
        w.write_all(&header)?;
        w.write_all(&self.payload)?;
        Ok(())
    }

    /// Read exactly one frame from `r`, blocking until the header and full
    /// payload have arrived.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Frame, WireError> {
        let mut header = [0u8; HEADER_LEN];
        r.read_exact(&mut header)?;
        let tag_raw = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let len = u32::from_le_bytes(header[4..8].try_into().unwrap());
        if len > MAX_PAYLOAD_LEN {
            return Err(WireError::PayloadTooLarge(len));
        }
        let tag = Tag::from_u32(tag_raw).ok_or(WireError::UnknownTag(tag_raw))?;
        let mut payload = vec![0u8; len as usize];
        r.read_exact(&mut payload)?;
        Ok(Frame { tag, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_frame_with_payload() {
        let frame = Frame::new(Tag::AlertMsg, b"controller disconnected".to_vec());
        let mut buf = Vec::new();
        frame.write_to(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let read_back = Frame::read_from(&mut cursor).unwrap();
        assert_eq!(read_back, frame);
    }

    #[test]
    fn round_trips_an_empty_frame() {
        let frame = Frame::empty(Tag::FrameBegin);
        let mut buf = Vec::new();
        frame.write_to(&mut buf).unwrap();
        let mut cursor = Cursor::new(buf);
        let read_back = Frame::read_from(&mut cursor).unwrap();
        assert_eq!(read_back, frame);
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&999u32.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        let mut cursor = Cursor::new(buf);
        let err = Frame::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, WireError::UnknownTag(999)));
    }

    #[test]
    fn rejects_oversized_payload_len_before_reading_it() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(Tag::Hello as u32).to_le_bytes());
        buf.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        let mut cursor = Cursor::new(buf);
        let err = Frame::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge(_)));
    }

    #[test]
    fn truncated_header_is_an_io_error() {
        let mut cursor = Cursor::new(vec![0u8; 3]);
        let err = Frame::read_from(&mut cursor).unwrap_err();
        assert!(matches!(err, WireError::Io(_)));
    }
}
