//! The control link itself (spec.md §4.9): a length-prefixed message stream
//! generic over any `Read + Write` transport, so the real UNIX-domain
//! socket and an in-memory duplex (for tests) can share one implementation.
//!
//! Grounded on `rust/scx_stats/examples/client.rs`'s request/reply client
//! loop, generalized from "one JSON request, one JSON reply" to this
//! protocol's `FRAME_BEGIN` → (zero or more controller messages) →
//! `FRAME_END` shape (spec.md §4.6 step 4 onward).

use std::io::{Read, Write};

use tas_protocol::{Frame, Tag};

use crate::error::ControlError;
use crate::handshake::{check_compatible, parse_hello_payload, Version};

pub struct ControlLink<S> {
    stream: S,
}

impl<S: Read + Write> ControlLink<S> {
    pub fn new(stream: S) -> Self {
        ControlLink { stream }
    }

    pub fn send(&mut self, frame: Frame) -> Result<(), ControlError> {
        frame.write_to(&mut self.stream).map_err(Into::into)
    }

    pub fn recv(&mut self) -> Result<Frame, ControlError> {
        Frame::read_from(&mut self.stream).map_err(Into::into)
    }

    /// Agent side of the handshake (spec.md §6): block for the
    /// controller's `HELLO`, check compatibility, then reply with the
    /// agent's own version. Returns the controller's version on success.
    pub fn handshake_as_agent(&mut self, agent_version: Version) -> Result<Version, ControlError> {
        let hello = self.recv()?;
        if hello.tag != Tag::Hello {
            return Err(ControlError::HandshakeExpected(hello.tag));
        }
        let controller_version = parse_hello_payload(&hello.payload)?;
        check_compatible(agent_version, controller_version)?;
        self.send(Frame::new(Tag::Hello, agent_version.to_bytes().to_vec()))?;
        Ok(controller_version)
    }

    /// Controller side of the handshake: send `HELLO` first, then wait for
    /// the agent's reply.
    pub fn handshake_as_controller(&mut self, controller_version: Version) -> Result<Version, ControlError> {
        self.send(Frame::new(Tag::Hello, controller_version.to_bytes().to_vec()))?;
        let reply = self.recv()?;
        if reply.tag != Tag::Hello {
            return Err(ControlError::HandshakeExpected(reply.tag));
        }
        let agent_version = parse_hello_payload(&reply.payload)?;
        check_compatible(controller_version, agent_version)?;
        Ok(agent_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;

    #[test]
    fn handshake_succeeds_over_a_connected_socket_pair() {
        let (agent_sock, controller_sock) = UnixStream::pair().unwrap();
        let mut agent = ControlLink::new(agent_sock);
        let mut controller = ControlLink::new(controller_sock);

        let controller_thread = std::thread::spawn(move || controller.handshake_as_controller(Version::CURRENT));

        let controller_version = agent.handshake_as_agent(Version::CURRENT).unwrap();
        assert_eq!(controller_version, Version::CURRENT);

        let agent_version = controller_thread.join().unwrap().unwrap();
        assert_eq!(agent_version, Version::CURRENT);
    }

    #[test]
    fn incompatible_major_version_fails_the_handshake() {
        let (agent_sock, controller_sock) = UnixStream::pair().unwrap();
        let mut agent = ControlLink::new(agent_sock);
        let mut controller = ControlLink::new(controller_sock);

        let controller_thread = std::thread::spawn(move || controller.handshake_as_controller(Version::new(2, 0, 0)));

        let result = agent.handshake_as_agent(Version::new(1, 0, 0));
        assert!(result.is_err());
        let _ = controller_thread.join();
    }

    #[test]
    fn non_hello_first_message_is_rejected() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        Frame::empty(Tag::FrameBegin).write_to(&mut a).unwrap();
        let mut agent = ControlLink::new(b);
        let err = agent.handshake_as_agent(Version::CURRENT).unwrap_err();
        assert!(matches!(err, ControlError::HandshakeExpected(Tag::FrameBegin)));
        drop(a);
    }

    #[test]
    fn send_then_recv_round_trips_a_frame() {
        let (mut a, b) = UnixStream::pair().unwrap();
        let frame = Frame::new(Tag::InputUpdate, vec![1, 2, 3, 4]);
        frame.clone().write_to(&mut a).unwrap();
        let mut link = ControlLink::new(b);
        let received = link.recv().unwrap();
        assert_eq!(received, frame);
    }
}
