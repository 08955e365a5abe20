//! *ProtocolError*/*ConfigError* (spec.md §7): a malformed or unexpected
//! control message is fatal by design (spec.md §5: "losing sync with the
//! controller is unrecoverable").

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Wire(#[from] tas_protocol::WireError),
    #[error("expected a HELLO as the first message, got tag {0:?}")]
    HandshakeExpected(tas_protocol::Tag),
    #[error("controller semver {controller} is incompatible with agent semver {agent}")]
    VersionMismatch { controller: String, agent: String },
    #[error("received tag {0:?} with a payload of the wrong size ({1} bytes)")]
    MalformedPayload(tas_protocol::Tag, usize),
    #[error("unexpected tag {0:?} for this message slot")]
    UnexpectedTag(tas_protocol::Tag),
    #[error("shared-memory region setup failed: {0}")]
    SharedRegion(#[from] std::io::Error),
}
