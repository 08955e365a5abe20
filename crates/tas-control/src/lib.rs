//! Control link (spec.md §4.9, component C9): the length-prefixed UNIX
//! socket message stream to the controller, plus the shared-memory
//! `SharedConfig` region spec.md §6 says large blobs and the live
//! configuration travel through instead of the socket itself.
//!
//! Grounded on `rust/scx_stats/examples/client.rs` for the socket
//! client-loop shape and on `tas-protocol::wire` for the framing this
//! module builds its handshake and dispatch on top of.

pub mod error;
pub mod handshake;
pub mod link;
pub mod shared_region;

pub use error::ControlError;
pub use handshake::Version;
pub use link::ControlLink;
pub use shared_region::SharedConfigRegion;
