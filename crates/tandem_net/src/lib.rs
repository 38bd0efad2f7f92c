//! Tandem Network Layer
//!
//! Point-to-point peer links with two logical channels each:
//! - **Reliable**: ordered, retransmitted. Carries lockstep input.
//! - **Unreliable**: unordered, at-most-once, may drop. Carries hints.
//!
//! The transport moves opaque bytes. Framing of input and sync messages is
//! the caller's responsibility.

pub mod error;
pub mod link;
pub mod membership;
pub mod memory;
pub mod mesh;
pub mod quic;

pub use error::TransportError;
pub use link::{Channel, ChannelState, ChannelStats, LinkStats, MessageHandler, PeerLink};
pub use membership::{MemberState, MembershipTable};
pub use memory::{LinkConditioner, MemoryLink};
pub use mesh::{Inbound, PeerMesh};
pub use quic::{QuicConfig, QuicLink, QuicListener};
pub use tandem_core::PeerId;

/// Network protocol version
pub const PROTOCOL_VERSION: u32 = 1;
