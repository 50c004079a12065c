//! Primitives to encode and decode the SSH binary protocol.

mod buffer;
pub use buffer::{Buffer, MpInt, NameList, WireError};

mod id;
pub use id::Id;

mod packet;
pub use packet::{IntoPacket, Packet, Wire};

pub mod msg;
pub use msg::DisconnectReason;

/// Hard bound on a whole packet (`packet_length` field), as recommended
/// by RFC 4253 §6.1.
pub const PACKET_MAX_SIZE: usize = 35_000;

/// Bound on a single cleartext payload, leaving headroom for the packet
/// header, padding and integrity tag within [`PACKET_MAX_SIZE`].
pub const PAYLOAD_MAX_SIZE: usize = 34_000;
