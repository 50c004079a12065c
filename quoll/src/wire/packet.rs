use super::{Buffer, WireError, PAYLOAD_MAX_SIZE};
use crate::{Error, Result};

/// A cleartext packet payload, after stripping framing, padding and
/// compression.
#[derive(Debug, Clone)]
pub struct Packet {
    /// The message bytes, starting with the message identifier.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Minimum size of a whole packet on the wire, per RFC 4253 §6.
    pub const MIN_SIZE: usize = 16;

    /// The message identifier of the payload.
    pub fn message_id(&self) -> u8 {
        self.payload.first().copied().unwrap_or_default()
    }

    /// Decode the payload into a typed message.
    pub fn to<T: Wire>(&self) -> Result<T> {
        if self.message_id() != T::ID {
            return Err(Error::UnexpectedMessage);
        }

        let mut buffer = Buffer::from_payload(self.payload[1..].to_vec());

        Ok(T::decode(&mut buffer)?)
    }
}

/// The codec implemented by every typed wire message.
pub trait Wire: Sized {
    /// The message identifier, as assigned by RFC 4250 §4.1.2.
    const ID: u8;

    /// Encode the message body, without the identifier byte.
    fn encode(&self, buf: &mut Buffer) -> Result<(), WireError>;

    /// Decode the message body, without the identifier byte.
    fn decode(buf: &mut Buffer) -> Result<Self, WireError>;
}

/// Conversion of typed messages (or passthrough packets) into [`Packet`]s.
pub trait IntoPacket {
    /// Perform the conversion.
    fn into_packet(self) -> Result<Packet>;
}

impl<T: Wire> IntoPacket for &T {
    fn into_packet(self) -> Result<Packet> {
        let mut buffer = Buffer::new(PAYLOAD_MAX_SIZE)?;

        buffer.put_u8(T::ID)?;
        self.encode(&mut buffer)?;

        Ok(Packet {
            payload: buffer.into_payload(),
        })
    }
}

impl IntoPacket for Packet {
    fn into_packet(self) -> Result<Packet> {
        Ok(self)
    }
}
