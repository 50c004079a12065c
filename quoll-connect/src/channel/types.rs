use std::{future::Future, pin::Pin};

use quoll::wire::msg::{ChannelOpenFailureReason, ChannelRequest};

use super::{Channel, Outgoing, Streams};

/// An inbound `SSH_MSG_CHANNEL_OPEN`, as presented to a [`ChannelType`].
#[derive(Debug)]
pub struct OpenRequest<'r> {
    /// The local index allocated for the channel.
    pub index: u32,

    /// The channel type name, as requested.
    pub channel_type: &'r str,

    /// The type-specific trailing data of the open message.
    pub data: &'r [u8],
}

/// A deferred open, for types that connect somewhere asynchronously
/// before confirming.
pub type PendingOpen =
    Pin<Box<dyn Future<Output = Result<Streams, (ChannelOpenFailureReason, String)>> + Send>>;

/// The outcome of a [`ChannelType::open`].
pub enum Open {
    /// Confirm the channel right away, bridged to `Streams`.
    Ready(Streams),

    /// Confirm or fail later, once the future resolves.
    Pending(PendingOpen),

    /// Reject the open with a reason code.
    Failure(ChannelOpenFailureReason, String),
}

/// A channel type registered with the connect layer.
///
/// The trait is the seam concrete types (sessions, forwarded
/// connections, ...) plug into; the core calls each hook at the
/// documented lifecycle point.
pub trait ChannelType: Send {
    /// The type name matched against `SSH_MSG_CHANNEL_OPEN`.
    fn name(&self) -> &'static str;

    /// Set up a channel opened by the peer.
    fn open(&mut self, request: OpenRequest<'_>) -> Open;

    /// Handle a `SSH_MSG_CHANNEL_REQUEST`; the returned flag becomes the
    /// success/failure reply when one was asked for.
    fn request(
        &mut self,
        channel: &mut Channel,
        request: &ChannelRequest,
        out: &mut Outgoing,
    ) -> bool {
        let _ = (channel, request, out);

        false
    }

    /// Whether the channel should close regardless of stream EOFs, such
    /// as when a child process exited.
    fn check_close(&mut self, channel: &Channel) -> bool {
        let _ = channel;

        false
    }

    /// Called right before `SSH_MSG_CHANNEL_CLOSE` is sent, the place to
    /// emit final requests such as `exit-status`.
    fn on_close(&mut self, channel: &Channel, out: &mut Outgoing) {
        let _ = (channel, out);
    }

    /// Called just before the slot is freed.
    fn cleanup(&mut self, channel: &Channel) {
        let _ = channel;
    }
}
