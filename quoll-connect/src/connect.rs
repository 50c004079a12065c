//! Facilities to interact with the SSH _connect_ protocol.

use std::{
    task::Poll,
    time::{Duration, Instant},
};

use futures::FutureExt;

use quoll::{
    session::Session,
    side::Side,
    wire::{
        msg::{
            ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelFailure,
            ChannelOpen, ChannelOpenConfirmation, ChannelOpenFailure, ChannelOpenFailureReason,
            ChannelRequest, ChannelSuccess, ChannelWindowAdjust, GlobalRequest, RequestFailure,
            RequestSuccess,
        },
        DisconnectReason, Packet, Wire,
    },
    Pipe,
};

use crate::{
    channel::{Channel, ChannelType, Open, OpenRequest, Outgoing, Priority, Streams},
    Error, Result, INITIAL_WINDOW_SIZE, MAXIMUM_PACKET_SIZE,
};

/// How many slots the channel table grows by when exhausted.
const CHAN_EXTEND: usize = 3;

/// Hard cap on concurrently allocated channels; beyond it opens are
/// answered with `SSH_OPEN_RESOURCE_SHORTAGE`.
const MAX_CHANNELS: usize = 1000;

/// Unanswered keepalive probes tolerated before giving up on the peer.
const KEEPALIVE_LIMIT: u32 = 3;

const KEEPALIVE_REQUEST: &str = "keepalive@quoll";

/// The dense channel table; a `None` slot is free.
struct Channels {
    slots: Vec<Option<Channel>>,
}

impl Channels {
    fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Reserve a free index, growing the table by [`CHAN_EXTEND`] up to
    /// [`MAX_CHANNELS`].
    fn alloc(&mut self) -> Option<u32> {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            return Some(index as u32);
        }

        if self.slots.len() >= MAX_CHANNELS {
            return None;
        }

        let index = self.slots.len();
        let grown = (self.slots.len() + CHAN_EXTEND).min(MAX_CHANNELS);
        self.slots.resize_with(grown, || None);

        Some(index as u32)
    }

    fn insert(&mut self, index: u32, channel: Channel) {
        self.slots[index as usize] = Some(channel);
    }

    /// The slot for a peer-referenced local identifier; unknown ids are
    /// a protocol violation.
    fn get(&mut self, index: u32) -> Result<&mut Channel> {
        self.slots
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| Error::Protocol(format!("peer referenced the unknown channel {index}")))
    }

    fn remove(&mut self, index: u32) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            *slot = None;
        }
    }
}

/// Drive every channel's byte movement; resolves once anything moved,
/// pends while everything is blocked.
fn poll_channels<'a>(
    channels: &'a mut Channels,
    types: &'a mut [Box<dyn ChannelType>],
    outgoing: &'a mut Outgoing,
) -> impl futures::Future<Output = Result<()>> + 'a {
    futures::future::poll_fn(move |cx| {
        let mut progress = false;

        for slot in channels.slots.iter_mut() {
            let Some(channel) = slot else { continue };

            match channel.poll_progress(cx, types[channel.ty].as_mut(), outgoing) {
                Ok(moved) => progress |= moved,
                Err(err) => return Poll::Ready(Err(err)),
            }

            if channel.finished() {
                types[channel.ty].cleanup(channel);
                tracing::debug!("Channel {} fully closed, slot freed", channel.index());

                *slot = None;
                progress = true;
            }
        }

        if progress {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    })
}

/// A wrapper around an authenticated [`Session`] multiplexing channels,
/// global requests and the session timers.
pub struct Connect<I: Pipe, S: Side> {
    session: Session<I, S>,
    channels: Channels,
    types: Vec<Box<dyn ChannelType>>,
    outgoing: Outgoing,

    keepalive: Option<Duration>,
    idle: Option<Duration>,
    last_traffic: Instant,
    last_keepalive: Instant,
    unanswered_keepalives: u32,

    global_handler: Option<Box<dyn FnMut(&GlobalRequest) -> Option<Vec<u8>> + Send>>,
}

impl<I: Pipe, S: Side> Connect<I, S> {
    pub(crate) fn new(
        mut session: Session<I, S>,
        types: Vec<Box<dyn ChannelType>>,
        keepalive: Option<Duration>,
        idle: Option<Duration>,
    ) -> Self {
        // Reaching the connect layer means the auth boundary was passed,
        // which is what unlocks delayed compression.
        session.set_authenticated();

        Self {
            session,
            channels: Channels::new(),
            types,
            outgoing: Outgoing::default(),

            keepalive,
            idle,
            last_traffic: Instant::now(),
            last_keepalive: Instant::now(),
            unanswered_keepalives: 0,

            global_handler: None,
        }
    }

    /// Install a handler for peer global requests; returning `Some`
    /// produces `SSH_MSG_REQUEST_SUCCESS` with the payload, `None` a
    /// failure reply.
    pub fn on_global_request(
        mut self,
        handler: impl FnMut(&GlobalRequest) -> Option<Vec<u8>> + Send + 'static,
    ) -> Self {
        self.global_handler = Some(Box::new(handler));

        self
    }

    /// Access an open channel, e.g. to install its [`Streams`].
    pub fn channel(&mut self, index: u32) -> Result<&mut Channel> {
        self.channels
            .slots
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .ok_or(Error::ChannelClosed)
    }

    /// Open a channel towards the peer, bridged to `streams`.
    ///
    /// Pumps the connection until the peer confirms or refuses; other
    /// traffic keeps being dispatched meanwhile.
    pub async fn open(
        &mut self,
        channel_type: &str,
        data: Vec<u8>,
        streams: Streams,
    ) -> Result<u32> {
        let ty = self
            .types
            .iter()
            .position(|ty| ty.name() == channel_type)
            .ok_or_else(|| Error::UnknownChannelType(channel_type.into()))?;

        let index = self.channels.alloc().ok_or(Error::ChannelOpenFailure {
            reason: ChannelOpenFailureReason::ResourceShortage,
            message: "local channel table exhausted".into(),
        })?;

        let mut channel = Channel::new(index, ty, Priority::for_type(channel_type));
        channel.await_open = true;
        channel.set_streams(streams);
        self.channels.insert(index, channel);

        self.outgoing.push(&ChannelOpen {
            channel_type: channel_type.into(),
            sender_channel: index,
            initial_window_size: INITIAL_WINDOW_SIZE,
            maximum_packet_size: MAXIMUM_PACKET_SIZE,
            data,
        })?;
        self.flush().await?;

        loop {
            let packet = self.session.recv().await?;

            if packet.message_id() == ChannelOpenConfirmation::ID {
                let confirmation: ChannelOpenConfirmation = packet.to().map_err(Error::Transport)?;

                if confirmation.recipient_channel == index {
                    let channel = self.channels.get(index)?;
                    channel.remote_id = confirmation.sender_channel;
                    channel.remote_window.grant(confirmation.initial_window_size);
                    channel.trans_maxpacket =
                        confirmation.maximum_packet_size.min(MAXIMUM_PACKET_SIZE);
                    channel.await_open = false;

                    tracing::debug!(
                        "Channel {index}:{} opened as `{channel_type}`",
                        confirmation.sender_channel,
                    );

                    return Ok(index);
                }
            } else if packet.message_id() == ChannelOpenFailure::ID {
                let failure: ChannelOpenFailure = packet.to().map_err(Error::Transport)?;

                if failure.recipient_channel == index {
                    self.channels.remove(index);

                    return Err(Error::ChannelOpenFailure {
                        reason: failure.reason,
                        message: failure.description,
                    });
                }
            }

            self.dispatch(packet).await?;
            self.flush().await?;
        }
    }

    /// Send a channel request; replies are logged by the run loop.
    pub async fn request(
        &mut self,
        index: u32,
        request_type: &str,
        want_reply: bool,
        data: Vec<u8>,
    ) -> Result<()> {
        let channel = self.channel(index)?;
        if !channel.is_open() {
            return Err(Error::ChannelClosed);
        }
        let recipient_channel = channel.remote_id();

        self.outgoing.push(&ChannelRequest {
            recipient_channel,
            request_type: request_type.into(),
            want_reply,
            data,
        })?;

        self.flush().await
    }

    /// Process incoming messages and pump channel I/O endlessly.
    pub async fn run(mut self) -> Result<std::convert::Infallible> {
        enum Turn {
            Inbound,
            Io,
            Tick,
        }

        loop {
            self.flush().await?;

            let deadline = self.next_deadline();
            let turn = {
                let readable = self.session.readable().fuse();
                let io =
                    poll_channels(&mut self.channels, &mut self.types, &mut self.outgoing).fuse();
                let tick = futures_time::task::sleep(deadline.into()).fuse();
                futures::pin_mut!(readable, io, tick);

                futures::select_biased! {
                    result = readable => {
                        result?;
                        Turn::Inbound
                    }
                    result = io => {
                        result?;
                        Turn::Io
                    }
                    _ = tick => Turn::Tick,
                }
            };

            match turn {
                Turn::Inbound => {
                    let packet = self.session.recv().await?;
                    self.last_traffic = Instant::now();
                    self.unanswered_keepalives = 0;

                    if let Err(err) = self.dispatch(packet).await {
                        return Err(self.fail(err).await);
                    }
                }
                Turn::Io => {}
                Turn::Tick => self.tick().await?,
            }
        }
    }

    /// Advertise a protocol violation before propagating it.
    async fn fail(&mut self, err: Error) -> Error {
        if let Error::Protocol(ref description) = err {
            let _ = self
                .session
                .disconnect(DisconnectReason::ProtocolError, description.clone())
                .await;
        }

        err
    }

    /// Drain the outgoing queue onto the wire.
    async fn flush(&mut self) -> Result<()> {
        while let Some(packet) = self.outgoing.0.pop_front() {
            self.session.send_packet(packet).await?;
        }

        Ok(())
    }

    fn next_deadline(&self) -> Duration {
        let mut deadline = Duration::from_secs(3600);

        if let Some(idle) = self.idle {
            deadline = deadline.min(idle.saturating_sub(self.last_traffic.elapsed()));
        }
        if let Some(interval) = self.keepalive {
            deadline = deadline.min(interval.saturating_sub(self.last_keepalive.elapsed()));
        }

        deadline.max(Duration::from_millis(50))
    }

    async fn tick(&mut self) -> Result<()> {
        if let Some(idle) = self.idle {
            if self.last_traffic.elapsed() >= idle {
                return Err(self
                    .session
                    .disconnect(DisconnectReason::ByApplication, "Idle timeout reached")
                    .await
                    .into());
            }
        }

        if let Some(interval) = self.keepalive {
            if self.last_keepalive.elapsed() >= interval {
                if self.unanswered_keepalives >= KEEPALIVE_LIMIT {
                    return Err(self
                        .session
                        .disconnect(DisconnectReason::ConnectionLost, "Keepalive timeout")
                        .await
                        .into());
                }

                self.outgoing.push(&GlobalRequest {
                    name: KEEPALIVE_REQUEST.into(),
                    want_reply: true,
                    data: Vec::new(),
                })?;
                self.unanswered_keepalives += 1;
                self.last_keepalive = Instant::now();
            }
        }

        Ok(())
    }

    /// Route one inbound message to its handler.
    async fn dispatch(&mut self, packet: Packet) -> Result<()> {
        match packet.message_id() {
            id if id == ChannelOpen::ID => self.on_channel_open(packet.to().map_err(Error::Transport)?),

            id if id == ChannelOpenConfirmation::ID || id == ChannelOpenFailure::ID => {
                // Replies to our opens are consumed by `open`; one landing
                // here references a channel we never opened.
                Err(Error::Protocol(
                    "unsolicited channel open reply".into(),
                ))
            }

            id if id == ChannelData::ID => {
                let message: ChannelData = packet.to().map_err(Error::Transport)?;

                self.channels
                    .get(message.recipient_channel)?
                    .accept_data(&message.data, None)
            }

            id if id == ChannelExtendedData::ID => {
                let message: ChannelExtendedData = packet.to().map_err(Error::Transport)?;

                self.channels
                    .get(message.recipient_channel)?
                    .accept_data(&message.data, Some(message.data_type))
            }

            id if id == ChannelWindowAdjust::ID => {
                let message: ChannelWindowAdjust = packet.to().map_err(Error::Transport)?;

                self.channels
                    .get(message.recipient_channel)?
                    .remote_window
                    .replenish(message.bytes_to_add)
            }

            id if id == ChannelEof::ID => {
                let message: ChannelEof = packet.to().map_err(Error::Transport)?;

                self.channels.get(message.recipient_channel)?.recv_eof = true;

                Ok(())
            }

            id if id == ChannelClose::ID => {
                let message: ChannelClose = packet.to().map_err(Error::Transport)?;
                let Self {
                    channels,
                    types,
                    outgoing,
                    ..
                } = self;

                let channel = channels.get(message.recipient_channel)?;
                channel.recv_close = true;
                channel.recv_eof = true;

                if !channel.sent_close {
                    types[channel.ty].on_close(channel, outgoing);
                    outgoing.push(&ChannelClose {
                        recipient_channel: channel.remote_id,
                    })?;
                    channel.sent_close = true;
                }

                if channel.finished() {
                    types[channel.ty].cleanup(channel);
                    tracing::debug!(
                        "Channel {} fully closed, slot freed",
                        message.recipient_channel,
                    );
                    channels.remove(message.recipient_channel);
                }

                Ok(())
            }

            id if id == ChannelRequest::ID => {
                let message: ChannelRequest = packet.to().map_err(Error::Transport)?;
                let Self {
                    channels,
                    types,
                    outgoing,
                    ..
                } = self;

                let channel = channels.get(message.recipient_channel)?;
                let recipient_channel = channel.remote_id;

                tracing::debug!(
                    "Channel request `{}` on channel {} (want_reply: {})",
                    message.request_type,
                    message.recipient_channel,
                    message.want_reply,
                );

                let accepted = types[channel.ty].request(channel, &message, outgoing);

                if message.want_reply {
                    if accepted {
                        outgoing.push(&ChannelSuccess { recipient_channel })?;
                    } else {
                        outgoing.push(&ChannelFailure { recipient_channel })?;
                    }
                }

                Ok(())
            }

            id if id == ChannelSuccess::ID => {
                let message: ChannelSuccess = packet.to().map_err(Error::Transport)?;
                tracing::debug!(
                    "Peer accepted our request on channel {}",
                    message.recipient_channel,
                );

                Ok(())
            }

            id if id == ChannelFailure::ID => {
                let message: ChannelFailure = packet.to().map_err(Error::Transport)?;
                tracing::debug!(
                    "Peer refused our request on channel {}",
                    message.recipient_channel,
                );

                Ok(())
            }

            id if id == GlobalRequest::ID => {
                let message: GlobalRequest = packet.to().map_err(Error::Transport)?;

                tracing::debug!(
                    "Global request `{}` (want_reply: {})",
                    message.name,
                    message.want_reply,
                );

                let reply = self
                    .global_handler
                    .as_mut()
                    .and_then(|handler| handler(&message));

                if message.want_reply {
                    match reply {
                        Some(data) => self.outgoing.push(&RequestSuccess { data })?,
                        None => self.outgoing.push(&RequestFailure)?,
                    }
                }

                Ok(())
            }

            id if id == RequestSuccess::ID || id == RequestFailure::ID => {
                // Keepalive replies; liveness was already accounted.
                Ok(())
            }

            other => {
                tracing::debug!("Unhandled message ^{other:#x}, answering 'unimplemented'");
                self.session.send_unimplemented().await?;

                Ok(())
            }
        }
    }

    fn on_channel_open(&mut self, open: ChannelOpen) -> Result<()> {
        let Some(ty) = self
            .types
            .iter()
            .position(|ty| ty.name() == open.channel_type)
        else {
            tracing::debug!("Refused open of unknown channel type `{}`", open.channel_type);

            return self.outgoing.push(&ChannelOpenFailure {
                recipient_channel: open.sender_channel,
                reason: ChannelOpenFailureReason::UnknownChannelType,
                description: "unknown channel type".into(),
                language: Default::default(),
            });
        };

        let Some(index) = self.channels.alloc() else {
            return self.outgoing.push(&ChannelOpenFailure {
                recipient_channel: open.sender_channel,
                reason: ChannelOpenFailureReason::ResourceShortage,
                description: "channel table exhausted".into(),
                language: Default::default(),
            });
        };

        let mut channel = Channel::new(index, ty, Priority::for_type(&open.channel_type));
        channel.remote_id = open.sender_channel;
        channel.remote_window.grant(open.initial_window_size);
        channel.trans_maxpacket = open.maximum_packet_size.min(MAXIMUM_PACKET_SIZE);

        match self.types[ty].open(OpenRequest {
            index,
            channel_type: &open.channel_type,
            data: &open.data,
        }) {
            Open::Ready(streams) => {
                channel.set_streams(streams);
                self.channels.insert(index, channel);

                tracing::debug!(
                    "Channel {index}:{} opened as `{}`",
                    open.sender_channel,
                    open.channel_type,
                );

                self.outgoing.push(&ChannelOpenConfirmation {
                    recipient_channel: open.sender_channel,
                    sender_channel: index,
                    initial_window_size: INITIAL_WINDOW_SIZE,
                    maximum_packet_size: MAXIMUM_PACKET_SIZE,
                    data: Vec::new(),
                })
            }
            Open::Pending(pending) => {
                channel.pending_open = Some(pending);
                self.channels.insert(index, channel);

                tracing::debug!(
                    "Open of channel {index} as `{}` deferred",
                    open.channel_type,
                );

                Ok(())
            }
            Open::Failure(reason, description) => self.outgoing.push(&ChannelOpenFailure {
                recipient_channel: open.sender_channel,
                reason,
                description,
                language: Default::default(),
            }),
        }
    }
}

impl Priority {
    fn for_type(channel_type: &str) -> Self {
        match channel_type {
            "session" => Self::Interactive,
            _ => Self::Bulk,
        }
    }
}
