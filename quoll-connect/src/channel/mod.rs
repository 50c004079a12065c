//! Definition of the [`Channel`] slot, its flow-control state machine and
//! the bridges to local byte streams.

use std::{
    collections::VecDeque,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{AsyncRead, AsyncWrite, Future};

use quoll::wire::{
    msg::{
        ChannelClose, ChannelData, ChannelEof, ChannelExtendedData, ChannelOpenConfirmation,
        ChannelOpenFailure, ChannelWindowAdjust, SSH_EXTENDED_DATA_STDERR,
    },
    IntoPacket, Packet, Wire,
};

use crate::{Error, Result, INITIAL_WINDOW_SIZE, MAXIMUM_PACKET_SIZE};

mod ring;
use ring::Ring;

mod window;
use window::{LocalWindow, RemoteWindow};

mod types;
pub use types::{ChannelType, Open, OpenRequest, PendingOpen};

/// The queue of packets produced by the channel layer, drained to the
/// session by the run loop between dispatched messages.
#[derive(Default)]
pub struct Outgoing(pub(crate) VecDeque<Packet>);

impl Outgoing {
    /// Enqueue a message for transmission.
    pub fn push<T: Wire>(&mut self, message: &T) -> Result<()> {
        self.0.push_back((message).into_packet().map_err(Error::Transport)?);

        Ok(())
    }
}

/// The local endpoints a channel bridges to.
///
/// `source` bytes flow to the peer as channel data, inbound channel data
/// drains into `sink`; the `ext_*` pair does the same for the stderr
/// extended-data stream.
#[derive(Default)]
pub struct Streams {
    pub(crate) source: Option<Pin<Box<dyn AsyncRead + Send>>>,
    pub(crate) sink: Option<Pin<Box<dyn AsyncWrite + Send>>>,
    pub(crate) ext_source: Option<Pin<Box<dyn AsyncRead + Send>>>,
    pub(crate) ext_sink: Option<Pin<Box<dyn AsyncWrite + Send>>>,
    pub(crate) read_hook: Option<Box<dyn FnMut(&mut Vec<u8>) + Send>>,
}

impl Streams {
    /// No endpoints at all; data received is discarded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes read from `source` are sent to the peer as channel data.
    pub fn source(mut self, source: impl AsyncRead + Send + 'static) -> Self {
        self.source = Some(Box::pin(source));

        self
    }

    /// Channel data received from the peer drains into `sink`.
    pub fn sink(mut self, sink: impl AsyncWrite + Send + 'static) -> Self {
        self.sink = Some(Box::pin(sink));

        self
    }

    /// Bytes read from `source` are sent as stderr extended data.
    pub fn ext_source(mut self, source: impl AsyncRead + Send + 'static) -> Self {
        self.ext_source = Some(Box::pin(source));

        self
    }

    /// Stderr extended data received from the peer drains into `sink`.
    pub fn ext_sink(mut self, sink: impl AsyncWrite + Send + 'static) -> Self {
        self.ext_sink = Some(Box::pin(sink));

        self
    }

    /// Transform outbound data bytes before transmission, such as the
    /// client-side `~` escape; the hook must never grow its input.
    pub fn read_hook(mut self, hook: impl FnMut(&mut Vec<u8>) + Send + 'static) -> Self {
        self.read_hook = Some(Box::new(hook));

        self
    }
}

impl std::fmt::Debug for Streams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streams")
            .field("source", &self.source.is_some())
            .field("sink", &self.sink.is_some())
            .field("ext_source", &self.ext_source.is_some())
            .field("ext_sink", &self.ext_sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Scheduling hint of a channel, from its type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Latency-sensitive traffic, such as an interactive session.
    Interactive,

    /// Throughput traffic, such as forwarded connections.
    Bulk,
}

/// One slot of the channel table.
pub struct Channel {
    index: u32,
    pub(crate) remote_id: u32,
    pub(crate) ty: usize,
    priority: Priority,

    pub(crate) local_window: LocalWindow,
    pub(crate) remote_window: RemoteWindow,
    pub(crate) recv_maxpacket: u32,
    pub(crate) trans_maxpacket: u32,

    write_buf: Ring,
    extra_buf: Ring,
    streams: Streams,

    pub(crate) await_open: bool,
    pub(crate) pending_open: Option<PendingOpen>,
    dead: bool,

    source_eof: bool,
    ext_source_eof: bool,
    pub(crate) sent_eof: bool,
    pub(crate) recv_eof: bool,
    pub(crate) sent_close: bool,
    pub(crate) recv_close: bool,
    flushing: bool,
    sink_closed: bool,
}

impl Channel {
    pub(crate) fn new(index: u32, ty: usize, priority: Priority) -> Self {
        Self {
            index,
            remote_id: 0,
            ty,
            priority,

            local_window: LocalWindow::new(INITIAL_WINDOW_SIZE),
            remote_window: RemoteWindow::default(),
            recv_maxpacket: MAXIMUM_PACKET_SIZE,
            trans_maxpacket: MAXIMUM_PACKET_SIZE,

            write_buf: Ring::new(INITIAL_WINDOW_SIZE as usize),
            extra_buf: Ring::new(INITIAL_WINDOW_SIZE as usize),
            streams: Streams::default(),

            await_open: false,
            pending_open: None,
            dead: false,

            source_eof: false,
            ext_source_eof: false,
            sent_eof: false,
            recv_eof: false,
            sent_close: false,
            recv_close: false,
            flushing: false,
            sink_closed: false,
        }
    }

    /// The local channel identifier.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The peer's identifier for this channel.
    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }

    /// The scheduling hint derived from the channel type.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Whether the open exchange completed and no close was emitted.
    pub fn is_open(&self) -> bool {
        !self.await_open && self.pending_open.is_none() && !self.dead && !self.sent_close
    }

    /// Replace or install the local endpoints, e.g. once a `shell`
    /// request spawned something to bridge to.
    pub fn streams_mut(&mut self) -> &mut Streams {
        &mut self.streams
    }

    pub(crate) fn finished(&self) -> bool {
        self.dead || (self.sent_close && self.recv_close)
    }

    pub(crate) fn set_streams(&mut self, streams: Streams) {
        self.streams = streams;
    }

    /// Account and buffer (or discard) a block of inbound channel data.
    pub(crate) fn accept_data(&mut self, data: &[u8], ext: Option<u32>) -> Result<()> {
        if self.await_open || self.pending_open.is_some() {
            return Err(Error::Protocol("data on a channel still opening".into()));
        }
        if self.recv_close {
            return Err(Error::Protocol("data on a closed channel".into()));
        }
        if data.len() > self.recv_maxpacket as usize {
            return Err(Error::Protocol(
                "data exceeds the negotiated maximum packet size".into(),
            ));
        }

        self.local_window.consume(data.len() as u32)?;

        let ring = match ext {
            None => &mut self.write_buf,
            Some(SSH_EXTENDED_DATA_STDERR) => &mut self.extra_buf,
            Some(code) => {
                tracing::debug!("Discarded extended data with unknown type code {code}");
                self.local_window.drained(data.len() as u32);

                return Ok(());
            }
        };

        if self.recv_eof {
            tracing::debug!("Discarded data received after EOF");
            self.local_window.drained(data.len() as u32);

            return Ok(());
        }

        if !ring.push_all(data) {
            return Err(Error::Protocol("data overran the granted window".into()));
        }

        Ok(())
    }

    /// Drive every pending byte movement of the slot; returns whether
    /// anything moved.
    pub(crate) fn poll_progress(
        &mut self,
        cx: &mut Context<'_>,
        ty: &mut dyn ChannelType,
        out: &mut Outgoing,
    ) -> Result<bool> {
        let mut progress = false;

        if let Some(pending) = &mut self.pending_open {
            if let Poll::Ready(result) = pending.as_mut().poll(cx) {
                self.pending_open = None;
                progress = true;

                match result {
                    Ok(streams) => {
                        self.streams = streams;
                        out.push(&ChannelOpenConfirmation {
                            recipient_channel: self.remote_id,
                            sender_channel: self.index,
                            initial_window_size: INITIAL_WINDOW_SIZE,
                            maximum_packet_size: MAXIMUM_PACKET_SIZE,
                            data: Vec::new(),
                        })?;

                        tracing::debug!(
                            "Deferred open of channel {}:{} completed",
                            self.index,
                            self.remote_id,
                        );
                    }
                    Err((reason, description)) => {
                        out.push(&ChannelOpenFailure {
                            recipient_channel: self.remote_id,
                            reason,
                            description,
                            language: Default::default(),
                        })?;
                        self.dead = true;
                    }
                }
            }
        }

        if self.await_open || self.pending_open.is_some() || self.dead || self.sent_close {
            return Ok(progress);
        }

        progress |= self.poll_source(cx, false, out)?;
        progress |= self.poll_source(cx, true, out)?;

        // EOF once some source ran dry, all of them are exhausted and
        // everything read made it onto the queue.
        let sources_dry = (self.streams.source.is_none() || self.source_eof)
            && (self.streams.ext_source.is_none() || self.ext_source_eof);
        let any_eof = self.source_eof || self.ext_source_eof || self.flushing;
        if !self.sent_eof && any_eof && sources_dry {
            out.push(&ChannelEof {
                recipient_channel: self.remote_id,
            })?;
            self.sent_eof = true;
            progress = true;
        }

        progress |= self.poll_sink(cx, false);
        progress |= self.poll_sink(cx, true);
        progress |= self.poll_shutdown(cx);

        if let Some(bytes_to_add) = self.local_window.adjustable() {
            out.push(&ChannelWindowAdjust {
                recipient_channel: self.remote_id,
                bytes_to_add,
            })?;
            progress = true;

            tracing::trace!(
                "Replenished window of channel {}:{} by {bytes_to_add}",
                self.index,
                self.remote_id,
            );
        }

        if !self.flushing && ty.check_close(self) {
            self.flushing = true;
            progress = true;
        }

        let drained = self.write_buf.is_empty() && self.extra_buf.is_empty();
        let close_due = drained && ((self.sent_eof && self.recv_eof) || self.flushing);
        if close_due {
            ty.on_close(self, out);
            out.push(&ChannelClose {
                recipient_channel: self.remote_id,
            })?;
            self.sent_close = true;
            progress = true;
        }

        Ok(progress)
    }

    /// Pump one source into the outgoing queue, within window credit.
    fn poll_source(&mut self, cx: &mut Context<'_>, ext: bool, out: &mut Outgoing) -> Result<bool> {
        let already_eof = if ext {
            self.ext_source_eof
        } else {
            self.source_eof
        };
        if self.sent_eof || already_eof {
            return Ok(false);
        }

        let mut progress = false;

        loop {
            let want = self
                .remote_window
                .reserve(self.trans_maxpacket.min(MAXIMUM_PACKET_SIZE));
            if want == 0 {
                break;
            }

            let source = if ext {
                self.streams.ext_source.as_mut()
            } else {
                self.streams.source.as_mut()
            };
            let Some(source) = source else { break };

            let mut buf = vec![0u8; want as usize];
            match source.as_mut().poll_read(cx, &mut buf) {
                Poll::Pending => break,
                Poll::Ready(Ok(0)) | Poll::Ready(Err(_)) => {
                    if ext {
                        self.ext_source_eof = true;
                    } else {
                        self.source_eof = true;
                    }
                    progress = true;

                    break;
                }
                Poll::Ready(Ok(read)) => {
                    buf.truncate(read);

                    if !ext {
                        if let Some(hook) = &mut self.streams.read_hook {
                            hook(&mut buf);
                        }
                    }

                    self.remote_window.consume(buf.len() as u32);
                    if buf.is_empty() {
                        continue;
                    }

                    if ext {
                        out.push(&ChannelExtendedData {
                            recipient_channel: self.remote_id,
                            data_type: SSH_EXTENDED_DATA_STDERR,
                            data: buf,
                        })?;
                    } else {
                        out.push(&ChannelData {
                            recipient_channel: self.remote_id,
                            data: buf,
                        })?;
                    }
                    progress = true;
                }
            }
        }

        Ok(progress)
    }

    /// Drain one ring buffer into its sink; without a sink the data is
    /// discarded so the window keeps replenishing.
    fn poll_sink(&mut self, cx: &mut Context<'_>, ext: bool) -> bool {
        let (ring, sink_slot) = if ext {
            (&mut self.extra_buf, &mut self.streams.ext_sink)
        } else {
            (&mut self.write_buf, &mut self.streams.sink)
        };

        let mut progress = false;

        match sink_slot {
            None => {
                if !ring.is_empty() {
                    self.local_window.drained(ring.len() as u32);
                    ring.clear();
                    progress = true;
                }
            }
            Some(sink) => {
                let mut broken = false;

                while !ring.is_empty() {
                    match sink.as_mut().poll_write(cx, ring.peek()) {
                        Poll::Pending => break,
                        Poll::Ready(Err(err)) => {
                            tracing::debug!("Channel sink failed, discarding: {err}");
                            self.local_window.drained(ring.len() as u32);
                            ring.clear();
                            broken = true;
                            progress = true;
                        }
                        Poll::Ready(Ok(written)) => {
                            ring.consume(written);
                            self.local_window.drained(written as u32);
                            progress = true;
                        }
                    }
                }

                if broken {
                    *sink_slot = None;
                }
            }
        }

        progress
    }

    /// Close the local write side once the peer sent EOF and both rings
    /// fully drained.
    fn poll_shutdown(&mut self, cx: &mut Context<'_>) -> bool {
        if !self.recv_eof
            || self.sink_closed
            || !self.write_buf.is_empty()
            || !self.extra_buf.is_empty()
        {
            return false;
        }

        let mut done = true;
        for sink_slot in [&mut self.streams.sink, &mut self.streams.ext_sink] {
            if let Some(sink) = sink_slot {
                match sink.as_mut().poll_close(cx) {
                    Poll::Ready(_) => *sink_slot = None,
                    Poll::Pending => done = false,
                }
            }
        }

        if done {
            self.sink_closed = true;
        }

        done
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("index", &self.index)
            .field("remote_id", &self.remote_id)
            .field("priority", &self.priority)
            .field("sent_eof", &self.sent_eof)
            .field("recv_eof", &self.recv_eof)
            .field("sent_close", &self.sent_close)
            .field("recv_close", &self.recv_close)
            .finish_non_exhaustive()
    }
}
