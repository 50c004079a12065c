//! The packet engine: framing, sequence numbers, re-key accounting and
//! the strict key-exchange discipline over a [`Pipe`]-like stream.

use futures::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, FutureExt};
use futures_time::{future::FutureExt as _, time::Duration};

use crate::{
    wire::{IntoPacket, Packet, Wire},
    Result,
};

mod transport;
pub use transport::{Transport, TransportPair};

mod keys;
pub use keys::Keys;

/// Re-key after 1GiB of exchanged data as recommended per the RFC.
const REKEY_BYTES_THRESHOLD: usize = 0x40000000;

/// Re-key after one hour on a keyset, whatever the traffic.
const REKEY_TIME_THRESHOLD: std::time::Duration = std::time::Duration::from_secs(3600);

/// A wrapper around a buffered stream to interface with the SSH binary
/// protocol.
pub struct Stream<S> {
    inner: S,
    timeout: Duration,

    /// The pair of transport algorithms and keys computed from the key exchange.
    transport: TransportPair,

    /// The session identifier derived from the first key exchange.
    session: Option<Vec<u8>>,

    /// Sequence number for the `tx` side.
    txseq: u32,

    /// Sequence number for the `rx` side.
    rxseq: u32,

    /// Wire bytes moved in either direction since the last exchange,
    /// counted per packet as it is framed or parsed.
    traffic: usize,

    /// A buffer for the `peek` method.
    buffer: Option<Packet>,

    /// Whether `kex-strict` has been negotiated on the first exchange.
    strict: bool,

    /// Whether the session passed the authentication boundary, which is
    /// what unlocks delayed compression.
    authed: bool,

    /// Explicit re-key request, from us or the peer.
    forced_rekey: bool,

    /// Completion time of the last key exchange.
    last_kex: Option<std::time::Instant>,
}

impl<S> Stream<S>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            inner: stream,
            timeout,
            transport: Default::default(),
            session: None,
            txseq: 0,
            rxseq: 0,
            traffic: 0,
            buffer: None,
            strict: false,
            authed: false,
            forced_rekey: false,
            last_kex: None,
        }
    }

    /// Whether a key exchange is due: none happened yet, too many bytes
    /// moved, the keyset is too old, or one was requested explicitly.
    pub fn rekeyable(&self) -> bool {
        self.session.is_none()
            || self.forced_rekey
            || self.traffic > REKEY_BYTES_THRESHOLD
            || self
                .last_kex
                .is_some_and(|at| at.elapsed() >= REKEY_TIME_THRESHOLD)
    }

    /// Request a key exchange at the next send or receive.
    pub fn force_rekey(&mut self) {
        self.forced_rekey = true;
    }

    /// Account a finished key exchange.
    pub fn kex_finished(&mut self) {
        self.traffic = 0;
        self.forced_rekey = false;
        self.last_kex = Some(std::time::Instant::now());
    }

    /// Enable the strict key-exchange discipline for the session.
    pub fn set_strict(&mut self) {
        self.strict = true;
    }

    pub fn strict(&self) -> bool {
        self.strict
    }

    /// Mark the session authenticated, unlocking delayed compression.
    pub fn set_authenticated(&mut self) {
        self.authed = true;
    }

    /// Install the new outbound transport, at our `SSH_MSG_NEWKEYS`.
    pub fn with_tx(&mut self, tx: Transport) {
        self.transport.tx = tx;
        if self.strict {
            self.txseq = 0;
        }
    }

    /// Install the new inbound transport, at the peer `SSH_MSG_NEWKEYS`.
    pub fn with_rx(&mut self, rx: Transport) {
        self.transport.rx = rx;
        if self.strict {
            self.rxseq = 0;
        }
    }

    /// Freeze the session identifier on first use; later exchanges keep
    /// the existing one for the life of the connection.
    pub fn with_session(&mut self, session: &[u8]) -> &[u8] {
        self.session.get_or_insert_with(|| session.to_vec())
    }

    pub fn session_id(&self) -> Option<&[u8]> {
        self.session.as_deref()
    }

    pub fn rxseq(&self) -> u32 {
        self.rxseq
    }

    /// The sequence number of the most recently received packet.
    pub fn last_rxseq(&self) -> u32 {
        self.rxseq.wrapping_sub(1)
    }

    /// Wait until at least one inbound byte (or a whole buffered packet)
    /// is available; cancel-safe since bytes stay in the read buffer.
    pub async fn readable(&mut self) -> Result<()> {
        if self.buffer.is_some() {
            return Ok(());
        }

        let buf = self.inner.fill_buf().await?;
        if buf.is_empty() {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }

        Ok(())
    }

    /// Poll the stream to detect whether data is immediately readable.
    pub async fn is_readable(&mut self) -> Result<bool> {
        if self.buffer.is_some() {
            return Ok(true);
        }

        futures::select_biased! {
            buf = self.inner.fill_buf().fuse() => {
                Ok(!buf?.is_empty())
            }
            _ = futures::future::ready(()).fuse() => {
                Ok(false)
            }
        }
    }

    /// Receive and decrypt a _packet_ from the peer without removing it
    /// from the queue.
    pub async fn peek(&mut self) -> Result<&Packet> {
        if self.buffer.is_none() {
            let packet = self.recv().await?;
            self.buffer = Some(packet);
        }

        Ok(self.buffer.as_ref().expect("peek buffer was just filled"))
    }

    /// Receive a packet of type `T` if one is immediately pending, else
    /// leave the stream untouched.
    pub async fn try_recv<T: Wire>(&mut self) -> Result<Option<(T, Packet)>> {
        if !self.is_readable().await? {
            return Ok(None);
        }

        if self.peek().await?.message_id() == T::ID {
            let packet = self.buffer.take().expect("peek buffer was just filled");

            Ok(Some((packet.to()?, packet)))
        } else {
            Ok(None)
        }
    }

    /// Receive and decrypt a _packet_ from the peer.
    pub async fn recv(&mut self) -> Result<Packet> {
        match self.buffer.take() {
            Some(packet) => Ok(packet),
            None => {
                let authed = self.authed;
                let (packet, wire) = self
                    .transport
                    .rx
                    .read_packet(&mut self.inner, self.rxseq, authed)
                    .timeout(self.timeout)
                    .await??;

                tracing::trace!(
                    "<~- #{}: ^{:#x} ({} bytes)",
                    self.rxseq,
                    packet.message_id(),
                    packet.payload.len(),
                );

                self.traffic += wire;
                self.rxseq = self.rxseq.wrapping_add(1);

                Ok(packet)
            }
        }
    }

    /// Encrypt and send a _packet_ to the peer.
    pub async fn send(&mut self, packet: impl IntoPacket) -> Result<()> {
        let packet = packet.into_packet()?;
        let authed = self.authed;

        let wire = self
            .transport
            .tx
            .write_packet(&mut self.inner, &packet, self.txseq, authed)
            .timeout(self.timeout)
            .await??;
        self.inner.flush().await?;

        tracing::trace!(
            "-~> #{}: ^{:#x} ({} bytes)",
            self.txseq,
            packet.message_id(),
            packet.payload.len(),
        );

        self.traffic += wire;
        self.txseq = self.txseq.wrapping_add(1);

        Ok(())
    }
}
