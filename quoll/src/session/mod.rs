//! Session and transport handling mechanics.

use std::collections::VecDeque;

use futures::{io::BufReader, AsyncWriteExt};
use futures_time::future::FutureExt;

use crate::{
    side::{KexInitRecord, Side},
    stream::Stream,
    wire::{
        msg::{self, Disconnect, ExtInfo, Unimplemented},
        DisconnectReason, Id, IntoPacket, Packet, Wire,
    },
    DisconnectedBy, DisconnectedError, Error, Pipe, Result,
};

/// Extensions advertised by the peer through `SSH_MSG_EXT_INFO`.
#[derive(Debug, Default, Clone)]
pub struct Extensions {
    /// The signature algorithms the server accepts for public-key
    /// authentication, RFC 8308 §3.1.
    pub server_sig_algs: Option<Vec<String>>,
}

impl Extensions {
    fn update(&mut self, ext_info: ExtInfo) {
        for (name, value) in ext_info.extensions {
            match name.as_str() {
                "server-sig-algs" => {
                    let algorithms = String::from_utf8_lossy(&value)
                        .split(',')
                        .filter(|name| !name.is_empty())
                        .map(str::to_owned)
                        .collect();

                    self.server_sig_algs = Some(algorithms);
                }
                other => tracing::debug!("Ignored an unknown extension `{other}`"),
            }
        }
    }
}

/// A session wrapping a [`Pipe`] stream to handle **key exchange** and
/// **`SSH-TRANS`** messages.
pub struct Session<I, S> {
    stream: Option<Stream<BufReader<I>>>,
    config: S,
    peer_id: Id,

    /// Application packets that raced a re-key, replayed in order.
    pending: VecDeque<Packet>,

    extensions: Extensions,
}

impl<I, S> Session<I, S>
where
    I: Pipe,
    S: Side,
{
    /// Create a new [`Session`] from a [`Pipe`] stream and some
    /// configuration, performing the identification exchange.
    pub async fn new(stream: I, config: S) -> Result<Self> {
        let mut stream = BufReader::new(stream);

        config.id().to_writer(&mut stream).await?;
        stream.flush().await?;

        let peer_id = Id::from_reader(&mut stream)
            .timeout(config.timeout())
            .await??;

        let stream = Stream::new(stream, config.timeout());

        tracing::debug!("Session started with peer `{peer_id}`");

        Ok(Self {
            stream: Some(stream),
            config,
            peer_id,
            pending: VecDeque::new(),
            extensions: Extensions::default(),
        })
    }

    /// Get the [`Id`] of the connected peer.
    pub fn peer_id(&self) -> &Id {
        &self.peer_id
    }

    /// The session identifier, once the first key exchange completed.
    pub fn session_id(&self) -> Option<&[u8]> {
        self.stream.as_ref().and_then(Stream::session_id)
    }

    /// The extensions advertised by the peer so far.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mark the session as authenticated, unlocking delayed compression.
    pub fn set_authenticated(&mut self) {
        if let Some(stream) = &mut self.stream {
            stream.set_authenticated();
        }
    }

    /// Request a key exchange before the next message in either
    /// direction; idempotent while one is already due.
    pub fn force_rekey(&mut self) {
        if let Some(stream) = &mut self.stream {
            stream.force_rekey();
        }
    }

    fn stream(&mut self) -> Result<&mut Stream<BufReader<I>>> {
        self.stream.as_mut().ok_or_else(|| {
            DisconnectedError {
                by: DisconnectedBy::Us,
                reason: DisconnectReason::ByApplication,
                description: "The session is already disconnected".into(),
            }
            .into()
        })
    }

    /// Run a key exchange, stashing any racing application packets.
    async fn kex(&mut self, peerkexinit: Option<KexInitRecord>) -> Result<()> {
        let Self {
            stream: Some(stream),
            config,
            peer_id,
            ..
        } = self
        else {
            return self.stream().map(|_| ());
        };

        match config.kex(stream, peerkexinit, peer_id).await {
            Ok(stash) => {
                self.pending.extend(stash);

                Ok(())
            }
            Err(err) => Err(self.fatal(err).await),
        }
    }

    /// Advertise a fatal error with a `SSH_MSG_DISCONNECT` when it maps
    /// to a reason code, then poison the session.
    async fn fatal(&mut self, err: Error) -> Error {
        if let Some(reason) = err.disconnect_reason() {
            if let Some(mut stream) = self.stream.take() {
                let _ = stream
                    .send(&Disconnect {
                        reason,
                        description: err.to_string(),
                        language: Default::default(),
                    })
                    .await;
            }

            tracing::error!("Session torn down ({reason:?}): {err}");
        }

        err
    }

    /// Wait until a message is available, without consuming anything;
    /// cancel-safe.
    pub async fn readable(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            return Ok(());
        }

        self.stream()?.readable().await
    }

    /// Receive a [`Packet`] from the `stream`.
    ///
    /// Transport-layer messages are handled transparently: disconnects,
    /// ignores, debugs, key exchanges and extension advertisement.
    pub async fn recv(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.pending.pop_front() {
                return Ok(packet);
            }

            if self.stream()?.rekeyable() {
                self.kex(None).await?;
            }

            let packet = match self.stream()?.recv().await {
                Ok(packet) => packet,
                Err(err) => return Err(self.fatal(err).await),
            };

            match packet.message_id() {
                msg::SSH_MSG_DISCONNECT => {
                    let message: Disconnect = packet.to()?;
                    drop(self.stream.take());

                    return Err(DisconnectedError {
                        by: DisconnectedBy::Them,
                        reason: message.reason,
                        description: message.description,
                    }
                    .into());
                }
                msg::SSH_MSG_IGNORE => {
                    tracing::debug!("Received an 'ignore' message");
                }
                msg::SSH_MSG_DEBUG => {
                    let message: msg::Debug = packet.to()?;
                    tracing::debug!("Received a 'debug' message: {}", message.message);
                }
                msg::SSH_MSG_UNIMPLEMENTED => {
                    let message: Unimplemented = packet.to()?;
                    tracing::debug!(
                        "Received a 'unimplemented' message about packet #{}",
                        message.seq,
                    );
                }
                msg::SSH_MSG_KEXINIT => {
                    let record = KexInitRecord {
                        msg: packet.to()?,
                        payload: packet.payload,
                    };

                    self.kex(Some(record)).await?;
                }
                msg::SSH_MSG_EXT_INFO => {
                    self.extensions.update(packet.to()?);
                }
                _ => return Ok(packet),
            }
        }
    }

    /// Send a message to the `stream`.
    ///
    /// A peer-initiated or due key exchange is serviced first, so no
    /// application packet interleaves an exchange.
    pub async fn send<T: Wire>(&mut self, message: &T) -> Result<()> {
        self.send_packet((message).into_packet()?).await
    }

    /// Send an already encoded [`Packet`] to the `stream`.
    pub async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        let stream = self.stream()?;

        if let Some((kexinit, raw)) = stream.try_recv::<msg::KexInit>().await? {
            self.kex(Some(KexInitRecord {
                msg: kexinit,
                payload: raw.payload,
            }))
            .await?;
        } else if stream.rekeyable() {
            self.kex(None).await?;
        }

        match self.stream()?.send(packet).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fatal(err).await),
        }
    }

    /// Answer a message nothing upstream understood.
    pub async fn send_unimplemented(&mut self) -> Result<()> {
        let seq = self.stream()?.last_rxseq();

        self.send(&Unimplemented { seq }).await
    }

    /// Send a `SSH_MSG_DISCONNECT` and poison the session, returning the
    /// matching [`DisconnectedError`].
    pub async fn disconnect(
        &mut self,
        reason: DisconnectReason,
        description: impl Into<String>,
    ) -> DisconnectedError {
        let description = description.into();

        if let Some(mut stream) = self.stream.take() {
            let _ = stream
                .send(&Disconnect {
                    reason,
                    description: description.clone(),
                    language: Default::default(),
                })
                .await;
        }

        DisconnectedError {
            by: DisconnectedBy::Us,
            reason,
            description,
        }
    }
}

impl<I, S> std::fmt::Debug for Session<I, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_std::net::TcpStream;

    use super::*;
    use crate::side::{client::Client, server::Server};

    #[test]
    fn assert_session_is_send() {
        fn is_send<T: Send>() {}

        is_send::<Session<TcpStream, Client>>();
        is_send::<Session<TcpStream, Server>>();
    }

    #[test]
    fn assert_session_is_sync() {
        fn is_sync<T: Sync>() {}

        is_sync::<Session<TcpStream, Client>>();
        is_sync::<Session<TcpStream, Server>>();
    }
}
