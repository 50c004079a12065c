//! Session's [`Side`]s, either [`client::Client`] or [`server::Server`].

use futures::{AsyncBufRead, AsyncWrite, Future};
use futures_time::time::Duration;

use crate::{
    kex,
    stream::{Stream, TransportPair},
    wire::{
        msg::{self, ExtInfo, KexInit, NewKeys},
        Id, IntoPacket, Packet,
    },
    DisconnectedBy, DisconnectedError, Error, Result,
};

pub mod client;
pub mod server;

/// Packets of in-flight application traffic a re-key will buffer while
/// waiting for the peer's `SSH_MSG_KEXINIT`.
const KEX_STASH_MAX: usize = 64;

/// A received `SSH_MSG_KEXINIT` along with its byte-exact payload, which
/// feeds the exchange hash.
#[derive(Debug, Clone)]
pub struct KexInitRecord {
    /// The decoded message.
    pub msg: KexInit,

    /// The payload as transmitted, including the message identifier.
    pub payload: Vec<u8>,
}

/// Both sides' `SSH_MSG_KEXINIT`s handed to the method exchange.
pub struct Negotiation<'n> {
    /// Our kex-init message.
    pub ours: &'n KexInit,

    /// The peer kex-init message.
    pub theirs: &'n KexInit,

    /// Our kex-init payload, byte-exact.
    pub i_ours: &'n [u8],

    /// The peer kex-init payload, byte-exact.
    pub i_theirs: &'n [u8],
}

mod private {
    pub trait Sealed {}

    impl Sealed for super::client::Client {}
    impl Sealed for super::server::Server {}
}

/// A side of the SSH protocol, either [`client::Client`] or
/// [`server::Server`].
pub trait Side: private::Sealed + Send + Sync + 'static {
    /// Get the [`Id`] for this session.
    fn id(&self) -> &Id;

    /// Get the _timeout_ for this session.
    fn timeout(&self) -> Duration;

    /// Generate a [`KexInit`] message from the config; marker entries are
    /// only carried on the first exchange.
    fn kexinit(&self, first_kex: bool) -> KexInit;

    /// Exchange the keys from the config.
    fn exchange(
        &self,
        stream: &mut Stream<impl AsyncBufRead + AsyncWrite + Unpin + Send>,
        negotiation: Negotiation<'_>,
        peer_id: &Id,
    ) -> impl Future<Output = Result<TransportPair>> + Send;

    /// Whether this side is the one receiving the method's first packet,
    /// and therefore the one discarding a wrong guess.
    fn discards_guess(&self) -> bool;

    /// The strict-kex marker the peer would advertise.
    fn peer_strict_marker(&self) -> &'static str;

    /// The `SSH_MSG_EXT_INFO` to send after the first exchange, if any.
    fn ext_info(&self, _peerkexinit: &KexInit) -> Option<ExtInfo> {
        None
    }

    /// Perform the key-exchange from this side.
    ///
    /// Returns the application packets that raced the exchange, for the
    /// session to replay in order.
    fn kex(
        &self,
        stream: &mut Stream<impl AsyncBufRead + AsyncWrite + Unpin + Send>,
        peerkexinit: Option<KexInitRecord>,
        peer_id: &Id,
    ) -> impl Future<Output = Result<Vec<Packet>>> + Send {
        async move {
            tracing::debug!("Starting key-exchange procedure");

            let first = stream.session_id().is_none();

            let ourkexinit = self.kexinit(first);
            let our_packet = (&ourkexinit).into_packet()?;
            let i_ours = our_packet.payload.clone();
            stream.send(our_packet).await?;

            let mut stash = Vec::new();
            let (peerkexinit, i_theirs) = match peerkexinit {
                Some(record) => (record.msg, record.payload),
                None => loop {
                    let packet = stream.recv().await?;

                    match packet.message_id() {
                        msg::SSH_MSG_KEXINIT => break (packet.to()?, packet.payload),
                        msg::SSH_MSG_IGNORE | msg::SSH_MSG_DEBUG => continue,
                        msg::SSH_MSG_DISCONNECT => {
                            let message: msg::Disconnect = packet.to()?;

                            return Err(DisconnectedError {
                                by: DisconnectedBy::Them,
                                reason: message.reason,
                                description: message.description,
                            }
                            .into());
                        }
                        // Application traffic racing our re-key request
                        // is legitimate until the peer sees our KEXINIT.
                        _ if !first && stash.len() < KEX_STASH_MAX => stash.push(packet),
                        _ => return Err(Error::UnexpectedMessage),
                    }
                },
            };

            if first
                && peerkexinit
                    .kex_algorithms
                    .contains(self.peer_strict_marker())
            {
                stream.set_strict();
                tracing::debug!("Peer supports strict key-exchange, enabling");

                // In strict mode the first packet on the wire must have
                // been the KEXINIT itself.
                if stream.rxseq() != 1 {
                    return Err(Error::KexError);
                }
            }

            if peerkexinit.first_kex_packet_follows && self.discards_guess() {
                let kexguess2 = ourkexinit.kex_algorithms.contains(kex::KEXGUESS2)
                    && peerkexinit.kex_algorithms.contains(kex::KEXGUESS2);

                let ours_first = kex::first_method(&ourkexinit.kex_algorithms);
                let theirs_first = kex::first_method(&peerkexinit.kex_algorithms);

                let good_guess = if kexguess2 {
                    ours_first == theirs_first
                } else {
                    ours_first == theirs_first
                        && ourkexinit.server_host_key_algorithms.first()
                            == peerkexinit.server_host_key_algorithms.first()
                };

                if !good_guess {
                    let discarded = stream.recv().await?;
                    tracing::debug!(
                        "Discarded a wrongly guessed kex packet ^{:#x}",
                        discarded.message_id(),
                    );
                }
            }

            let transport = self
                .exchange(
                    stream,
                    Negotiation {
                        ours: &ourkexinit,
                        theirs: &peerkexinit,
                        i_ours: &i_ours,
                        i_theirs: &i_theirs,
                    },
                    peer_id,
                )
                .await?;

            // Each direction flips on its own NEWKEYS; ours is sent under
            // the old keys, everything after goes out under the new ones.
            stream.send(&NewKeys).await?;
            stream.with_tx(transport.tx);

            kex::recv::<NewKeys, _>(stream).await?;
            stream.with_rx(transport.rx);

            stream.kex_finished();

            tracing::debug!("Key exchange success");

            if first {
                if let Some(ext_info) = self.ext_info(&peerkexinit) {
                    stream.send(&ext_info).await?;
                }
            }

            Ok(stash)
        }
    }
}
