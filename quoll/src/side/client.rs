//! Client-[`Side`] implementation of the _session_.

use std::sync::Mutex;
use std::time::Duration;

use futures::{AsyncBufRead, AsyncWrite};
use futures_time::time::Duration as Timeout;
use rand::RngCore;
use ssh_key::{Algorithm, EcdsaCurve, HashAlg};

use super::{Negotiation, Side};
use crate::{
    kex::{self, Kex},
    random::HashChain,
    stream::{Stream, TransportPair},
    wire::{msg::KexInit, Id, NameList},
    Result,
};

/// A _client_-side session configuration.
#[derive(Debug)]
pub struct Client {
    /// [`Id`] for this _client_ session.
    pub id: Id,

    /// Timeout for sending and receiving packets.
    pub timeout: Duration,

    /// The algorithms enabled for this _client_ session.
    pub algorithms: Algorithms,

    /// The random source for cookies and ephemeral secrets.
    pub rng: Mutex<HashChain>,
}

impl Default for Client {
    fn default() -> Self {
        Self {
            id: Id::v2(
                concat!(
                    env!("CARGO_PKG_NAME"),
                    "_",
                    env!("CARGO_PKG_VERSION")
                ),
                None,
            ),
            timeout: Duration::from_secs(120),
            algorithms: Default::default(),
            rng: Default::default(),
        }
    }
}

/// Algorithms for a _client_-side session.
#[derive(Debug, Clone)]
pub struct Algorithms {
    /// Enabled algorithms for _key-exchange_.
    pub kexs: Vec<Kex>,

    /// Accepted algorithms for the _server host key signature_.
    pub keys: Vec<Algorithm>,

    /// Enabled algorithms for _encryption & decryption_.
    pub ciphers: Vec<crate::algorithm::Cipher>,

    /// Enabled algorithms for _hmac_.
    pub macs: Vec<crate::algorithm::Hmac>,

    /// Enabled algorithms for _compression_.
    pub compressions: Vec<crate::algorithm::Compress>,
}

impl Default for Algorithms {
    fn default() -> Self {
        let super::server::Algorithms {
            kexs,
            ciphers,
            macs,
            compressions,
        } = Default::default();

        Self {
            kexs,
            keys: vec![
                Algorithm::Ed25519,
                Algorithm::Ecdsa {
                    curve: EcdsaCurve::NistP256,
                },
                Algorithm::Ecdsa {
                    curve: EcdsaCurve::NistP384,
                },
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha512),
                },
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha256),
                },
                Algorithm::Dsa,
            ],
            ciphers,
            macs,
            compressions,
        }
    }
}

impl Side for Client {
    fn id(&self) -> &Id {
        &self.id
    }

    fn timeout(&self) -> Timeout {
        self.timeout.into()
    }

    fn kexinit(&self, first_kex: bool) -> KexInit {
        let mut cookie = [0u8; 16];
        self.rng
            .lock()
            .expect("random source lock poisoned")
            .fill_bytes(&mut cookie);

        let mut kexs: Vec<String> = self
            .algorithms
            .kexs
            .iter()
            .map(|kex| kex.as_ref().to_owned())
            .collect();
        kexs.push(kex::KEXGUESS2.to_owned());
        if first_kex {
            kexs.push(kex::STRICT_CLIENT.to_owned());
            kexs.push(kex::EXT_INFO_CLIENT.to_owned());
        }

        KexInit {
            cookie,
            kex_algorithms: kexs.into_iter().collect(),
            server_host_key_algorithms: self
                .algorithms
                .keys
                .iter()
                .map(|algorithm| algorithm.as_str().to_owned())
                .collect(),
            encryption_algorithms_client_to_server: self
                .algorithms
                .ciphers
                .iter()
                .map(|name| name.as_ref())
                .collect(),
            encryption_algorithms_server_to_client: self
                .algorithms
                .ciphers
                .iter()
                .map(|name| name.as_ref())
                .collect(),
            mac_algorithms_client_to_server: self
                .algorithms
                .macs
                .iter()
                .map(|name| name.as_ref())
                .collect(),
            mac_algorithms_server_to_client: self
                .algorithms
                .macs
                .iter()
                .map(|name| name.as_ref())
                .collect(),
            compression_algorithms_client_to_server: self
                .algorithms
                .compressions
                .iter()
                .map(|name| name.as_ref())
                .collect(),
            compression_algorithms_server_to_client: self
                .algorithms
                .compressions
                .iter()
                .map(|name| name.as_ref())
                .collect(),
            languages_client_to_server: NameList::default(),
            languages_server_to_client: NameList::default(),
            first_kex_packet_follows: false,
        }
    }

    async fn exchange(
        &self,
        stream: &mut Stream<impl AsyncBufRead + AsyncWrite + Unpin + Send>,
        negotiation: Negotiation<'_>,
        peer_id: &Id,
    ) -> Result<TransportPair> {
        kex::negotiate(negotiation.ours, negotiation.theirs)?
            .as_client(
                stream,
                &self.rng,
                self.id(),
                peer_id,
                negotiation.i_ours,
                negotiation.i_theirs,
                negotiation.ours,
                negotiation.theirs,
            )
            .await
    }

    fn discards_guess(&self) -> bool {
        false
    }

    fn peer_strict_marker(&self) -> &'static str {
        kex::STRICT_SERVER
    }
}
