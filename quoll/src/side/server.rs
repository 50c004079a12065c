//! Server-[`Side`] implementation of the _session_.

use std::sync::Mutex;
use std::time::Duration;

use futures::{AsyncBufRead, AsyncWrite};
use futures_time::time::Duration as Timeout;
use rand::RngCore;

use super::{Negotiation, Side};
use crate::{
    algorithm::{hostkey, Cipher, Compress, Hmac},
    kex::{self, Kex},
    random::HashChain,
    stream::{Stream, TransportPair},
    wire::{
        msg::{ExtInfo, KexInit},
        Id, NameList,
    },
    Result,
};

#[doc(no_inline)]
pub use ssh_key::PrivateKey;

/// The `server-sig-algs` we advertise through `SSH_MSG_EXT_INFO`.
const SERVER_SIG_ALGS: &str =
    "ssh-ed25519,ecdsa-sha2-nistp256,ecdsa-sha2-nistp384,rsa-sha2-512,rsa-sha2-256";

/// A _server_-side session configuration.
#[derive(Debug)]
pub struct Server {
    /// [`Id`] for this _server_ session.
    pub id: Id,

    /// Timeout for sending and receiving packets.
    pub timeout: Duration,

    /// Server keys for key-exchange signature.
    pub keys: Vec<PrivateKey>,

    /// The algorithms enabled for this _server_ session.
    pub algorithms: Algorithms,

    /// The random source for cookies and ephemeral secrets.
    pub rng: Mutex<HashChain>,
}

impl Default for Server {
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
            keys: Default::default(),
            algorithms: Default::default(),
            rng: Default::default(),
        }
    }
}

/// Algorithms for a _server_-side session.
#[derive(Debug, Clone)]
pub struct Algorithms {
    /// Enabled algorithms for _key-exchange_.
    pub kexs: Vec<Kex>,

    /// Enabled algorithms for _encryption & decryption_.
    pub ciphers: Vec<Cipher>,

    /// Enabled algorithms for _hmac_.
    pub macs: Vec<Hmac>,

    /// Enabled algorithms for _compression_.
    pub compressions: Vec<Compress>,
}

impl Default for Algorithms {
    fn default() -> Self {
        Self {
            kexs: vec![
                Kex::MlKem768X25519Sha256,
                Kex::Curve25519Sha256,
                Kex::Curve25519Sha256Libssh,
                Kex::EcdhSha2Nistp256,
                Kex::EcdhSha2Nistp384,
                Kex::DiffieHellmanGroup14Sha256,
                Kex::DiffieHellmanGroup14Sha1,
            ],
            ciphers: vec![
                Cipher::ChaCha20Poly1305,
                Cipher::Aes256Gcm,
                Cipher::Aes128Gcm,
                Cipher::Aes256Ctr,
                Cipher::Aes192Ctr,
                Cipher::Aes128Ctr,
                Cipher::Aes256Cbc,
                Cipher::Aes192Cbc,
                Cipher::Aes128Cbc,
                Cipher::TDesCbc,
            ],
            macs: vec![
                Hmac::HmacSha512ETM,
                Hmac::HmacSha256ETM,
                Hmac::HmacSha512,
                Hmac::HmacSha256,
                Hmac::HmacSha1ETM,
                Hmac::HmacSha1,
                Hmac::HmacMd5ETM,
                Hmac::HmacMd5,
            ],
            compressions: vec![Compress::None, Compress::ZlibOpenssh, Compress::Zlib],
        }
    }
}

impl Side for Server {
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
            kexs.push(kex::STRICT_SERVER.to_owned());
        }

        KexInit {
            cookie,
            kex_algorithms: kexs.into_iter().collect(),
            server_host_key_algorithms: self
                .keys
                .iter()
                .map(|key| hostkey::advertised(key).as_str().to_owned())
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
        let algorithm = hostkey::negotiate(negotiation.theirs, negotiation.ours)?;
        let key = self
            .keys
            .iter()
            .find(|key| hostkey::advertised(key) == algorithm)
            .expect("Did our KexInit lie to the client ?");

        kex::negotiate(negotiation.theirs, negotiation.ours)?
            .as_server(
                stream,
                &self.rng,
                peer_id,
                self.id(),
                negotiation.i_theirs,
                negotiation.i_ours,
                negotiation.theirs,
                negotiation.ours,
                key,
            )
            .await
    }

    fn discards_guess(&self) -> bool {
        // The client opens every supported method, so a wrong guess
        // lands on our side of the wire.
        true
    }

    fn peer_strict_marker(&self) -> &'static str {
        kex::STRICT_CLIENT
    }

    fn ext_info(&self, peerkexinit: &KexInit) -> Option<ExtInfo> {
        peerkexinit
            .kex_algorithms
            .contains(kex::EXT_INFO_CLIENT)
            .then(|| ExtInfo {
                extensions: vec![(
                    "server-sig-algs".to_owned(),
                    SERVER_SIG_ALGS.as_bytes().to_vec(),
                )],
            })
    }
}
