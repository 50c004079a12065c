//! The key-exchange methods, their negotiation and the per-method
//! exchanges binding the server host key into the session.

use digest::Digest;
use futures::{AsyncBufRead, AsyncWrite};
use num_bigint_dig::BigUint;
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SharedSecret as _};
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use signature::{SignatureEncoding, Signer, Verifier};
use ssh_key::{PrivateKey, Signature};
use strum::{AsRefStr, EnumString};
use zeroize::{Zeroize, Zeroizing};

use crate::{
    algorithm::{self, hostkey, Cipher, Compress, Hmac},
    random::HashChain,
    stream::{Keys, Stream, Transport, TransportPair},
    wire::{
        msg::{
            self, Disconnect, KexDhInit, KexDhReply, KexEcdhInit, KexEcdhReply, KexInit,
        },
        Id, MpInt, NameList, Wire,
    },
    DisconnectedBy, DisconnectedError, Error, Result,
};

mod dh;
mod hash;
use hash::Exchange;

/// The Dropbear-style guess extension: a guess is right iff the first kex
/// entries match, host keys notwithstanding.
pub const KEXGUESS2: &str = "kexguess2@matt.ucc.asn.au";

/// Strict key-exchange marker of the client.
pub const STRICT_CLIENT: &str = "kex-strict-c-v00@openssh.com";

/// Strict key-exchange marker of the server.
pub const STRICT_SERVER: &str = "kex-strict-s-v00@openssh.com";

/// `SSH_MSG_EXT_INFO` interest marker of the client.
pub const EXT_INFO_CLIENT: &str = "ext-info-c";

/// `SSH_MSG_EXT_INFO` interest marker of the server.
pub const EXT_INFO_SERVER: &str = "ext-info-s";

/// Whether a kex name-list entry is a protocol marker rather than a
/// negotiable method.
pub fn is_marker(name: &str) -> bool {
    matches!(
        name,
        KEXGUESS2 | STRICT_CLIENT | STRICT_SERVER | EXT_INFO_CLIENT | EXT_INFO_SERVER
    )
}

/// The first negotiable method of a kex name-list, skipping markers.
pub(crate) fn first_method(list: &NameList) -> Option<&str> {
    list.names()
        .iter()
        .map(String::as_str)
        .find(|name| !is_marker(name))
}

/// Negotiate the key-exchange method from both `SSH_MSG_KEXINIT`s.
pub fn negotiate(clientkex: &KexInit, serverkex: &KexInit) -> Result<Kex> {
    let client: NameList = clientkex
        .kex_algorithms
        .names()
        .iter()
        .filter(|name| !is_marker(name.as_str()))
        .cloned()
        .collect();
    let server: NameList = serverkex
        .kex_algorithms
        .names()
        .iter()
        .filter(|name| !is_marker(name.as_str()))
        .cloned()
        .collect();

    algorithm::pick(&client, &server, Error::NoCommonKex)
}

/// SSH key-exchange algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Kex {
    /// ML-KEM-768 + Curve25519 hybrid with sha-2-256 digest.
    #[strum(serialize = "mlkem768x25519-sha256")]
    MlKem768X25519Sha256,

    /// Curve25519 ECDH with sha-2-256 digest.
    Curve25519Sha256,

    /// Curve25519 ECDH with sha-2-256 digest (pre-RFC 8731).
    #[strum(serialize = "curve25519-sha256@libssh.org")]
    Curve25519Sha256Libssh,

    /// NIST P-256 ECDH with sha-2-256 digest.
    #[strum(serialize = "ecdh-sha2-nistp256")]
    EcdhSha2Nistp256,

    /// NIST P-384 ECDH with sha-2-384 digest.
    #[strum(serialize = "ecdh-sha2-nistp384")]
    EcdhSha2Nistp384,

    /// 2048-bit MODP group DH with sha-2-256 digest.
    DiffieHellmanGroup14Sha256,

    /// 2048-bit MODP group DH with sha-1 digest.
    DiffieHellmanGroup14Sha1,
}

/// Receive the next packet of an ongoing exchange, expecting `T`.
///
/// `SSH_MSG_IGNORE` and `SSH_MSG_DEBUG` are tolerated unless strict kex
/// is in force; anything else but `T` tears the exchange down.
pub(crate) async fn recv<T: Wire, S>(stream: &mut Stream<S>) -> Result<T>
where
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    loop {
        let packet = stream.recv().await?;

        match packet.message_id() {
            msg::SSH_MSG_IGNORE | msg::SSH_MSG_DEBUG if !stream.strict() => continue,
            msg::SSH_MSG_DISCONNECT => {
                let message: Disconnect = packet.to()?;

                return Err(DisconnectedError {
                    by: DisconnectedBy::Them,
                    reason: message.reason,
                    description: message.description,
                }
                .into());
            }
            id if id == T::ID => return packet.to(),
            _ => return Err(Error::UnexpectedMessage),
        }
    }
}

/// The transport algorithms both directions agreed on.
struct Algorithms {
    client_cipher: Cipher,
    server_cipher: Cipher,
    client_hmac: Hmac,
    server_hmac: Hmac,
    client_compress: Compress,
    server_compress: Compress,
}

fn algorithms(clientkex: &KexInit, serverkex: &KexInit) -> Result<Algorithms> {
    let (client_hmac, server_hmac) = algorithm::negotiate_hmac(clientkex, serverkex)?;
    let (client_compress, server_compress) = algorithm::negotiate_compress(clientkex, serverkex)?;
    let (client_cipher, server_cipher) = algorithm::negotiate_cipher(clientkex, serverkex)?;

    Ok(Algorithms {
        client_cipher,
        server_cipher,
        client_hmac,
        server_hmac,
        client_compress,
        server_compress,
    })
}

/// Assemble both directions from the negotiated algorithms and the key
/// schedule; the client transmits on the `A`/`C`/`E` chain.
fn pair<D: digest::Digest + digest::FixedOutputReset>(
    client_side: bool,
    k_wire: &[u8],
    hash: &[u8],
    session_id: &[u8],
    algorithms: Algorithms,
) -> TransportPair {
    let c2s = Transport::new(
        algorithms.client_compress,
        algorithms.client_cipher.clone(),
        algorithms.client_hmac.clone(),
        Keys::as_client::<D>(
            k_wire,
            hash,
            session_id,
            &algorithms.client_cipher,
            &algorithms.client_hmac,
        ),
    );
    let s2c = Transport::new(
        algorithms.server_compress,
        algorithms.server_cipher.clone(),
        algorithms.server_hmac.clone(),
        Keys::as_server::<D>(
            k_wire,
            hash,
            session_id,
            &algorithms.server_cipher,
            &algorithms.server_hmac,
        ),
    );

    if client_side {
        TransportPair { tx: c2s, rx: s2c }
    } else {
        TransportPair { tx: s2c, rx: c2s }
    }
}

fn x25519_public(bytes: &[u8]) -> Result<x25519_dalek::PublicKey> {
    Ok(x25519_dalek::PublicKey::from(
        <[u8; 32]>::try_from(bytes).map_err(|_| Error::KexError)?,
    ))
}

/// Verify the server signature over `H` against the negotiated host-key
/// algorithm.
fn verify_signature(
    clientkex: &KexInit,
    serverkex: &KexInit,
    k_s: &[u8],
    hash: &[u8],
    signature: &[u8],
) -> Result<()> {
    let negotiated = hostkey::negotiate(clientkex, serverkex)?;

    let key = ssh_key::PublicKey::from_bytes(k_s)?;
    let signature = Signature::try_from(signature)?;

    if !hostkey::matches(&negotiated, &signature.algorithm()) {
        return Err(Error::Signature(signature::Error::new()));
    }

    Verifier::verify(&key, hash, &signature)?;

    Ok(())
}

impl Kex {
    /// Run the exchange from the client side.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn as_client<S>(
        &self,
        stream: &mut Stream<S>,
        rng: &std::sync::Mutex<HashChain>,
        v_c: &Id,
        v_s: &Id,
        i_c: &[u8],
        i_s: &[u8],
        clientkex: &KexInit,
        serverkex: &KexInit,
    ) -> Result<TransportPair>
    where
        S: AsyncBufRead + AsyncWrite + Unpin + Send,
    {
        let algorithms = algorithms(clientkex, serverkex)?;

        match self {
            Self::Curve25519Sha256 | Self::Curve25519Sha256Libssh => {
                let e_c = {
                    let mut rng = rng.lock().expect("random source lock poisoned");
                    x25519_dalek::EphemeralSecret::random_from_rng(&mut *rng)
                };
                let q_c = x25519_dalek::PublicKey::from(&e_c);

                stream
                    .send(&KexEcdhInit {
                        q_c: q_c.as_bytes().to_vec(),
                    })
                    .await?;

                let reply: KexEcdhReply = recv(stream).await?;

                let q_s = x25519_public(&reply.q_s)?;
                let shared = e_c.diffie_hellman(&q_s);
                if !shared.was_contributory() {
                    return Err(Error::KexError);
                }

                let k = MpInt::from_bytes(shared.as_bytes());
                let k_wire = hash::mpint(&k);

                let q_c_wire = hash::string(q_c.as_bytes());
                let q_s_wire = hash::string(&reply.q_s);

                let hash = Exchange {
                    v_c: v_c.as_str().as_bytes(),
                    v_s: v_s.as_str().as_bytes(),
                    i_c,
                    i_s,
                    k_s: &reply.k_s,
                    q_c: &q_c_wire,
                    q_s: &q_s_wire,
                    k: &k_wire,
                }
                .hash::<Sha256>();

                verify_signature(clientkex, serverkex, &reply.k_s, &hash, &reply.signature)?;

                let session_id = stream.with_session(&hash);

                Ok(pair::<Sha256>(true, &k_wire, &hash, session_id, algorithms))
            }

            Self::MlKem768X25519Sha256 => {
                let (kem_pk, kem_sk) = mlkem768::keypair();
                let e_c = {
                    let mut rng = rng.lock().expect("random source lock poisoned");
                    x25519_dalek::EphemeralSecret::random_from_rng(&mut *rng)
                };
                let x_pub = x25519_dalek::PublicKey::from(&e_c);

                // C_INIT = C_PK2 || C_PK1, the KEM public before the
                // curve25519 public.
                let mut q_c = Vec::with_capacity(mlkem768::public_key_bytes() + 32);
                q_c.extend_from_slice(kem_pk.as_bytes());
                q_c.extend_from_slice(x_pub.as_bytes());

                stream.send(&KexEcdhInit { q_c: q_c.clone() }).await?;

                let reply: KexEcdhReply = recv(stream).await?;
                if reply.q_s.len() != mlkem768::ciphertext_bytes() + 32 {
                    return Err(Error::KexError);
                }

                let (ct_bytes, x_bytes) = reply.q_s.split_at(mlkem768::ciphertext_bytes());
                let ct = mlkem768::Ciphertext::from_bytes(ct_bytes)
                    .map_err(|_| Error::KexError)?;
                let kem_shared = mlkem768::decapsulate(&ct, &kem_sk);

                let shared = e_c.diffie_hellman(&x25519_public(x_bytes)?);
                if !shared.was_contributory() {
                    return Err(Error::KexError);
                }

                // The hybrid secret is a digest, framed as a string
                // rather than an mpint.
                let k = Zeroizing::new(
                    <Sha256 as digest::Digest>::new()
                        .chain_update(kem_shared.as_bytes())
                        .chain_update(shared.as_bytes())
                        .finalize()
                        .to_vec(),
                );
                let k_wire = hash::string(&k);

                let q_c_wire = hash::string(&q_c);
                let q_s_wire = hash::string(&reply.q_s);

                let hash = Exchange {
                    v_c: v_c.as_str().as_bytes(),
                    v_s: v_s.as_str().as_bytes(),
                    i_c,
                    i_s,
                    k_s: &reply.k_s,
                    q_c: &q_c_wire,
                    q_s: &q_s_wire,
                    k: &k_wire,
                }
                .hash::<Sha256>();

                verify_signature(clientkex, serverkex, &reply.k_s, &hash, &reply.signature)?;

                let session_id = stream.with_session(&hash);

                Ok(pair::<Sha256>(true, &k_wire, &hash, session_id, algorithms))
            }

            Self::EcdhSha2Nistp256 => {
                let e_c = {
                    let mut rng = rng.lock().expect("random source lock poisoned");
                    p256::ecdh::EphemeralSecret::random(&mut *rng)
                };
                let q_c = p256::EncodedPoint::from(e_c.public_key());

                stream
                    .send(&KexEcdhInit {
                        q_c: q_c.as_bytes().to_vec(),
                    })
                    .await?;

                let reply: KexEcdhReply = recv(stream).await?;

                let peer = p256::PublicKey::from_sec1_bytes(&reply.q_s)
                    .map_err(|_| Error::KexError)?;
                let shared = e_c.diffie_hellman(&peer);

                let k = MpInt::from_bytes(shared.raw_secret_bytes().as_slice());
                let k_wire = hash::mpint(&k);

                let q_c_wire = hash::string(q_c.as_bytes());
                let q_s_wire = hash::string(&reply.q_s);

                let hash = Exchange {
                    v_c: v_c.as_str().as_bytes(),
                    v_s: v_s.as_str().as_bytes(),
                    i_c,
                    i_s,
                    k_s: &reply.k_s,
                    q_c: &q_c_wire,
                    q_s: &q_s_wire,
                    k: &k_wire,
                }
                .hash::<Sha256>();

                verify_signature(clientkex, serverkex, &reply.k_s, &hash, &reply.signature)?;

                let session_id = stream.with_session(&hash);

                Ok(pair::<Sha256>(true, &k_wire, &hash, session_id, algorithms))
            }

            Self::EcdhSha2Nistp384 => {
                let e_c = {
                    let mut rng = rng.lock().expect("random source lock poisoned");
                    p384::ecdh::EphemeralSecret::random(&mut *rng)
                };
                let q_c = p384::EncodedPoint::from(e_c.public_key());

                stream
                    .send(&KexEcdhInit {
                        q_c: q_c.as_bytes().to_vec(),
                    })
                    .await?;

                let reply: KexEcdhReply = recv(stream).await?;

                let peer = p384::PublicKey::from_sec1_bytes(&reply.q_s)
                    .map_err(|_| Error::KexError)?;
                let shared = e_c.diffie_hellman(&peer);

                let k = MpInt::from_bytes(shared.raw_secret_bytes().as_slice());
                let k_wire = hash::mpint(&k);

                let q_c_wire = hash::string(q_c.as_bytes());
                let q_s_wire = hash::string(&reply.q_s);

                let hash = Exchange {
                    v_c: v_c.as_str().as_bytes(),
                    v_s: v_s.as_str().as_bytes(),
                    i_c,
                    i_s,
                    k_s: &reply.k_s,
                    q_c: &q_c_wire,
                    q_s: &q_s_wire,
                    k: &k_wire,
                }
                .hash::<Sha384>();

                verify_signature(clientkex, serverkex, &reply.k_s, &hash, &reply.signature)?;

                let session_id = stream.with_session(&hash);

                Ok(pair::<Sha384>(true, &k_wire, &hash, session_id, algorithms))
            }

            Self::DiffieHellmanGroup14Sha256 => {
                dh_client::<Sha256, S>(stream, rng, v_c, v_s, i_c, i_s, clientkex, serverkex, algorithms).await
            }
            Self::DiffieHellmanGroup14Sha1 => {
                dh_client::<Sha1, S>(stream, rng, v_c, v_s, i_c, i_s, clientkex, serverkex, algorithms).await
            }
        }
    }

    /// Run the exchange from the server side, signing with `key`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn as_server<S>(
        &self,
        stream: &mut Stream<S>,
        rng: &std::sync::Mutex<HashChain>,
        v_c: &Id,
        v_s: &Id,
        i_c: &[u8],
        i_s: &[u8],
        clientkex: &KexInit,
        serverkex: &KexInit,
        key: &PrivateKey,
    ) -> Result<TransportPair>
    where
        S: AsyncBufRead + AsyncWrite + Unpin + Send,
    {
        let algorithms = algorithms(clientkex, serverkex)?;
        let k_s = key.public_key().to_bytes()?;

        match self {
            Self::Curve25519Sha256 | Self::Curve25519Sha256Libssh => {
                let init: KexEcdhInit = recv(stream).await?;

                let e_s = {
                    let mut rng = rng.lock().expect("random source lock poisoned");
                    x25519_dalek::EphemeralSecret::random_from_rng(&mut *rng)
                };
                let q_s = x25519_dalek::PublicKey::from(&e_s);

                let q_c = x25519_public(&init.q_c)?;
                let shared = e_s.diffie_hellman(&q_c);
                if !shared.was_contributory() {
                    return Err(Error::KexError);
                }

                let k = MpInt::from_bytes(shared.as_bytes());
                let k_wire = hash::mpint(&k);

                let q_c_wire = hash::string(&init.q_c);
                let q_s_wire = hash::string(q_s.as_bytes());

                let hash = Exchange {
                    v_c: v_c.as_str().as_bytes(),
                    v_s: v_s.as_str().as_bytes(),
                    i_c,
                    i_s,
                    k_s: &k_s,
                    q_c: &q_c_wire,
                    q_s: &q_s_wire,
                    k: &k_wire,
                }
                .hash::<Sha256>();

                let signature: Signature = key.try_sign(&hash)?;
                stream
                    .send(&KexEcdhReply {
                        k_s: k_s.clone(),
                        q_s: q_s.as_bytes().to_vec(),
                        signature: signature.to_vec(),
                    })
                    .await?;

                let session_id = stream.with_session(&hash);

                Ok(pair::<Sha256>(false, &k_wire, &hash, session_id, algorithms))
            }

            Self::MlKem768X25519Sha256 => {
                let init: KexEcdhInit = recv(stream).await?;
                if init.q_c.len() != mlkem768::public_key_bytes() + 32 {
                    return Err(Error::KexError);
                }

                let (pk_bytes, x_bytes) = init.q_c.split_at(mlkem768::public_key_bytes());
                let kem_pk =
                    mlkem768::PublicKey::from_bytes(pk_bytes).map_err(|_| Error::KexError)?;
                let (kem_shared, ct) = mlkem768::encapsulate(&kem_pk);

                let e_s = {
                    let mut rng = rng.lock().expect("random source lock poisoned");
                    x25519_dalek::EphemeralSecret::random_from_rng(&mut *rng)
                };
                let x_pub = x25519_dalek::PublicKey::from(&e_s);

                let shared = e_s.diffie_hellman(&x25519_public(x_bytes)?);
                if !shared.was_contributory() {
                    return Err(Error::KexError);
                }

                // S_REPLY = S_CT2 || S_PK1.
                let mut q_s = Vec::with_capacity(mlkem768::ciphertext_bytes() + 32);
                q_s.extend_from_slice(ct.as_bytes());
                q_s.extend_from_slice(x_pub.as_bytes());

                let k = Zeroizing::new(
                    <Sha256 as digest::Digest>::new()
                        .chain_update(kem_shared.as_bytes())
                        .chain_update(shared.as_bytes())
                        .finalize()
                        .to_vec(),
                );
                let k_wire = hash::string(&k);

                let q_c_wire = hash::string(&init.q_c);
                let q_s_wire = hash::string(&q_s);

                let hash = Exchange {
                    v_c: v_c.as_str().as_bytes(),
                    v_s: v_s.as_str().as_bytes(),
                    i_c,
                    i_s,
                    k_s: &k_s,
                    q_c: &q_c_wire,
                    q_s: &q_s_wire,
                    k: &k_wire,
                }
                .hash::<Sha256>();

                let signature: Signature = key.try_sign(&hash)?;
                stream
                    .send(&KexEcdhReply {
                        k_s: k_s.clone(),
                        q_s,
                        signature: signature.to_vec(),
                    })
                    .await?;

                let session_id = stream.with_session(&hash);

                Ok(pair::<Sha256>(false, &k_wire, &hash, session_id, algorithms))
            }

            Self::EcdhSha2Nistp256 => {
                let init: KexEcdhInit = recv(stream).await?;

                let e_s = {
                    let mut rng = rng.lock().expect("random source lock poisoned");
                    p256::ecdh::EphemeralSecret::random(&mut *rng)
                };
                let q_s = p256::EncodedPoint::from(e_s.public_key());

                let peer = p256::PublicKey::from_sec1_bytes(&init.q_c)
                    .map_err(|_| Error::KexError)?;
                let shared = e_s.diffie_hellman(&peer);

                let k = MpInt::from_bytes(shared.raw_secret_bytes().as_slice());
                let k_wire = hash::mpint(&k);

                let q_c_wire = hash::string(&init.q_c);
                let q_s_wire = hash::string(q_s.as_bytes());

                let hash = Exchange {
                    v_c: v_c.as_str().as_bytes(),
                    v_s: v_s.as_str().as_bytes(),
                    i_c,
                    i_s,
                    k_s: &k_s,
                    q_c: &q_c_wire,
                    q_s: &q_s_wire,
                    k: &k_wire,
                }
                .hash::<Sha256>();

                let signature: Signature = key.try_sign(&hash)?;
                stream
                    .send(&KexEcdhReply {
                        k_s: k_s.clone(),
                        q_s: q_s.as_bytes().to_vec(),
                        signature: signature.to_vec(),
                    })
                    .await?;

                let session_id = stream.with_session(&hash);

                Ok(pair::<Sha256>(false, &k_wire, &hash, session_id, algorithms))
            }

            Self::EcdhSha2Nistp384 => {
                let init: KexEcdhInit = recv(stream).await?;

                let e_s = {
                    let mut rng = rng.lock().expect("random source lock poisoned");
                    p384::ecdh::EphemeralSecret::random(&mut *rng)
                };
                let q_s = p384::EncodedPoint::from(e_s.public_key());

                let peer = p384::PublicKey::from_sec1_bytes(&init.q_c)
                    .map_err(|_| Error::KexError)?;
                let shared = e_s.diffie_hellman(&peer);

                let k = MpInt::from_bytes(shared.raw_secret_bytes().as_slice());
                let k_wire = hash::mpint(&k);

                let q_c_wire = hash::string(&init.q_c);
                let q_s_wire = hash::string(q_s.as_bytes());

                let hash = Exchange {
                    v_c: v_c.as_str().as_bytes(),
                    v_s: v_s.as_str().as_bytes(),
                    i_c,
                    i_s,
                    k_s: &k_s,
                    q_c: &q_c_wire,
                    q_s: &q_s_wire,
                    k: &k_wire,
                }
                .hash::<Sha384>();

                let signature: Signature = key.try_sign(&hash)?;
                stream
                    .send(&KexEcdhReply {
                        k_s: k_s.clone(),
                        q_s: q_s.as_bytes().to_vec(),
                        signature: signature.to_vec(),
                    })
                    .await?;

                let session_id = stream.with_session(&hash);

                Ok(pair::<Sha384>(false, &k_wire, &hash, session_id, algorithms))
            }

            Self::DiffieHellmanGroup14Sha256 => {
                dh_server::<Sha256, S>(stream, rng, v_c, v_s, i_c, i_s, key, &k_s, algorithms).await
            }
            Self::DiffieHellmanGroup14Sha1 => {
                dh_server::<Sha1, S>(stream, rng, v_c, v_s, i_c, i_s, key, &k_s, algorithms).await
            }
        }
    }
}

/// Draw the DH private exponent `x` from `(1, q)` with `q = (p-1)/2`.
fn dh_secret(rng: &std::sync::Mutex<HashChain>, p: &BigUint) -> Result<BigUint> {
    let q = (p - 1u32) >> 1;
    let one = BigUint::from(1u32);

    let mut rng = rng.lock().expect("random source lock poisoned");
    loop {
        let candidate = rng.mpint_below(&q)?;
        if candidate > one {
            return Ok(candidate);
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn dh_client<D, S>(
    stream: &mut Stream<S>,
    rng: &std::sync::Mutex<HashChain>,
    v_c: &Id,
    v_s: &Id,
    i_c: &[u8],
    i_s: &[u8],
    clientkex: &KexInit,
    serverkex: &KexInit,
    algorithms: Algorithms,
) -> Result<TransportPair>
where
    D: digest::Digest + digest::FixedOutputReset,
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    let p = dh::prime();

    let mut x = dh_secret(rng, &p)?;
    let e = dh::generator().modpow(&x, &p);

    stream
        .send(&KexDhInit {
            e: MpInt::from_biguint(&e),
        })
        .await?;

    let reply: KexDhReply = recv(stream).await?;

    let f = reply.f.to_biguint();
    dh::validate_public(&f, &p)?;

    let mut secret = f.modpow(&x, &p);
    dh::validate_public(&secret, &p)?;
    x.zeroize();

    let k = MpInt::from_biguint(&secret);
    secret.zeroize();
    let k_wire = hash::mpint(&k);

    let e_wire = hash::mpint(&MpInt::from_biguint(&e));
    let f_wire = hash::mpint(&reply.f);

    let hash = Exchange {
        v_c: v_c.as_str().as_bytes(),
        v_s: v_s.as_str().as_bytes(),
        i_c,
        i_s,
        k_s: &reply.k_s,
        q_c: &e_wire,
        q_s: &f_wire,
        k: &k_wire,
    }
    .hash::<D>();

    verify_signature(clientkex, serverkex, &reply.k_s, &hash, &reply.signature)?;

    let session_id = stream.with_session(&hash);

    Ok(pair::<D>(true, &k_wire, &hash, session_id, algorithms))
}

#[allow(clippy::too_many_arguments)]
async fn dh_server<D, S>(
    stream: &mut Stream<S>,
    rng: &std::sync::Mutex<HashChain>,
    v_c: &Id,
    v_s: &Id,
    i_c: &[u8],
    i_s: &[u8],
    key: &PrivateKey,
    k_s: &[u8],
    algorithms: Algorithms,
) -> Result<TransportPair>
where
    D: digest::Digest + digest::FixedOutputReset,
    S: AsyncBufRead + AsyncWrite + Unpin + Send,
{
    let p = dh::prime();

    let init: KexDhInit = recv(stream).await?;
    let e = init.e.to_biguint();
    dh::validate_public(&e, &p)?;

    let mut y = dh_secret(rng, &p)?;
    let f = dh::generator().modpow(&y, &p);

    let mut secret = e.modpow(&y, &p);
    dh::validate_public(&secret, &p)?;
    y.zeroize();

    let k = MpInt::from_biguint(&secret);
    secret.zeroize();
    let k_wire = hash::mpint(&k);

    let e_wire = hash::mpint(&init.e);
    let f_mpint = MpInt::from_biguint(&f);
    let f_wire = hash::mpint(&f_mpint);

    let hash = Exchange {
        v_c: v_c.as_str().as_bytes(),
        v_s: v_s.as_str().as_bytes(),
        i_c,
        i_s,
        k_s,
        q_c: &e_wire,
        q_s: &f_wire,
        k: &k_wire,
    }
    .hash::<D>();

    let signature: Signature = key.try_sign(&hash)?;
    stream
        .send(&KexDhReply {
            k_s: k_s.to_vec(),
            f: f_mpint,
            signature: signature.to_vec(),
        })
        .await?;

    let session_id = stream.with_session(&hash);

    Ok(pair::<D>(false, &k_wire, &hash, session_id, algorithms))
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn names_parse_back() {
        for name in [
            "mlkem768x25519-sha256",
            "curve25519-sha256",
            "curve25519-sha256@libssh.org",
            "ecdh-sha2-nistp256",
            "ecdh-sha2-nistp384",
            "diffie-hellman-group14-sha256",
            "diffie-hellman-group14-sha1",
        ] {
            let kex: Kex = name.parse().expect("known name");
            assert_eq!(kex.as_ref(), name);
        }
    }

    #[test]
    fn markers_never_negotiate() {
        use crate::side::{server::Server, Side};

        let base = Server::default().kexinit(true);

        let mut client = base.clone();
        client.kex_algorithms = [KEXGUESS2, STRICT_CLIENT, "curve25519-sha256"]
            .into_iter()
            .collect();

        let mut server = base;
        server.kex_algorithms = [KEXGUESS2, STRICT_SERVER, "curve25519-sha256"]
            .into_iter()
            .collect();

        assert_eq!(
            negotiate(&client, &server).expect("negotiable"),
            Kex::Curve25519Sha256
        );
    }

    #[test]
    fn x25519_known_answer() {
        // RFC 7748 §6.1 Diffie-Hellman test vector.
        let alice_private =
            hex!("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a");
        let bob_public = hex!("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f");

        let shared = x25519_dalek::x25519(alice_private, bob_public);
        assert_eq!(
            shared,
            hex!("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742")
        );
    }

    #[test]
    fn mlkem_encapsulation_roundtrip() {
        let (pk, sk) = mlkem768::keypair();
        let (shared, ct) = mlkem768::encapsulate(&pk);

        let decapsulated = mlkem768::decapsulate(&ct, &sk);
        assert_eq!(shared.as_bytes(), decapsulated.as_bytes());
        assert_eq!(ct.as_bytes().len(), mlkem768::ciphertext_bytes());
    }

    #[test]
    fn hybrid_secret_is_string_framed() {
        // 32 digest bytes, length-prefixed; never an mpint.
        let k = [0xffu8; 32];
        let wire = hash::string(&k);

        assert_eq!(wire.len(), 4 + 32);
        assert_eq!(&wire[..4], &32u32.to_be_bytes());
        // An mpint framing of the same bytes would have inserted a pad
        // byte for the set MSB.
        assert_eq!(hash::mpint(&MpInt::from_bytes(&k)).len(), 4 + 33);
    }
}
