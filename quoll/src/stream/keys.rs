use digest::{Digest, FixedOutputReset};
use secrecy::SecretBox;

use crate::algorithm::{Cipher, Hmac};

/// The derived key material of one direction, per RFC 4253 §7.2; the
/// secret `K` is taken in its wire encoding (mpint or string, depending
/// on the negotiated method) so the KDF input can never diverge from the
/// exchange-hash input.
#[derive(Default)]
pub struct Keys {
    /// Cipher _initialization vector_.
    pub iv: SecretBox<Vec<u8>>,

    /// Cipher _key_.
    pub key: SecretBox<Vec<u8>>,

    /// Hmac _key_.
    pub hmac: SecretBox<Vec<u8>>,
}

impl Keys {
    /// Derive the client -> server keys, letters `A`, `C` and `E`.
    pub fn as_client<D: Digest + FixedOutputReset>(
        k_wire: &[u8],
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive::<D>(k_wire, hash, b'A', session_id, cipher.iv_size()),
            key: Self::derive::<D>(k_wire, hash, b'C', session_id, cipher.key_size()),
            hmac: Self::derive::<D>(k_wire, hash, b'E', session_id, hmac.size()),
        }
    }

    /// Derive the server -> client keys, letters `B`, `D` and `F`.
    pub fn as_server<D: Digest + FixedOutputReset>(
        k_wire: &[u8],
        hash: &[u8],
        session_id: &[u8],
        cipher: &Cipher,
        hmac: &Hmac,
    ) -> Self {
        Self {
            iv: Self::derive::<D>(k_wire, hash, b'B', session_id, cipher.iv_size()),
            key: Self::derive::<D>(k_wire, hash, b'D', session_id, cipher.key_size()),
            hmac: Self::derive::<D>(k_wire, hash, b'F', session_id, hmac.size()),
        }
    }

    fn derive<D: Digest + FixedOutputReset>(
        k_wire: &[u8],
        hash: &[u8],
        kind: u8,
        session_id: &[u8],
        size: usize,
    ) -> SecretBox<Vec<u8>> {
        SecretBox::<Vec<u8>>::init_with_mut(|key| {
            let mut hasher = D::new()
                .chain_update(k_wire)
                .chain_update(hash)
                .chain_update([kind])
                .chain_update(session_id);

            key.extend_from_slice(&hasher.finalize_reset());

            while key.len() < size {
                hasher = hasher
                    .chain_update(k_wire)
                    .chain_update(hash)
                    .chain_update(&*key);

                key.extend_from_slice(&hasher.finalize_reset());
            }

            key.truncate(size);
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;
    use sha2::Sha256;

    use super::*;

    #[test]
    fn derivation_is_deterministic_and_sized() {
        let k = b"\x00\x00\x00\x01\x42";
        let hash = [0x55u8; 32];
        let session = [0x66u8; 32];

        let one = Keys::as_client::<Sha256>(
            k,
            &hash,
            &session,
            &Cipher::Aes256Ctr,
            &Hmac::HmacSha512,
        );
        let two = Keys::as_client::<Sha256>(
            k,
            &hash,
            &session,
            &Cipher::Aes256Ctr,
            &Hmac::HmacSha512,
        );

        assert_eq!(one.iv.expose_secret(), two.iv.expose_secret());
        assert_eq!(one.key.expose_secret(), two.key.expose_secret());
        assert_eq!(one.iv.expose_secret().len(), 16);
        assert_eq!(one.key.expose_secret().len(), 32);
        // Extended past one digest block by the re-hash chain.
        assert_eq!(one.hmac.expose_secret().len(), 64);
    }

    #[test]
    fn directions_and_letters_differ() {
        let k = b"\x00\x00\x00\x01\x42";
        let hash = [0x55u8; 32];
        let session = [0x66u8; 32];

        let client =
            Keys::as_client::<Sha256>(k, &hash, &session, &Cipher::Aes128Ctr, &Hmac::HmacSha256);
        let server =
            Keys::as_server::<Sha256>(k, &hash, &session, &Cipher::Aes128Ctr, &Hmac::HmacSha256);

        assert_ne!(client.iv.expose_secret(), server.iv.expose_secret());
        assert_ne!(client.key.expose_secret(), server.key.expose_secret());
        assert_ne!(client.key.expose_secret(), client.iv.expose_secret());
    }
}
