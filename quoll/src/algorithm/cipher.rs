use aes_gcm::{aead::AeadInPlace, KeyInit as _};
use chacha20::ChaCha20Legacy;
use cipher::{Block, BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher, StreamCipherSeek};
use poly1305::Poly1305;
use strum::{AsRefStr, EnumString};
use subtle::ConstantTimeEq;

use crate::{wire::msg::KexInit, Error, Result};

/// Length of the authentication tag appended by the AEAD ciphers.
pub(crate) const TAG_SIZE: usize = 16;

/// Type-erased per-direction cipher state; the concrete type behind the
/// box is fixed by the negotiated algorithm for the life of the keyset.
pub type CipherState = Box<dyn std::any::Any + Send + Sync>;

pub(crate) fn negotiate(clientkex: &KexInit, serverkex: &KexInit) -> Result<(Cipher, Cipher)> {
    Ok((
        super::pick(
            &clientkex.encryption_algorithms_client_to_server,
            &serverkex.encryption_algorithms_client_to_server,
            Error::NoCommonCipher,
        )?,
        super::pick(
            &clientkex.encryption_algorithms_server_to_client,
            &serverkex.encryption_algorithms_server_to_client,
            Error::NoCommonCipher,
        )?,
    ))
}

/// SSH cipher algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Cipher {
    /// ChaCha20-Poly1305 with the OpenSSH split length key.
    #[strum(serialize = "chacha20-poly1305@openssh.com")]
    ChaCha20Poly1305,

    /// AES-256 in Galois/Counter Mode (GCM).
    #[strum(serialize = "aes256-gcm@openssh.com")]
    Aes256Gcm,

    /// AES-128 in Galois/Counter Mode (GCM).
    #[strum(serialize = "aes128-gcm@openssh.com")]
    Aes128Gcm,

    /// AES-256 in counter (CTR) mode.
    Aes256Ctr,

    /// AES-192 in counter (CTR) mode.
    Aes192Ctr,

    /// AES-128 in counter (CTR) mode.
    Aes128Ctr,

    /// AES-256 in cipher block chaining (CBC) mode.
    Aes256Cbc,

    /// AES-192 in cipher block chaining (CBC) mode.
    Aes192Cbc,

    /// AES-128 in cipher block chaining (CBC) mode.
    Aes128Cbc,

    /// TripleDES in cipher block chaining (CBC) mode.
    #[strum(serialize = "3des-cbc")]
    TDesCbc,

    /// No cipher algorithm.
    #[default]
    None,
}

/// Get the live cipher out of the state slot, keying it on first use.
///
/// A direction only ever holds the one cipher it negotiated, so a failed
/// downcast means the keyset and the state went out of sync, which is
/// reported rather than assumed away.
fn keyed<'s, C>(slot: &'s mut Option<CipherState>, key: &[u8], iv: &[u8]) -> Result<&'s mut C>
where
    C: KeyIvInit + Send + Sync + 'static,
{
    if slot.is_none() {
        let fresh = C::new_from_slices(key, iv).map_err(|_| Error::Cipher)?;
        *slot = Some(Box::new(fresh));
    }

    slot.as_mut()
        .and_then(|state| state.downcast_mut::<C>())
        .ok_or(Error::Cipher)
}

fn ctr_apply<C>(
    slot: &mut Option<CipherState>,
    key: &[u8],
    iv: &[u8],
    buffer: &mut [u8],
) -> Result<()>
where
    C: KeyIvInit + StreamCipher + Send + Sync + 'static,
{
    keyed::<C>(slot, key, iv)?
        .try_apply_keystream(buffer)
        .map_err(|_| Error::Cipher)
}

/// Encrypt whole blocks in place; the transport padding guarantees the
/// alignment, anything else is a framing bug.
fn cbc_encrypt<C: BlockEncryptMut>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
    let width = C::block_size();
    if buffer.len() % width != 0 {
        return Err(Error::Cipher);
    }

    for chunk in buffer.chunks_exact_mut(width) {
        cipher.encrypt_block_mut(Block::<C>::from_mut_slice(chunk));
    }

    Ok(())
}

fn cbc_decrypt<C: BlockDecryptMut>(cipher: &mut C, buffer: &mut [u8]) -> Result<()> {
    let width = C::block_size();
    if buffer.len() % width != 0 {
        return Err(Error::Cipher);
    }

    for chunk in buffer.chunks_exact_mut(width) {
        cipher.decrypt_block_mut(Block::<C>::from_mut_slice(chunk));
    }

    Ok(())
}

/// Per-direction nonce state of the AES-GCM ciphers; the 8-byte tail is
/// an invocation counter bumped once per packet, per RFC 5647.
struct GcmState<C> {
    cipher: C,
    nonce: [u8; 12],
}

impl<C> GcmState<C> {
    fn bump(&mut self) {
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&self.nonce[4..]);
        let counter = u64::from_be_bytes(counter).wrapping_add(1);
        self.nonce[4..].copy_from_slice(&counter.to_be_bytes());
    }
}

fn gcm<'s, C>(slot: &'s mut Option<CipherState>, key: &[u8], iv: &[u8]) -> Result<&'s mut GcmState<C>>
where
    C: aes_gcm::KeyInit + Send + Sync + 'static,
{
    if slot.is_none() {
        let nonce: [u8; 12] = iv
            .get(..12)
            .and_then(|slice| slice.try_into().ok())
            .ok_or(Error::Cipher)?;

        *slot = Some(Box::new(GcmState {
            cipher: C::new_from_slice(key).map_err(|_| Error::Cipher)?,
            nonce,
        }));
    }

    slot.as_mut()
        .and_then(|state| state.downcast_mut::<GcmState<C>>())
        .ok_or(Error::Cipher)
}

fn gcm_seal<C>(
    slot: &mut Option<CipherState>,
    key: &[u8],
    iv: &[u8],
    length: [u8; 4],
    body: &mut Vec<u8>,
) -> Result<Vec<u8>>
where
    C: aes_gcm::KeyInit + AeadInPlace + Send + Sync + 'static,
{
    let gcm = gcm::<C>(slot, key, iv)?;

    let tag = gcm
        .cipher
        .encrypt_in_place_detached(aes_gcm::Nonce::from_slice(&gcm.nonce), &length, body)
        .map_err(|_| Error::Cipher)?;
    gcm.bump();

    let mut wire = Vec::with_capacity(4 + body.len() + TAG_SIZE);
    wire.extend_from_slice(&length);
    wire.extend_from_slice(body);
    wire.extend_from_slice(&tag);

    Ok(wire)
}

fn gcm_open<C>(
    slot: &mut Option<CipherState>,
    key: &[u8],
    iv: &[u8],
    length: [u8; 4],
    body: &mut Vec<u8>,
) -> Result<()>
where
    C: aes_gcm::KeyInit + AeadInPlace + Send + Sync + 'static,
{
    let tag_at = body.len() - TAG_SIZE;
    let gcm = gcm::<C>(slot, key, iv)?;

    let tag = aes_gcm::Tag::clone_from_slice(&body[tag_at..]);
    body.truncate(tag_at);

    gcm.cipher
        .decrypt_in_place_detached(aes_gcm::Nonce::from_slice(&gcm.nonce), &length, body, &tag)
        .map_err(|_| Error::Integrity(digest::MacError))?;
    gcm.bump();

    Ok(())
}

/// The chacha instance for one half of the split key, nonced with the
/// packet sequence number.
fn chacha(key_half: &[u8], seq: u32) -> Result<ChaCha20Legacy> {
    ChaCha20Legacy::new_from_slices(key_half, &u64::from(seq).to_be_bytes())
        .map_err(|_| Error::Cipher)
}

/// The encrypted length field and the one-shot Poly1305 key of a packet.
///
/// K_2, the packet key, is the first half of the derived material; K_1,
/// the length key, the second. The Poly1305 key is keystream block zero
/// of the packet key.
fn chacha_header(key: &[u8], seq: u32, length: [u8; 4]) -> Result<([u8; 4], [u8; 32])> {
    let (packet_key, length_key) = key.split_at(key.len() / 2);

    let mut enc_length = length;
    chacha(length_key, seq)?.apply_keystream(&mut enc_length);

    let mut poly_key = [0u8; 32];
    chacha(packet_key, seq)?.apply_keystream(&mut poly_key);

    Ok((enc_length, poly_key))
}

impl Cipher {
    pub(crate) fn encrypt(
        &self,
        state: &mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
        buffer: &mut [u8],
    ) -> Result<()> {
        match self {
            Self::Aes256Ctr => ctr_apply::<ctr::Ctr128BE<aes::Aes256>>(state, key, iv, buffer),
            Self::Aes192Ctr => ctr_apply::<ctr::Ctr128BE<aes::Aes192>>(state, key, iv, buffer),
            Self::Aes128Ctr => ctr_apply::<ctr::Ctr128BE<aes::Aes128>>(state, key, iv, buffer),
            Self::Aes256Cbc => {
                cbc_encrypt(keyed::<cbc::Encryptor<aes::Aes256>>(state, key, iv)?, buffer)
            }
            Self::Aes192Cbc => {
                cbc_encrypt(keyed::<cbc::Encryptor<aes::Aes192>>(state, key, iv)?, buffer)
            }
            Self::Aes128Cbc => {
                cbc_encrypt(keyed::<cbc::Encryptor<aes::Aes128>>(state, key, iv)?, buffer)
            }
            Self::TDesCbc => {
                cbc_encrypt(keyed::<cbc::Encryptor<des::TdesEde3>>(state, key, iv)?, buffer)
            }
            Self::None => Ok(()),
            // The AEAD ciphers go through seal/open, not here.
            Self::ChaCha20Poly1305 | Self::Aes256Gcm | Self::Aes128Gcm => Err(Error::Cipher),
        }
    }

    pub(crate) fn decrypt(
        &self,
        state: &mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
        buffer: &mut [u8],
    ) -> Result<()> {
        match self {
            // A CTR keystream is its own inverse.
            Self::Aes256Ctr | Self::Aes192Ctr | Self::Aes128Ctr => {
                self.encrypt(state, key, iv, buffer)
            }
            Self::Aes256Cbc => {
                cbc_decrypt(keyed::<cbc::Decryptor<aes::Aes256>>(state, key, iv)?, buffer)
            }
            Self::Aes192Cbc => {
                cbc_decrypt(keyed::<cbc::Decryptor<aes::Aes192>>(state, key, iv)?, buffer)
            }
            Self::Aes128Cbc => {
                cbc_decrypt(keyed::<cbc::Decryptor<aes::Aes128>>(state, key, iv)?, buffer)
            }
            Self::TDesCbc => {
                cbc_decrypt(keyed::<cbc::Decryptor<des::TdesEde3>>(state, key, iv)?, buffer)
            }
            Self::None => Ok(()),
            Self::ChaCha20Poly1305 | Self::Aes256Gcm | Self::Aes128Gcm => Err(Error::Cipher),
        }
    }

    /// Seal an AEAD packet: returns the complete wire chunk, that is the
    /// (possibly encrypted) length field, the ciphertext and the tag.
    pub(crate) fn aead_seal(
        &self,
        state: &mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
        seq: u32,
        length: [u8; 4],
        body: &mut Vec<u8>,
    ) -> Result<Vec<u8>> {
        match self {
            Self::ChaCha20Poly1305 => {
                let (enc_length, poly_key) = chacha_header(key, seq, length)?;

                let (packet_key, _) = key.split_at(key.len() / 2);
                let mut main = chacha(packet_key, seq)?;
                main.seek(64u64);
                main.apply_keystream(body);

                let mut wire = Vec::with_capacity(4 + body.len() + TAG_SIZE);
                wire.extend_from_slice(&enc_length);
                wire.extend_from_slice(body);

                let tag =
                    Poly1305::new(poly1305::Key::from_slice(&poly_key)).compute_unpadded(&wire);
                wire.extend_from_slice(&tag);

                Ok(wire)
            }
            Self::Aes256Gcm => gcm_seal::<aes_gcm::Aes256Gcm>(state, key, iv, length, body),
            Self::Aes128Gcm => gcm_seal::<aes_gcm::Aes128Gcm>(state, key, iv, length, body),
            _ => Err(Error::Cipher),
        }
    }

    /// Recover the `packet_length` field of an incoming AEAD packet.
    pub(crate) fn aead_length(&self, key: &[u8], seq: u32, length: [u8; 4]) -> Result<u32> {
        match self {
            Self::ChaCha20Poly1305 => {
                let (_, length_key) = key.split_at(key.len() / 2);

                let mut length = length;
                chacha(length_key, seq)?.apply_keystream(&mut length);

                Ok(u32::from_be_bytes(length))
            }
            // The GCM length field travels in the clear, covered by the tag.
            Self::Aes256Gcm | Self::Aes128Gcm => Ok(u32::from_be_bytes(length)),
            _ => Err(Error::Cipher),
        }
    }

    /// Open an AEAD packet: verify the tag over the wire bytes, then
    /// decrypt `body` in place. `body` holds ciphertext followed by tag.
    pub(crate) fn aead_open(
        &self,
        state: &mut Option<CipherState>,
        key: &[u8],
        iv: &[u8],
        seq: u32,
        length: [u8; 4],
        body: &mut Vec<u8>,
    ) -> Result<()> {
        if body.len() < TAG_SIZE {
            return Err(Error::Cipher);
        }
        let tag_at = body.len() - TAG_SIZE;

        match self {
            Self::ChaCha20Poly1305 => {
                let (enc_length, poly_key) = chacha_header(key, seq, length)?;

                let expected = {
                    let mut signed = Vec::with_capacity(4 + tag_at);
                    signed.extend_from_slice(&enc_length);
                    signed.extend_from_slice(&body[..tag_at]);

                    Poly1305::new(poly1305::Key::from_slice(&poly_key)).compute_unpadded(&signed)
                };

                if !bool::from(expected.as_slice().ct_eq(&body[tag_at..])) {
                    return Err(digest::MacError.into());
                }

                body.truncate(tag_at);

                let (packet_key, _) = key.split_at(key.len() / 2);
                let mut main = chacha(packet_key, seq)?;
                main.seek(64u64);
                main.apply_keystream(body);

                Ok(())
            }
            Self::Aes256Gcm => gcm_open::<aes_gcm::Aes256Gcm>(state, key, iv, length, body),
            Self::Aes128Gcm => gcm_open::<aes_gcm::Aes128Gcm>(state, key, iv, length, body),
            _ => Err(Error::Cipher),
        }
    }

    pub(crate) fn is_aead(&self) -> bool {
        matches!(
            self,
            Self::ChaCha20Poly1305 | Self::Aes256Gcm | Self::Aes128Gcm
        )
    }

    pub(crate) fn tag_size(&self) -> usize {
        if self.is_aead() {
            TAG_SIZE
        } else {
            0
        }
    }

    /// The alignment unit of the padded region; never below 8.
    pub(crate) fn block_size(&self) -> usize {
        match self {
            Self::Aes128Gcm
            | Self::Aes256Gcm
            | Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr
            | Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc => 16,
            // Stream or 64-bit block: the protocol minimum applies.
            Self::ChaCha20Poly1305 | Self::TDesCbc | Self::None => 8,
        }
    }

    pub(crate) fn key_size(&self) -> usize {
        match self {
            // Two 32-byte halves: the packet key and the length key.
            Self::ChaCha20Poly1305 => 64,
            Self::Aes256Gcm | Self::Aes256Ctr | Self::Aes256Cbc => 32,
            Self::TDesCbc | Self::Aes192Ctr | Self::Aes192Cbc => 24,
            Self::Aes128Gcm | Self::Aes128Ctr | Self::Aes128Cbc => 16,
            Self::None => 0,
        }
    }

    pub(crate) fn iv_size(&self) -> usize {
        match self {
            Self::Aes128Ctr
            | Self::Aes192Ctr
            | Self::Aes256Ctr
            | Self::Aes128Cbc
            | Self::Aes192Cbc
            | Self::Aes256Cbc => 16,
            Self::Aes128Gcm | Self::Aes256Gcm => 12,
            Self::TDesCbc => 8,
            // The chacha nonce is the sequence number itself.
            Self::ChaCha20Poly1305 | Self::None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back() {
        for name in [
            "chacha20-poly1305@openssh.com",
            "aes256-gcm@openssh.com",
            "aes128-gcm@openssh.com",
            "aes256-ctr",
            "aes128-cbc",
            "3des-cbc",
            "none",
        ] {
            let cipher: Cipher = name.parse().expect("known name");
            assert_eq!(cipher.as_ref(), name);
        }
    }

    #[test]
    fn ctr_roundtrip_continues_the_keystream() {
        let cipher = Cipher::Aes128Ctr;
        let key = [0x0au8; 16];
        let iv = [0x0bu8; 16];

        let mut tx_state = None;
        let mut rx_state = None;

        for seq in 0..3u8 {
            let plain = vec![seq; 24];

            let mut wire = plain.clone();
            cipher
                .encrypt(&mut tx_state, &key, &iv, &mut wire)
                .expect("encryptable");
            assert_ne!(wire, plain);

            cipher
                .decrypt(&mut rx_state, &key, &iv, &mut wire)
                .expect("decryptable");
            assert_eq!(wire, plain);
        }
    }

    #[test]
    fn cbc_roundtrip_and_alignment() {
        let cipher = Cipher::Aes256Cbc;
        let key = [0x21u8; 32];
        let iv = [0x22u8; 16];

        let plain = vec![0x5au8; 48];
        let mut wire = plain.clone();

        cipher
            .encrypt(&mut None, &key, &iv, &mut wire)
            .expect("encryptable");
        cipher
            .decrypt(&mut None, &key, &iv, &mut wire)
            .expect("decryptable");
        assert_eq!(wire, plain);

        // A ragged buffer is a framing bug, not something to pad over.
        let mut ragged = vec![0u8; 17];
        assert!(cipher.encrypt(&mut None, &key, &iv, &mut ragged).is_err());
    }

    #[test]
    fn chacha_seal_open_roundtrip() {
        let cipher = Cipher::ChaCha20Poly1305;
        let key = [0x42u8; 64];

        let body = b"\x04some payload\x00\x00\x00\x00".to_vec();
        let length = (body.len() as u32).to_be_bytes();

        let mut sealed_body = body.clone();
        let wire = cipher
            .aead_seal(&mut None, &key, &[], 7, length, &mut sealed_body)
            .expect("sealable");

        let mut enc_length = [0u8; 4];
        enc_length.copy_from_slice(&wire[..4]);
        assert_eq!(
            cipher.aead_length(&key, 7, enc_length).expect("decodable"),
            body.len() as u32
        );

        let mut received = wire[4..].to_vec();
        cipher
            .aead_open(&mut None, &key, &[], 7, enc_length, &mut received)
            .expect("authentic");
        assert_eq!(received, body);
    }

    #[test]
    fn chacha_rejects_tampering() {
        let cipher = Cipher::ChaCha20Poly1305;
        let key = [0x42u8; 64];

        let mut body = vec![0u8; 16];
        let length = (body.len() as u32).to_be_bytes();
        let wire = cipher
            .aead_seal(&mut None, &key, &[], 0, length, &mut body)
            .expect("sealable");

        let mut enc_length = [0u8; 4];
        enc_length.copy_from_slice(&wire[..4]);

        let mut received = wire[4..].to_vec();
        received[0] ^= 0x01;

        assert!(cipher
            .aead_open(&mut None, &key, &[], 0, enc_length, &mut received)
            .is_err());
    }

    #[test]
    fn gcm_nonce_advances_per_packet() {
        let cipher = Cipher::Aes256Gcm;
        let key = [0x17u8; 32];
        let iv = [0x01u8; 12];

        let mut seal_state = None;
        let mut open_state = None;

        for seq in 0..3u32 {
            let mut body = format!("packet #{seq}").into_bytes();
            body.resize(16, 0);
            let length = (body.len() as u32).to_be_bytes();

            let plain = body.clone();
            let wire = cipher
                .aead_seal(&mut seal_state, &key, &iv, seq, length, &mut body)
                .expect("sealable");

            let mut received = wire[4..].to_vec();
            cipher
                .aead_open(&mut open_state, &key, &iv, seq, length, &mut received)
                .expect("authentic");
            assert_eq!(received, plain);
        }
    }
}
