use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use rand::Rng;
use secrecy::ExposeSecret;

use crate::{
    algorithm::{Cipher, CipherState, Compress, Deflater, Hmac, Inflater},
    wire::{Packet, WireError, PACKET_MAX_SIZE},
    Result,
};

use super::Keys;

/// The two directions of the transport, flipped independently at each
/// side's `SSH_MSG_NEWKEYS`.
#[derive(Debug, Default)]
pub struct TransportPair {
    pub(crate) tx: Transport,
    pub(crate) rx: Transport,
}

/// One direction of the transport: negotiated algorithms, live cipher and
/// compression state, and derived keys.
#[derive(Default)]
pub struct Transport {
    pub(crate) compress: Compress,
    pub(crate) cipher: Cipher,
    pub(crate) hmac: Hmac,

    pub(crate) state: Option<CipherState>,
    pub(crate) chain: Keys,

    deflate: Option<Deflater>,
    inflate: Option<Inflater>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("compress", &self.compress)
            .field("cipher", &self.cipher)
            .field("hmac", &self.hmac)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(compress: Compress, cipher: Cipher, hmac: Hmac, chain: Keys) -> Self {
        Self {
            compress,
            cipher,
            hmac,
            state: None,
            chain,
            deflate: None,
            inflate: None,
        }
    }

    pub fn block_size(&self) -> usize {
        self.cipher.block_size().max(8)
    }

    /// Whether the 4-byte length field stays out of the padded region,
    /// which is the case when it is protected separately (AEAD) or
    /// travels in the clear under the MAC (encrypt-then-MAC).
    fn length_excluded(&self) -> bool {
        self.cipher.is_aead() || self.hmac.etm()
    }

    fn padding(&self, payload: usize) -> u8 {
        const MIN_PAD_SIZE: usize = 4;

        let align = self.block_size();

        let size = if self.length_excluded() {
            std::mem::size_of::<u8>() + payload
        } else {
            std::mem::size_of::<u32>() + std::mem::size_of::<u8>() + payload
        };
        let padding = align - size % align;

        let padding = if padding < MIN_PAD_SIZE {
            padding + align
        } else {
            padding
        };

        if size + padding < align.max(Packet::MIN_SIZE) {
            (padding + align) as u8
        } else {
            padding as u8
        }
    }

    fn validate_length(&self, length: u32) -> Result<usize, WireError> {
        let length = length as usize;

        if !(5..=PACKET_MAX_SIZE).contains(&length) {
            return Err(WireError::BadPacket);
        }

        let aligned = if self.length_excluded() {
            length % self.block_size() == 0
        } else {
            (length + 4) % self.block_size() == 0
        };
        if !aligned {
            return Err(WireError::BadPacket);
        }

        Ok(length)
    }

    /// Frame, compress, encrypt and authenticate one outbound packet.
    pub async fn write_packet<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &mut W,
        packet: &Packet,
        seq: u32,
        authed: bool,
    ) -> Result<usize> {
        let payload = self
            .compress
            .compress(&mut self.deflate, authed, &packet.payload)?;

        let padding = self.padding(payload.len());
        let mut body = Vec::with_capacity(1 + payload.len() + padding as usize);
        body.push(padding);
        body.extend_from_slice(&payload);
        body.resize_with(body.len() + padding as usize, || rand::thread_rng().gen());

        let sent = if self.cipher.is_aead() {
            let length = (body.len() as u32).to_be_bytes();
            let wire = self.cipher.aead_seal(
                &mut self.state,
                self.chain.key.expose_secret(),
                self.chain.iv.expose_secret(),
                seq,
                length,
                &mut body,
            )?;

            writer.write_all(&wire).await?;

            wire.len()
        } else if self.hmac.etm() {
            let length = (body.len() as u32).to_be_bytes();

            self.cipher.encrypt(
                &mut self.state,
                self.chain.key.expose_secret(),
                self.chain.iv.expose_secret(),
                &mut body,
            )?;

            let mut wire = Vec::with_capacity(4 + body.len());
            wire.extend_from_slice(&length);
            wire.extend_from_slice(&body);

            let mac = self
                .hmac
                .sign(seq, &wire, self.chain.hmac.expose_secret());

            writer.write_all(&wire).await?;
            writer.write_all(&mac).await?;

            wire.len() + mac.len()
        } else {
            let mut wire = Vec::with_capacity(4 + body.len());
            wire.extend_from_slice(&(body.len() as u32).to_be_bytes());
            wire.extend_from_slice(&body);

            // The classic MAC covers the plaintext, before encryption.
            let mac = self
                .hmac
                .sign(seq, &wire, self.chain.hmac.expose_secret());

            self.cipher.encrypt(
                &mut self.state,
                self.chain.key.expose_secret(),
                self.chain.iv.expose_secret(),
                &mut wire,
            )?;

            writer.write_all(&wire).await?;
            writer.write_all(&mac).await?;

            wire.len() + mac.len()
        };

        Ok(sent)
    }

    /// Read, authenticate, decrypt and decompress one inbound packet,
    /// also reporting its size on the wire for the re-key accounting.
    ///
    /// The integrity tag is always verified before any decrypted byte is
    /// interpreted.
    pub async fn read_packet<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
        seq: u32,
        authed: bool,
    ) -> Result<(Packet, usize)> {
        let (body, wire) = if self.cipher.is_aead() {
            let mut length = [0u8; 4];
            reader.read_exact(&mut length).await?;

            let decoded = self
                .cipher
                .aead_length(self.chain.key.expose_secret(), seq, length)?;
            let size = self.validate_length(decoded)?;

            let mut body = vec![0u8; size + self.cipher.tag_size()];
            reader.read_exact(&mut body).await?;

            self.cipher.aead_open(
                &mut self.state,
                self.chain.key.expose_secret(),
                self.chain.iv.expose_secret(),
                seq,
                length,
                &mut body,
            )?;

            (body, 4 + size + self.cipher.tag_size())
        } else if self.hmac.etm() {
            let mut length = [0u8; 4];
            reader.read_exact(&mut length).await?;

            let size = self.validate_length(u32::from_be_bytes(length))?;

            let mut body = vec![0u8; size];
            reader.read_exact(&mut body).await?;
            let mut mac = vec![0u8; self.hmac.size()];
            reader.read_exact(&mut mac).await?;

            let mut signed = Vec::with_capacity(4 + body.len());
            signed.extend_from_slice(&length);
            signed.extend_from_slice(&body);
            self.hmac
                .verify(seq, &signed, self.chain.hmac.expose_secret(), &mac)?;

            self.cipher.decrypt(
                &mut self.state,
                self.chain.key.expose_secret(),
                self.chain.iv.expose_secret(),
                &mut body,
            )?;

            (body, 4 + size + self.hmac.size())
        } else {
            // Peek a single block to learn the encrypted length field.
            let mut first = vec![0u8; self.block_size()];
            reader.read_exact(&mut first).await?;

            self.cipher.decrypt(
                &mut self.state,
                self.chain.key.expose_secret(),
                self.chain.iv.expose_secret(),
                &mut first,
            )?;

            let mut length = [0u8; 4];
            length.copy_from_slice(&first[..4]);
            let size = self.validate_length(u32::from_be_bytes(length))?;

            let mut rest = vec![0u8; size + 4 - first.len()];
            reader.read_exact(&mut rest).await?;
            self.cipher.decrypt(
                &mut self.state,
                self.chain.key.expose_secret(),
                self.chain.iv.expose_secret(),
                &mut rest,
            )?;

            let mut plain = first;
            plain.append(&mut rest);

            let mut mac = vec![0u8; self.hmac.size()];
            reader.read_exact(&mut mac).await?;
            self.hmac
                .verify(seq, &plain, self.chain.hmac.expose_secret(), &mac)?;

            plain.drain(..4);
            (plain, 4 + size + self.hmac.size())
        };

        let padding = *body.first().ok_or(WireError::BadPacket)? as usize;
        if padding < 4 || padding + 1 >= body.len() {
            return Err(WireError::BadPacket.into());
        }

        let payload = body[1..body.len() - padding].to_vec();
        let payload = self
            .compress
            .decompress(&mut self.inflate, authed, payload)?;

        Ok((Packet { payload }, wire))
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use secrecy::SecretBox;

    use super::*;

    fn transport(cipher: Cipher, hmac: Hmac) -> Transport {
        let key_size = cipher.key_size().max(1);
        let iv_size = cipher.iv_size().max(1);
        let mac_size = hmac.size().max(1);

        Transport {
            compress: Compress::None,
            cipher,
            hmac,
            state: None,
            chain: Keys {
                iv: SecretBox::new(Box::new((1..=iv_size as u8).collect::<Vec<u8>>())),
                key: SecretBox::new(Box::new((1..=key_size as u8).collect::<Vec<u8>>())),
                hmac: SecretBox::new(Box::new(vec![0x0f; mac_size])),
            },
            deflate: None,
            inflate: None,
        }
    }

    fn roundtrip(cipher: Cipher, hmac: Hmac) {
        block_on(async {
            let mut tx = transport(cipher.clone(), hmac.clone());
            let mut rx = transport(cipher, hmac);

            let mut wire = Vec::new();
            let mut sent = 0;
            for seq in 0..4u32 {
                let packet = Packet {
                    payload: format!("payload number {seq}").into_bytes(),
                };
                sent += tx
                    .write_packet(&mut wire, &packet, seq, false)
                    .await
                    .expect("writable");
            }

            // The reported wire sizes account for every byte emitted.
            assert_eq!(sent, wire.len());

            let mut reader = futures::io::Cursor::new(wire);
            let mut received = 0;
            for seq in 0..4u32 {
                let (packet, wire) = rx
                    .read_packet(&mut reader, seq, false)
                    .await
                    .expect("readable");
                assert_eq!(packet.payload, format!("payload number {seq}").into_bytes());
                received += wire;
            }
            assert_eq!(received, sent);
        });
    }

    #[test]
    fn roundtrip_plain() {
        roundtrip(Cipher::None, Hmac::None);
    }

    #[test]
    fn roundtrip_ctr_hmac() {
        roundtrip(Cipher::Aes128Ctr, Hmac::HmacSha256);
    }

    #[test]
    fn roundtrip_cbc_etm() {
        roundtrip(Cipher::Aes256Cbc, Hmac::HmacSha512ETM);
    }

    #[test]
    fn roundtrip_chacha() {
        roundtrip(Cipher::ChaCha20Poly1305, Hmac::None);
    }

    #[test]
    fn roundtrip_gcm() {
        roundtrip(Cipher::Aes256Gcm, Hmac::None);
    }

    #[test]
    fn padding_aligns_every_mode() {
        for (cipher, hmac) in [
            (Cipher::None, Hmac::None),
            (Cipher::Aes128Ctr, Hmac::HmacSha1),
            (Cipher::Aes256Cbc, Hmac::HmacSha256ETM),
            (Cipher::ChaCha20Poly1305, Hmac::None),
            (Cipher::Aes128Gcm, Hmac::None),
        ] {
            let transport = transport(cipher, hmac);

            for payload in [0usize, 1, 7, 8, 255, 256, 1000] {
                let padding = transport.padding(payload) as usize;
                assert!((4..=255).contains(&padding));

                let size = if transport.length_excluded() {
                    1 + payload + padding
                } else {
                    4 + 1 + payload + padding
                };
                assert_eq!(size % transport.block_size(), 0);
            }
        }
    }

    #[test]
    fn bitflip_is_detected_before_parsing() {
        block_on(async {
            let mut tx = transport(Cipher::Aes128Ctr, Hmac::HmacSha256);
            let mut rx = transport(Cipher::Aes128Ctr, Hmac::HmacSha256);

            let mut wire = Vec::new();
            tx.write_packet(
                &mut wire,
                &Packet {
                    payload: b"sensitive".to_vec(),
                },
                0,
                false,
            )
            .await
            .expect("writable");

            // Corrupt one ciphertext byte past the length block.
            let at = wire.len() / 2;
            wire[at] ^= 0x80;

            let mut reader = futures::io::Cursor::new(wire);
            assert!(matches!(
                rx.read_packet(&mut reader, 0, false).await,
                Err(crate::Error::Integrity(_))
            ));
        });
    }
}
