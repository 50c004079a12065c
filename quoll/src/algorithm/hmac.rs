use digest::MacError;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use strum::{AsRefStr, EnumString};
use subtle::ConstantTimeEq;

use crate::{wire::msg::KexInit, Error, Result};

pub(crate) fn negotiate(clientkex: &KexInit, serverkex: &KexInit) -> Result<(Hmac, Hmac)> {
    Ok((
        super::pick(
            &clientkex.mac_algorithms_client_to_server,
            &serverkex.mac_algorithms_client_to_server,
            Error::NoCommonHmac,
        )?,
        super::pick(
            &clientkex.mac_algorithms_server_to_client,
            &serverkex.mac_algorithms_server_to_client,
            Error::NoCommonHmac,
        )?,
    ))
}

/// SSH hmac algorithms.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, EnumString, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum Hmac {
    /// HMAC with sha-2-512 digest on encrypted message.
    #[strum(serialize = "hmac-sha2-512-etm@openssh.com")]
    HmacSha512ETM,

    /// HMAC with sha-2-256 digest on encrypted message.
    #[strum(serialize = "hmac-sha2-256-etm@openssh.com")]
    HmacSha256ETM,

    /// HMAC with sha-2-512 digest.
    #[strum(serialize = "hmac-sha2-512")]
    HmacSha512,

    /// HMAC with sha-2-256 digest.
    #[strum(serialize = "hmac-sha2-256")]
    HmacSha256,

    /// HMAC with sha-1 digest on encrypted message.
    #[strum(serialize = "hmac-sha1-etm@openssh.com")]
    HmacSha1ETM,

    /// HMAC with sha-1 digest.
    HmacSha1,

    /// HMAC with md5 digest on encrypted message.
    #[strum(serialize = "hmac-md5-etm@openssh.com")]
    HmacMd5ETM,

    /// HMAC with md5 digest.
    HmacMd5,

    /// No HMAC algorithm.
    #[default]
    None,
}

/// `HMAC(key, seq || data)`, the integrity construction of RFC 4253 §6.4.
fn tag<M: digest::Mac + digest::KeyInit>(seq: u32, data: &[u8], key: &[u8]) -> Vec<u8> {
    let mut mac = <M as digest::Mac>::new_from_slice(key).expect("hmac accepts any key length");

    digest::Mac::update(&mut mac, &seq.to_be_bytes());
    digest::Mac::update(&mut mac, data);

    mac.finalize().into_bytes().to_vec()
}

impl Hmac {
    pub(crate) fn sign(&self, seq: u32, buf: &[u8], key: &[u8]) -> Vec<u8> {
        match self {
            Self::HmacSha512ETM | Self::HmacSha512 => tag::<hmac::Hmac<Sha512>>(seq, buf, key),
            Self::HmacSha256ETM | Self::HmacSha256 => tag::<hmac::Hmac<Sha256>>(seq, buf, key),
            Self::HmacSha1ETM | Self::HmacSha1 => tag::<hmac::Hmac<Sha1>>(seq, buf, key),
            Self::HmacMd5ETM | Self::HmacMd5 => tag::<hmac::Hmac<Md5>>(seq, buf, key),
            Self::None => Vec::new(),
        }
    }

    /// Recompute the tag and compare in constant time.
    pub(crate) fn verify(
        &self,
        seq: u32,
        buf: &[u8],
        key: &[u8],
        mac: &[u8],
    ) -> Result<(), MacError> {
        if matches!(self, Self::None) {
            return Ok(());
        }

        let expected = self.sign(seq, buf, key);
        // Tags are fixed-width per algorithm; a length mismatch cannot
        // leak anything about the content.
        if expected.len() == mac.len() && bool::from(expected.as_slice().ct_eq(mac)) {
            Ok(())
        } else {
            Err(MacError)
        }
    }

    /// Width of the transmitted tag; no truncated `-96` variants are
    /// offered.
    pub(crate) fn size(&self) -> usize {
        match self {
            Self::HmacSha512ETM | Self::HmacSha512 => 64,
            Self::HmacSha256ETM | Self::HmacSha256 => 32,
            Self::HmacSha1ETM | Self::HmacSha1 => 20,
            Self::HmacMd5ETM | Self::HmacMd5 => 16,
            Self::None => 0,
        }
    }

    /// Whether the MAC covers the ciphertext (encrypt-then-MAC) rather
    /// than the plaintext; encoded in the algorithm name suffix.
    pub(crate) fn etm(&self) -> bool {
        self.as_ref().ends_with("-etm@openssh.com")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify() {
        let key = [0xabu8; 32];
        let mac = Hmac::HmacSha256.sign(3, b"packet bytes", &key);

        assert_eq!(mac.len(), Hmac::HmacSha256.size());
        assert!(Hmac::HmacSha256.verify(3, b"packet bytes", &key, &mac).is_ok());

        // Both a bitflip and a wrong sequence number must fail.
        assert!(Hmac::HmacSha256.verify(4, b"packet bytes", &key, &mac).is_err());
        assert!(Hmac::HmacSha256.verify(3, b"packet bytez", &key, &mac).is_err());

        // So must a short tag.
        assert!(Hmac::HmacSha256
            .verify(3, b"packet bytes", &key, &mac[..16])
            .is_err());
    }

    #[test]
    fn etm_follows_the_name() {
        assert!(Hmac::HmacSha256ETM.etm());
        assert!(Hmac::HmacMd5ETM.etm());
        assert!(!Hmac::HmacSha512.etm());
        assert!(!Hmac::None.etm());
    }

    #[test]
    fn tag_widths() {
        assert_eq!(Hmac::HmacSha512ETM.size(), 64);
        assert_eq!(Hmac::HmacSha1.size(), 20);
        assert_eq!(Hmac::HmacMd5.size(), 16);
        assert_eq!(Hmac::None.size(), 0);
        assert_eq!(Hmac::None.sign(0, b"", &[]), Vec::<u8>::new());
    }
}
