use digest::Digest;

use crate::wire::MpInt;

/// The inputs of the exchange hash `H`.
///
/// The exchange values and the shared secret are taken pre-encoded in
/// their wire framing (string for the ECDH family and the ML-KEM hybrid,
/// mpint for finite-field DH), since mixing the two framings breaks
/// interop silently.
#[derive(Clone, Copy)]
pub(crate) struct Exchange<'e> {
    /// Client identification string, without CRLF.
    pub v_c: &'e [u8],

    /// Server identification string, without CRLF.
    pub v_s: &'e [u8],

    /// Client `SSH_MSG_KEXINIT` payload, byte-exact as transmitted.
    pub i_c: &'e [u8],

    /// Server `SSH_MSG_KEXINIT` payload, byte-exact as transmitted.
    pub i_s: &'e [u8],

    /// Server host key blob.
    pub k_s: &'e [u8],

    /// Client exchange value, wire-framed.
    pub q_c: &'e [u8],

    /// Server exchange value, wire-framed.
    pub q_s: &'e [u8],

    /// Shared secret, wire-framed.
    pub k: &'e [u8],
}

impl Exchange<'_> {
    pub fn hash<D: Digest>(&self) -> Vec<u8> {
        D::new()
            .chain_update(string(self.v_c))
            .chain_update(string(self.v_s))
            .chain_update(string(self.i_c))
            .chain_update(string(self.i_s))
            .chain_update(string(self.k_s))
            .chain_update(self.q_c)
            .chain_update(self.q_s)
            .chain_update(self.k)
            .finalize()
            .to_vec()
    }
}

/// Frame raw bytes as an SSH string.
pub(crate) fn string(data: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(4 + data.len());
    wire.extend_from_slice(&(data.len() as u32).to_be_bytes());
    wire.extend_from_slice(data);

    wire
}

/// Frame an mpint, with its length prefix.
pub(crate) fn mpint(value: &MpInt) -> Vec<u8> {
    string(value.as_bytes())
}

#[cfg(test)]
mod tests {
    use sha2::Sha256;

    use super::*;

    #[test]
    fn every_field_is_bound() {
        let base = Exchange {
            v_c: b"SSH-2.0-client",
            v_s: b"SSH-2.0-server",
            i_c: b"\x14client-kexinit",
            i_s: b"\x14server-kexinit",
            k_s: b"hostkey-blob",
            q_c: b"\x00\x00\x00\x01c",
            q_s: b"\x00\x00\x00\x01s",
            k: b"\x00\x00\x00\x01k",
        };
        let reference = base.hash::<Sha256>();

        let tweaked = Exchange {
            v_c: b"SSH-2.0-client2",
            ..base
        };
        assert_ne!(tweaked.hash::<Sha256>(), reference);

        let tweaked = Exchange {
            k: b"\x00\x00\x00\x01x",
            ..base
        };
        assert_ne!(tweaked.hash::<Sha256>(), reference);
    }
}
