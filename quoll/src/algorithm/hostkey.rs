//! Host-key algorithm negotiation over [`ssh_key::Algorithm`].

use ssh_key::{Algorithm, HashAlg, PrivateKey};

use crate::{wire::msg::KexInit, Error, Result};

pub(crate) fn negotiate(clientkex: &KexInit, serverkex: &KexInit) -> Result<Algorithm> {
    super::pick(
        &clientkex.server_host_key_algorithms,
        &serverkex.server_host_key_algorithms,
        Error::NoCommonKey,
    )
}

/// The signature algorithm a key is advertised (and signs) as.
///
/// RSA keys always sign as `rsa-sha2-512` here, so the plain `ssh-rsa`
/// SHA-1 identifier is never put on the wire.
pub(crate) fn advertised(key: &PrivateKey) -> Algorithm {
    match key.algorithm() {
        Algorithm::Rsa { .. } => Algorithm::Rsa {
            hash: Some(HashAlg::Sha512),
        },
        algorithm => algorithm,
    }
}

/// Whether a signature produced under `signed` satisfies the negotiated
/// algorithm, treating the RSA SHA-2 identifiers as one family.
pub(crate) fn matches(negotiated: &Algorithm, signed: &Algorithm) -> bool {
    match (negotiated, signed) {
        (Algorithm::Rsa { .. }, Algorithm::Rsa { .. }) => true,
        (negotiated, signed) => negotiated == signed,
    }
}
