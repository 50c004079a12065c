//! Negotiable transport algorithms: encryption, integrity and compression.
//!
//! Each category is an ordered table; negotiation picks, for every
//! category, the first client-preferred name that the server also lists.

use std::str::FromStr;

use crate::{
    wire::NameList,
    Error, Result,
};

mod cipher;
pub use cipher::Cipher;
pub(crate) use cipher::{negotiate as negotiate_cipher, CipherState};

mod compress;
pub use compress::Compress;
pub(crate) use compress::{negotiate as negotiate_compress, Deflater, Inflater};

mod hmac;
pub use hmac::Hmac;
pub(crate) use hmac::negotiate as negotiate_hmac;

pub(crate) mod hostkey;

/// Resolve one category: the client's first name the server also lists,
/// parsed into its algorithm type. `missing` is returned when the lists
/// do not intersect, an unparseable winner is [`Error::UnsupportedAlgorithm`].
pub(crate) fn pick<A: FromStr>(client: &NameList, server: &NameList, missing: Error) -> Result<A> {
    client
        .preferred_in(server)
        .ok_or(missing)?
        .parse()
        .map_err(|_| Error::UnsupportedAlgorithm)
}
