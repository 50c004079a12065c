#![doc = concat!(
    "[![docs.rs](https://img.shields.io/docsrs/", env!("CARGO_PKG_NAME"), ")](https://docs.rs/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "[![crates.io](https://img.shields.io/crates/l/", env!("CARGO_PKG_NAME"), ")](https://crates.io/crates/", env!("CARGO_PKG_NAME"), ")"
)]
#![doc = ""]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    clippy::unwrap_used,
    clippy::panic,
    clippy::unimplemented,
    clippy::todo,
    clippy::undocumented_unsafe_blocks
)]
#![forbid(unsafe_code)]

const SERVICE_NAME: &str = "ssh-userauth";

mod methods;
pub use methods::Methods;

pub mod client;
pub mod server;

/// Build the blob a `publickey` authentication signature covers, per
/// RFC 4252 §7: the session identifier bound to the request fields.
pub(crate) fn publickey_signed_blob(
    session_id: &[u8],
    username: &str,
    service_name: &str,
    algorithm: &str,
    blob: &[u8],
) -> Result<Vec<u8>, quoll::wire::WireError> {
    let mut buffer = quoll::wire::Buffer::new(
        4 * 6 + 1 + 1 + session_id.len() + username.len() + service_name.len()
            + "publickey".len()
            + algorithm.len()
            + blob.len(),
    )?;

    buffer.put_string(session_id)?;
    buffer.put_u8(50)?; // SSH_MSG_USERAUTH_REQUEST
    buffer.put_string(username.as_bytes())?;
    buffer.put_string(service_name.as_bytes())?;
    buffer.put_string(b"publickey")?;
    buffer.put_bool(true)?;
    buffer.put_string(algorithm.as_bytes())?;
    buffer.put_string(blob)?;

    Ok(buffer.into_payload())
}
