#![doc = concat!(
    "[![crates.io](https://img.shields.io/crates/v/", env!("CARGO_PKG_NAME"), ")](https://crates.io/crates/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "[![docs.rs](https://img.shields.io/docsrs/", env!("CARGO_PKG_NAME"), ")](https://docs.rs/", env!("CARGO_PKG_NAME"), ")",
    " ",
    "![license](https://img.shields.io/crates/l/", env!("CARGO_PKG_NAME"), ")"
)]
#![doc = ""]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! ### Supported algorithms
//!
//! #### Key-exchange:
//! see [`kex::Kex`].
//!
//! #### Encryption:
//! see [`algorithm::Cipher`].
//!
//! #### MACs:
//! see [`algorithm::Hmac`].
//!
//! #### Compression:
//! see [`algorithm::Compress`].

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

use futures::{AsyncRead, AsyncWrite};

mod error;
pub use error::{DisconnectedBy, DisconnectedError, Error, Result};

pub mod algorithm;
pub mod kex;
pub mod random;
pub mod wire;

pub mod stream;

pub mod service;
pub mod session;
pub use session::Session;

pub mod side;

/// Any bidirectional byte stream a [`Session`] can be established over.
pub trait Pipe: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Pipe for T {}
