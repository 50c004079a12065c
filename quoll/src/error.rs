//! Collection of error handling types and aliases.

use thiserror::Error;

use crate::wire::{DisconnectReason, WireError};

/// The disconnection side for [`DisconnectedError`].
#[derive(Debug, Clone)]
pub enum DisconnectedBy {
    /// The session has been disconnected by _us_.
    Us,

    /// The session has been disconnected by _them_.
    Them,
}

/// The error type describing disconnect.
#[must_use]
#[derive(Debug, Error, Clone)]
#[error("The session has been disconnected by {by:?} for {reason:?}: {description}")]
pub struct DisconnectedError {
    /// Side that sent the disconnect message.
    pub by: DisconnectedBy,

    /// Reason for disconnect.
    pub reason: DisconnectReason,

    /// Description of the disconnect reason.
    pub description: String,
}

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// I/O Error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Binary (de)-serialization error.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// SSH Key error.
    #[error(transparent)]
    Key(#[from] ssh_key::Error),

    /// Packet integrity error.
    #[error(transparent)]
    Integrity(#[from] digest::MacError),

    /// Signature error during the key-exchange.
    #[error(transparent)]
    Signature(#[from] signature::Error),

    /// No common kex algorithm found between both sides.
    #[error("Unable to negotiate a common kex algorithm")]
    NoCommonKex,

    /// No common key algorithm found between both sides.
    #[error("Unable to negotiate a common host key algorithm")]
    NoCommonKey,

    /// No common cipher algorithm found between both sides.
    #[error("Unable to negotiate a common encryption algorithm")]
    NoCommonCipher,

    /// No common hmac algorithm found between both sides.
    #[error("Unable to negotiate a common HMAC algorithm")]
    NoCommonHmac,

    /// No common compression algorithm found between both sides.
    #[error("Unable to negotiate a common compression algorithm")]
    NoCommonCompression,

    /// A negotiated algorithm name is not implemented on our side.
    #[error("The negotiated algorithm is unsupported")]
    UnsupportedAlgorithm,

    /// Protocol error in the key-exchange.
    #[error("Error in the key-exchange procedure")]
    KexError,

    /// Error while encrypting or decrypting messages.
    #[error("The cipher ended up in an error")]
    Cipher,

    /// Error while compressing or decompressing messages.
    #[error("The compression layer ended up in an error")]
    Compression,

    /// The message received was unexpected in the current context.
    #[error("Peer sent a message that made no sense in the current context")]
    UnexpectedMessage,

    /// The requested or accepted service is unknown.
    #[error("The requested service is unknown to us")]
    UnknownService,

    /// The entropy source failed to produce seed material.
    #[error("The random source could not be seeded")]
    RandomSource,

    /// The session has been disconnected.
    #[error(transparent)]
    Disconnected(#[from] DisconnectedError),
}

impl Error {
    /// The disconnect reason to advertise before tearing down, for errors
    /// that are fatal to the whole session.
    pub(crate) fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            Self::Integrity(_) => Some(DisconnectReason::MacError),
            Self::Compression => Some(DisconnectReason::CompressionError),
            Self::Wire(_) | Self::UnexpectedMessage | Self::KexError | Self::Cipher => {
                Some(DisconnectReason::ProtocolError)
            }
            Self::NoCommonKex
            | Self::NoCommonKey
            | Self::NoCommonCipher
            | Self::NoCommonHmac
            | Self::NoCommonCompression
            | Self::UnsupportedAlgorithm
            | Self::Signature(_)
            | Self::Key(_) => Some(DisconnectReason::KeyExchangeFailed),
            _ => None,
        }
    }
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_map_to_their_reason_codes() {
        assert_eq!(
            Error::Integrity(digest::MacError).disconnect_reason(),
            Some(DisconnectReason::MacError),
        );
        assert_eq!(
            Error::UnexpectedMessage.disconnect_reason(),
            Some(DisconnectReason::ProtocolError),
        );
        assert_eq!(
            Error::NoCommonKex.disconnect_reason(),
            Some(DisconnectReason::KeyExchangeFailed),
        );

        // I/O problems are not advertised, the transport is already gone.
        assert_eq!(
            Error::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof)).disconnect_reason(),
            None,
        );
    }
}
