use quoll::wire::msg::ChannelOpenFailureReason;
use thiserror::Error;

/// The error types that can occur when manipulating this crate.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error.
    #[error(transparent)]
    Transport(#[from] quoll::Error),

    /// The peer refused to open the channel.
    #[error("Peer refused the opening of the channel: {message} ({reason:?})")]
    ChannelOpenFailure {
        /// The reason for failure.
        reason: ChannelOpenFailureReason,

        /// A textual message to accompany the reason.
        message: String,
    },

    /// The referenced channel has been closed or never existed locally.
    #[error("The channel has been closed")]
    ChannelClosed,

    /// The channel type is not registered on our side.
    #[error("The channel type `{0}` is not registered")]
    UnknownChannelType(String),

    /// The peer broke the channel protocol; fatal to the session.
    #[error("Protocol violation on the channel layer: {0}")]
    Protocol(String),
}

impl From<quoll::wire::WireError> for Error {
    fn from(err: quoll::wire::WireError) -> Self {
        Self::Transport(err.into())
    }
}

impl From<quoll::DisconnectedError> for Error {
    fn from(err: quoll::DisconnectedError) -> Self {
        Self::Transport(err.into())
    }
}

/// A handy [`std::result::Result`] type alias bounding the [`enum@Error`] struct as `E`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
