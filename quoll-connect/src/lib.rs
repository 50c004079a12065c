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

use std::time::Duration;

use quoll::{session::Session, side::Side, Pipe};

const SERVICE_NAME: &str = "ssh-connection";

/// The biggest `SSH_MSG_CHANNEL_DATA` chunk we accept or emit.
const MAXIMUM_PACKET_SIZE: u32 = 32768; // 32KiB

/// The receive window we grant a peer on every channel.
const INITIAL_WINDOW_SIZE: u32 = 8 * MAXIMUM_PACKET_SIZE;

mod connect;
pub use connect::Connect;

pub mod channel;
pub use channel::{Channel, ChannelType, Open, OpenRequest, Outgoing, Priority, Streams};

mod error;
pub use error::{Error, Result};

/// The `ssh-connection` service, usable both as a server-side
/// [`quoll::service::Handler`] and a client-side
/// [`quoll::service::Request`].
#[derive(Default)]
pub struct Service {
    types: Vec<Box<dyn ChannelType>>,
    keepalive: Option<Duration>,
    idle: Option<Duration>,
}

impl Service {
    /// Create the service with an empty channel-type registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel type; peers opening an unregistered type are
    /// answered with `SSH_OPEN_UNKNOWN_CHANNEL_TYPE`.
    pub fn register(mut self, channel_type: impl ChannelType + 'static) -> Self {
        self.types.push(Box::new(channel_type));

        self
    }

    /// Emit a keepalive global request after `interval` without traffic.
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.keepalive = Some(interval);

        self
    }

    /// Disconnect after `timeout` without any traffic.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle = Some(timeout);

        self
    }

    fn build<I: Pipe, S: Side>(&mut self, session: Session<I, S>) -> Connect<I, S> {
        Connect::new(
            session,
            std::mem::take(&mut self.types),
            self.keepalive,
            self.idle,
        )
    }
}

impl quoll::service::Handler for Service {
    type Err = Error;
    type Ok<I: Pipe, S: Side> = Connect<I, S>;

    const SERVICE_NAME: &'static str = SERVICE_NAME;

    async fn on_request<I: Pipe, S: Side>(
        &mut self,
        session: Session<I, S>,
    ) -> Result<Self::Ok<I, S>> {
        Ok(self.build(session))
    }
}

impl quoll::service::Request for Service {
    type Err = Error;
    type Ok<I: Pipe, S: Side> = Connect<I, S>;

    const SERVICE_NAME: &'static str = SERVICE_NAME;

    async fn on_accept<I: Pipe, S: Side>(
        &mut self,
        session: Session<I, S>,
    ) -> Result<Self::Ok<I, S>> {
        Ok(self.build(session))
    }
}
