//! Service handling facilities for [`Session`].
//!
//! A server [`handle`]s a single `SSH_MSG_SERVICE_REQUEST` and dispatches
//! the session into the matching [`Handler`]; a client [`request`]s a
//! service by name and continues into its [`Request`] implementation.

use futures::Future;

use crate::{
    session::Session,
    side::Side,
    wire::{
        msg::{ServiceAccept, ServiceRequest},
        DisconnectReason,
    },
    Error, Pipe, Result,
};

/// A service handler in the transport protocol, server side.
pub trait Handler {
    /// The erroneous outcome of the [`Handler`].
    type Err: From<crate::Error>;

    /// The successful outcome of the [`Handler`].
    type Ok<I: Pipe, S: Side>;

    /// The service _identifier_ answered for.
    const SERVICE_NAME: &'static str;

    /// The service callback, invoked when the peer requested the service.
    fn on_request<I: Pipe, S: Side>(
        &mut self,
        session: Session<I, S>,
    ) -> impl Future<Output = Result<Self::Ok<I, S>, Self::Err>> + Send;
}

/// Handle a _service request_ from the peer.
pub async fn handle<I, S, H>(
    mut session: Session<I, S>,
    mut handler: H,
) -> Result<H::Ok<I, S>, H::Err>
where
    I: Pipe,
    S: Side,
    H: Handler,
{
    let packet = session.recv().await?;

    if let Ok(ServiceRequest { service_name }) = packet.to() {
        if service_name == H::SERVICE_NAME {
            session.send(&ServiceAccept { service_name }).await?;

            handler.on_request(session).await
        } else {
            tracing::warn!("Peer requested the unknown service `{service_name}`");

            Err(Error::from(
                session
                    .disconnect(
                        DisconnectReason::ServiceNotAvailable,
                        "Requested service is unknown",
                    )
                    .await,
            )
            .into())
        }
    } else {
        Err(Error::from(
            session
                .disconnect(
                    DisconnectReason::ProtocolError,
                    "Unexpected message outside of a service request",
                )
                .await,
        )
        .into())
    }
}

/// A service request in the transport protocol, client side.
pub trait Request {
    /// The erroneous outcome of the [`Request`].
    type Err: From<crate::Error>;

    /// The successful outcome of the [`Request`].
    type Ok<I: Pipe, S: Side>;

    /// The requested service _identifier_.
    const SERVICE_NAME: &'static str;

    /// The service callback, invoked when the peer accepted the service
    /// request.
    fn on_accept<I: Pipe, S: Side>(
        &mut self,
        session: Session<I, S>,
    ) -> impl Future<Output = Result<Self::Ok<I, S>, Self::Err>> + Send;
}

/// Request a _service_ from the peer.
pub async fn request<I, S, R>(
    mut session: Session<I, S>,
    mut service: R,
) -> Result<R::Ok<I, S>, R::Err>
where
    I: Pipe,
    S: Side,
    R: Request,
{
    session
        .send(&ServiceRequest {
            service_name: R::SERVICE_NAME.into(),
        })
        .await?;

    let packet = session.recv().await?;
    if let Ok(ServiceAccept { service_name }) = packet.to() {
        if service_name == R::SERVICE_NAME {
            service.on_accept(session).await
        } else {
            Err(Error::from(
                session
                    .disconnect(
                        DisconnectReason::ServiceNotAvailable,
                        "Accepted service is unknown, aborting",
                    )
                    .await,
            )
            .into())
        }
    } else {
        Err(Error::from(
            session
                .disconnect(
                    DisconnectReason::ProtocolError,
                    "Unexpected message outside of a service response, aborting",
                )
                .await,
        )
        .into())
    }
}
