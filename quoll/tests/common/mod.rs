use std::net::SocketAddr;

use async_std::{net::TcpListener, stream::StreamExt};

use quoll::{
    session::Session,
    side::server::Server,
    wire::{
        msg::{
            AuthRequest, AuthSuccess, ChannelOpen, ChannelOpenConfirmation, ServiceAccept,
            ServiceRequest,
        },
        Packet,
    },
    Result,
};

/// Spawn a single-connection server answering the happy path: service
/// request, any auth request, one channel open; resolves with the
/// outcome of the next `recv`.
pub async fn server() -> Result<(SocketAddr, impl futures::Future<Output = Result<Packet>>)> {
    let socket = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = socket.local_addr()?;

    let handle = async_std::task::spawn(async move {
        let stream = socket.incoming().next().await.expect("a connection")?;

        let server = Server {
            keys: vec![ssh_key::PrivateKey::random(
                &mut rand::thread_rng(),
                ssh_key::Algorithm::Ed25519,
            )
            .expect("key generation")],
            ..Default::default()
        };
        let mut session = Session::new(stream, server).await?;

        let request: ServiceRequest = session.recv().await?.to()?;
        session
            .send(&ServiceAccept {
                service_name: request.service_name,
            })
            .await?;

        let _: AuthRequest = session.recv().await?.to()?;
        session.send(&AuthSuccess).await?;

        let open: ChannelOpen = session.recv().await?.to()?;
        session
            .send(&ChannelOpenConfirmation {
                recipient_channel: open.sender_channel,
                sender_channel: 0,
                initial_window_size: open.initial_window_size,
                maximum_packet_size: open.maximum_packet_size,
                data: Vec::new(),
            })
            .await?;

        session.recv().await
    });

    Ok((addr, handle))
}
