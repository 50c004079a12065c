#![allow(clippy::unwrap_used)]

use async_std::net::TcpStream;
use rstest::rstest;

use quoll::{
    session::Session,
    side::client::{Algorithms, Client},
    wire::msg::{
        AuthMethod, AuthRequest, AuthSuccess, ChannelOpen, ChannelOpenConfirmation, Disconnect,
        Ignore, ServiceAccept, ServiceRequest,
    },
    DisconnectedBy, Error, Result,
};

mod common;

#[rstest]
#[case("3des-cbc", "hmac-md5", "curve25519-sha256")]
#[case("aes128-cbc", "hmac-sha1", "curve25519-sha256")]
#[case("aes192-cbc", "hmac-sha2-256", "curve25519-sha256")]
#[case("aes256-cbc", "hmac-sha2-512", "curve25519-sha256")]
#[case("aes128-cbc", "hmac-sha1-etm@openssh.com", "curve25519-sha256")]
#[case("aes192-cbc", "hmac-sha2-256-etm@openssh.com", "curve25519-sha256")]
#[case("aes256-cbc", "hmac-sha2-512-etm@openssh.com", "curve25519-sha256")]
#[case("aes128-ctr", "hmac-sha1", "curve25519-sha256")]
#[case("aes192-ctr", "hmac-sha2-256", "curve25519-sha256")]
#[case("aes256-ctr", "hmac-sha2-512", "curve25519-sha256")]
#[case("aes256-ctr", "hmac-sha2-512-etm@openssh.com", "curve25519-sha256@libssh.org")]
#[case("chacha20-poly1305@openssh.com", "hmac-sha2-256", "curve25519-sha256")]
#[case("aes128-gcm@openssh.com", "hmac-sha2-256", "curve25519-sha256")]
#[case("aes256-gcm@openssh.com", "hmac-sha2-256", "curve25519-sha256")]
#[case("aes256-ctr", "hmac-sha2-256", "mlkem768x25519-sha256")]
#[case("chacha20-poly1305@openssh.com", "hmac-sha2-256", "mlkem768x25519-sha256")]
#[case("aes128-ctr", "hmac-sha2-256", "ecdh-sha2-nistp256")]
#[case("aes128-ctr", "hmac-sha2-256", "ecdh-sha2-nistp384")]
#[case("aes128-ctr", "hmac-sha1", "diffie-hellman-group14-sha1")]
#[case("aes256-ctr", "hmac-sha2-256", "diffie-hellman-group14-sha256")]
#[async_std::test]
async fn end_to_end(
    #[case] cipher: &str,
    #[case] mac: &str,
    #[case] kex: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let (addr, handle) = common::server().await?;

    tracing::info!("cipher::{cipher}, mac::{mac}, kex::{kex}, bound to {addr}");

    let stream = TcpStream::connect(addr).await?;
    let mut client = Session::new(
        stream,
        Client {
            algorithms: Algorithms {
                kexs: vec![kex.parse()?],
                ciphers: vec![cipher.parse()?],
                macs: vec![mac.parse()?],
                ..Default::default()
            },
            ..Default::default()
        },
    )
    .await?;

    client
        .send(&ServiceRequest {
            service_name: "ssh-userauth".into(),
        })
        .await?;
    client
        .recv()
        .await?
        .to::<ServiceAccept>()
        .expect("Service refused by peer");

    // The server advertises `server-sig-algs` after its first NEWKEYS.
    assert!(client.extensions().server_sig_algs.is_some());

    client
        .send(&AuthRequest {
            username: "user".into(),
            service_name: "ssh-connection".into(),
            method: AuthMethod::None,
        })
        .await?;
    client
        .recv()
        .await?
        .to::<AuthSuccess>()
        .expect("Auth refused by peer");

    client
        .send(&ChannelOpen {
            channel_type: "session".into(),
            sender_channel: 0,
            initial_window_size: 128,
            maximum_packet_size: 128,
            data: Vec::new(),
        })
        .await?;
    client
        .recv()
        .await?
        .to::<ChannelOpenConfirmation>()
        .expect("Channel open refused by peer");

    // A mid-session re-key, keeping the frozen session identifier.
    let session_id = client.session_id().map(<[u8]>::to_vec);
    client.force_rekey();
    client
        .send(&Ignore {
            data: vec![0; 512],
        })
        .await?;
    assert_eq!(client.session_id().map(<[u8]>::to_vec), session_id);

    client
        .send(&Disconnect {
            reason: quoll::wire::DisconnectReason::ByApplication,
            description: "bbbb".into(),
            language: Default::default(),
        })
        .await?;

    let message = handle.await;

    tracing::info!("message: {message:?}");

    assert!(matches!(
        message,
        Err(Error::Disconnected(ref disconnected))
            if matches!(disconnected.by, DisconnectedBy::Them)
    ));

    Ok(())
}
