#![allow(clippy::unwrap_used)]

use std::net::SocketAddr;

use async_std::{
    net::{TcpListener, TcpStream},
    stream::StreamExt,
    task::JoinHandle,
};

use quoll::{
    session::Session,
    side::{client::Client, server::Server, Side},
    wire::msg::{ChannelOpen, ServiceAccept, ServiceRequest},
    wire::DisconnectReason,
    DisconnectedBy, Error, Pipe, Result,
};

use quoll_auth::{
    client as auth_client,
    server::{none, password, publickey, Auth},
    Methods,
};

/// A terminal service that simply hands the authenticated session back.
struct Done;

impl quoll::service::Handler for Done {
    type Err = Error;
    type Ok<I: Pipe, S: Side> = Session<I, S>;

    const SERVICE_NAME: &'static str = "ssh-connection";

    async fn on_request<I: Pipe, S: Side>(
        &mut self,
        session: Session<I, S>,
    ) -> Result<Self::Ok<I, S>> {
        Ok(session)
    }
}

impl quoll::service::Request for Done {
    type Err = Error;
    type Ok<I: Pipe, S: Side> = Session<I, S>;

    const SERVICE_NAME: &'static str = "ssh-connection";

    async fn on_accept<I: Pipe, S: Side>(
        &mut self,
        session: Session<I, S>,
    ) -> Result<Self::Ok<I, S>> {
        Ok(session)
    }
}

fn host_key() -> ssh_key::PrivateKey {
    ssh_key::PrivateKey::random(&mut rand::thread_rng(), ssh_key::Algorithm::Ed25519).unwrap()
}

async fn bind() -> (SocketAddr, TcpListener) {
    let socket = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = socket.local_addr().unwrap();

    (addr, socket)
}

async fn accept(socket: TcpListener) -> Session<TcpStream, Server> {
    let stream = socket.incoming().next().await.unwrap().unwrap();

    Session::new(
        stream,
        Server {
            keys: vec![host_key()],
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

#[async_std::test]
async fn password_accepts_the_right_secret() {
    let (addr, socket) = bind().await;

    let handle: JoinHandle<bool> = async_std::task::spawn(async move {
        let session = accept(socket).await;

        let auth = Auth::new(Done).password(|user: String, secret: String| {
            if user == "ferret" && password::constant_time_eq(secret.as_bytes(), b"hunter2") {
                password::Response::Accept
            } else {
                password::Response::Reject
            }
        });

        quoll::service::handle(session, auth).await.is_ok()
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let session = Session::new(stream, Client::default()).await.unwrap();

    let outcome = quoll::service::request(
        session,
        auth_client::Auth::new("ferret", Done).password("hunter2"),
    )
    .await;

    assert!(outcome.is_ok());
    assert!(handle.await);
}

#[async_std::test]
async fn wrong_password_exhausts_the_methods() {
    let (addr, socket) = bind().await;

    let handle = async_std::task::spawn(async move {
        let session = accept(socket).await;

        let auth = Auth::new(Done).password(|_: String, _: String| password::Response::Reject);

        quoll::service::handle(session, auth).await.is_err()
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let session = Session::new(stream, Client::default()).await.unwrap();

    let outcome = quoll::service::request(
        session,
        auth_client::Auth::new("ferret", Done).password("wrong"),
    )
    .await;

    assert!(matches!(
        outcome,
        Err(Error::Disconnected(ref disconnected))
            if matches!(disconnected.by, DisconnectedBy::Us)
    ));
    assert!(handle.await);
}

#[async_std::test]
async fn publickey_query_and_signature() {
    let (addr, socket) = bind().await;

    let user_key = host_key();
    let authorized = user_key.public_key().clone();

    let handle = async_std::task::spawn(async move {
        let session = accept(socket).await;

        let auth = Auth::new(Done).publickey(move |user: String, key: publickey::PublicKey| {
            if user == "ferret" && key.key_data() == authorized.key_data() {
                publickey::Response::Accept
            } else {
                publickey::Response::Reject
            }
        });

        quoll::service::handle(session, auth).await.is_ok()
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let session = Session::new(stream, Client::default()).await.unwrap();

    let outcome = quoll::service::request(
        session,
        auth_client::Auth::new("ferret", Done).publickey(user_key),
    )
    .await;

    assert!(outcome.is_ok());
    assert!(handle.await);
}

#[async_std::test]
async fn multi_auth_requires_both_methods() {
    let (addr, socket) = bind().await;

    let user_key = host_key();
    let authorized = user_key.public_key().clone();

    let handle = async_std::task::spawn(async move {
        let session = accept(socket).await;

        let auth = Auth::new(Done)
            .password(|_: String, secret: String| {
                if password::constant_time_eq(secret.as_bytes(), b"hunter2") {
                    password::Response::Accept
                } else {
                    password::Response::Reject
                }
            })
            .publickey(move |_: String, key: publickey::PublicKey| {
                if key.key_data() == authorized.key_data() {
                    publickey::Response::Accept
                } else {
                    publickey::Response::Reject
                }
            })
            .require_all(Methods::PASSWORD | Methods::PUBLICKEY);

        quoll::service::handle(session, auth).await.is_ok()
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let session = Session::new(stream, Client::default()).await.unwrap();

    let outcome = quoll::service::request(
        session,
        auth_client::Auth::new("ferret", Done)
            .publickey(user_key)
            .password("hunter2"),
    )
    .await;

    assert!(outcome.is_ok());
    assert!(handle.await);
}

#[async_std::test]
async fn channel_open_is_gated_before_auth() {
    let (addr, socket) = bind().await;

    let handle = async_std::task::spawn(async move {
        let session = accept(socket).await;

        let auth =
            Auth::new(Done).password(|_: String, _: String| password::Response::Accept);

        // The gate tears the session down on the premature open.
        quoll::service::handle(session, auth).await.is_err()
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut session = Session::new(stream, Client::default()).await.unwrap();

    session
        .send(&ServiceRequest {
            service_name: "ssh-userauth".into(),
        })
        .await
        .unwrap();
    session
        .recv()
        .await
        .unwrap()
        .to::<ServiceAccept>()
        .expect("service refused");

    session
        .send(&ChannelOpen {
            channel_type: "session".into(),
            sender_channel: 0,
            initial_window_size: 1024,
            maximum_packet_size: 256,
            data: Vec::new(),
        })
        .await
        .unwrap();

    let outcome = session.recv().await;
    assert!(matches!(
        outcome,
        Err(Error::Disconnected(ref disconnected))
            if matches!(disconnected.by, DisconnectedBy::Them)
                && disconnected.reason == DisconnectReason::ProtocolError
    ));

    assert!(handle.await);
}

#[async_std::test]
async fn none_probe_lists_the_methods() {
    use quoll::wire::msg::{AuthFailure, AuthMethod, AuthRequest};

    let (addr, socket) = bind().await;

    let handle = async_std::task::spawn(async move {
        let session = accept(socket).await;

        let auth = Auth::new(Done)
            .password(|_: String, _: String| password::Response::Reject)
            .none(|_: String| none::Response::Reject);

        let _ = quoll::service::handle(session, auth).await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut session = Session::new(stream, Client::default()).await.unwrap();

    session
        .send(&ServiceRequest {
            service_name: "ssh-userauth".into(),
        })
        .await
        .unwrap();
    session
        .recv()
        .await
        .unwrap()
        .to::<ServiceAccept>()
        .expect("service refused");

    session
        .send(&AuthRequest {
            username: "ferret".into(),
            service_name: "ssh-connection".into(),
            method: AuthMethod::None,
        })
        .await
        .unwrap();

    let failure: AuthFailure = session.recv().await.unwrap().to().expect("expected failure");
    assert!(!failure.partial_success);
    assert!(failure.continue_with.contains("password"));
    assert!(!failure.continue_with.contains("none"));

    session
        .send(&quoll::wire::msg::Disconnect {
            reason: DisconnectReason::ByApplication,
            description: "done".into(),
            language: Default::default(),
        })
        .await
        .unwrap();

    handle.await;
}
