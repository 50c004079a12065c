#![allow(clippy::unwrap_used)]

use std::{
    net::SocketAddr,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use async_std::{
    net::{TcpListener, TcpStream},
    stream::StreamExt,
};

use quoll::{
    session::Session,
    side::{client::Client, server::Server},
    wire::msg::{
        ChannelClose, ChannelData, ChannelEof, ChannelOpen, ChannelOpenConfirmation,
        ChannelOpenFailure, ChannelOpenFailureReason, ChannelRequest, ChannelSuccess,
        ChannelWindowAdjust, Disconnect, ServiceAccept, ServiceRequest,
    },
};

use quoll_connect::{ChannelType, Open, OpenRequest, Service, Streams};

/// A sink collecting everything written, shared with the test body.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl futures::AsyncWrite for SharedSink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);

        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// A `session` channel type sourcing a fixed byte blob and sinking into
/// a shared buffer; `ping` requests succeed, everything else fails.
struct TestSession {
    source_data: Vec<u8>,
    sink: SharedSink,
    deferred: bool,
}

impl ChannelType for TestSession {
    fn name(&self) -> &'static str {
        "session"
    }

    fn open(&mut self, _request: OpenRequest<'_>) -> Open {
        let streams = Streams::new()
            .source(futures::io::Cursor::new(self.source_data.clone()))
            .sink(self.sink.clone());

        if self.deferred {
            Open::Pending(Box::pin(async move { Ok(streams) }))
        } else {
            Open::Ready(streams)
        }
    }

    fn request(
        &mut self,
        _channel: &mut quoll_connect::Channel,
        request: &ChannelRequest,
        _out: &mut quoll_connect::Outgoing,
    ) -> bool {
        request.request_type == "ping"
    }
}

/// Bind a loopback server running the connect service over one
/// connection, with the given `session` channel type.
async fn server(
    channel_type: TestSession,
) -> (SocketAddr, async_std::task::JoinHandle<()>) {
    let socket = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = socket.local_addr().unwrap();

    let handle = async_std::task::spawn(async move {
        let stream = socket.incoming().next().await.unwrap().unwrap();

        let config = Server {
            keys: vec![ssh_key::PrivateKey::random(
                &mut rand::thread_rng(),
                ssh_key::Algorithm::Ed25519,
            )
            .unwrap()],
            ..Default::default()
        };

        let session = Session::new(stream, config).await.unwrap();
        let connect = quoll::service::handle(session, Service::new().register(channel_type))
            .await
            .unwrap();

        // The loop ends with the client's disconnect.
        let outcome = connect.run().await;
        assert!(outcome.is_err());
    });

    (addr, handle)
}

async fn client(addr: SocketAddr) -> Session<TcpStream, Client> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut session = Session::new(stream, Client::default()).await.unwrap();

    session
        .send(&ServiceRequest {
            service_name: "ssh-connection".into(),
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
}

async fn disconnect(mut session: Session<TcpStream, Client>) {
    session
        .send(&Disconnect {
            reason: quoll::wire::DisconnectReason::ByApplication,
            description: "done".into(),
            language: Default::default(),
        })
        .await
        .unwrap();
}

#[async_std::test]
async fn windowed_flow_control() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    // 2040 bytes: 4 * 256 under the initial window, 4 more after one
    // adjust, with credit left over so the EOF is noticed.
    let blob: Vec<u8> = (0..2040u32).map(|byte| byte as u8).collect();

    let (addr, handle) = server(TestSession {
        source_data: blob.clone(),
        sink: SharedSink::default(),
        deferred: false,
    })
    .await;
    let mut session = client(addr).await;

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
    let confirmation: ChannelOpenConfirmation =
        session.recv().await.unwrap().to().expect("open refused");
    let server_chan = confirmation.sender_channel;

    // Exactly the granted window arrives, in max-packet sized chunks.
    let mut received = Vec::new();
    for _ in 0..4 {
        let data: ChannelData = session.recv().await.unwrap().to().unwrap();
        assert!(data.data.len() <= 256);
        received.extend(data.data);
    }
    assert_eq!(received.len(), 1024);

    // The sender must now stall on the exhausted window.
    assert!(
        async_std::future::timeout(Duration::from_millis(250), session.recv())
            .await
            .is_err()
    );

    session
        .send(&ChannelWindowAdjust {
            recipient_channel: server_chan,
            bytes_to_add: 1024,
        })
        .await
        .unwrap();

    for _ in 0..4 {
        let data: ChannelData = session.recv().await.unwrap().to().unwrap();
        received.extend(data.data);
    }
    assert_eq!(received, blob);

    // Source exhausted: EOF follows.
    session
        .recv()
        .await
        .unwrap()
        .to::<ChannelEof>()
        .expect("expected eof");

    disconnect(session).await;
    handle.await;
}

#[async_std::test]
async fn eof_close_handshake_frees_the_slot() {
    let blob = vec![0x51u8; 100];
    let sink = SharedSink::default();

    let (addr, handle) = server(TestSession {
        source_data: blob.clone(),
        sink: sink.clone(),
        deferred: false,
    })
    .await;
    let mut session = client(addr).await;

    session
        .send(&ChannelOpen {
            channel_type: "session".into(),
            sender_channel: 7,
            initial_window_size: 1024,
            maximum_packet_size: 256,
            data: Vec::new(),
        })
        .await
        .unwrap();
    let confirmation: ChannelOpenConfirmation =
        session.recv().await.unwrap().to().expect("open refused");
    let server_chan = confirmation.sender_channel;

    // All hundred bytes, then the EOF.
    let data: ChannelData = session.recv().await.unwrap().to().unwrap();
    assert_eq!(data.data, blob);
    session
        .recv()
        .await
        .unwrap()
        .to::<ChannelEof>()
        .expect("expected eof");

    // Send some data of our own, then our half of the close dance.
    session
        .send(&ChannelData {
            recipient_channel: server_chan,
            data: b"hello".to_vec(),
        })
        .await
        .unwrap();
    session
        .send(&ChannelEof {
            recipient_channel: server_chan,
        })
        .await
        .unwrap();

    session
        .recv()
        .await
        .unwrap()
        .to::<ChannelClose>()
        .expect("expected close");
    session
        .send(&ChannelClose {
            recipient_channel: server_chan,
        })
        .await
        .unwrap();

    // The slot is only reusable once both closes were exchanged; a new
    // open landing in slot 0 proves the old one was freed.
    session
        .send(&ChannelOpen {
            channel_type: "session".into(),
            sender_channel: 8,
            initial_window_size: 1024,
            maximum_packet_size: 256,
            data: Vec::new(),
        })
        .await
        .unwrap();
    let reopened: ChannelOpenConfirmation =
        session.recv().await.unwrap().to().expect("open refused");
    assert_eq!(reopened.sender_channel, server_chan);

    disconnect(session).await;
    handle.await;

    assert_eq!(*sink.0.lock().unwrap(), b"hello");
}

#[async_std::test]
async fn unknown_channel_type_is_refused() {
    let (addr, handle) = server(TestSession {
        source_data: Vec::new(),
        sink: SharedSink::default(),
        deferred: false,
    })
    .await;
    let mut session = client(addr).await;

    session
        .send(&ChannelOpen {
            channel_type: "direct-tcpip".into(),
            sender_channel: 0,
            initial_window_size: 1024,
            maximum_packet_size: 256,
            data: Vec::new(),
        })
        .await
        .unwrap();

    let failure: ChannelOpenFailure = session.recv().await.unwrap().to().expect("expected failure");
    assert_eq!(failure.recipient_channel, 0);
    assert_eq!(
        failure.reason,
        ChannelOpenFailureReason::UnknownChannelType
    );

    disconnect(session).await;
    handle.await;
}

#[async_std::test]
async fn deferred_open_confirms_and_answers_requests() {
    let (addr, handle) = server(TestSession {
        source_data: Vec::new(),
        sink: SharedSink::default(),
        deferred: true,
    })
    .await;
    let mut session = client(addr).await;

    session
        .send(&ChannelOpen {
            channel_type: "session".into(),
            sender_channel: 3,
            initial_window_size: 1024,
            maximum_packet_size: 256,
            data: Vec::new(),
        })
        .await
        .unwrap();
    let confirmation: ChannelOpenConfirmation =
        session.recv().await.unwrap().to().expect("open refused");

    session
        .send(&ChannelRequest {
            recipient_channel: confirmation.sender_channel,
            request_type: "ping".into(),
            want_reply: true,
            data: Vec::new(),
        })
        .await
        .unwrap();
    session
        .recv()
        .await
        .unwrap()
        .to::<ChannelSuccess>()
        .expect("expected success");

    disconnect(session).await;
    handle.await;
}
