//! End-to-end server tests over real TCP sockets.

use std::collections::VecDeque;

use chatwire_core::ConnectionContext;
use chatwire_proto::{Frame, Payload};
use chatwire_server::{DriverConfig, Server, ServerRuntimeConfig};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

async fn start_server() -> std::net::SocketAddr {
    let config = ServerRuntimeConfig {
        bind_address: "127.0.0.1:0".to_string(),
        driver: DriverConfig::default(),
    };
    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

/// Minimal wire-level client: raw socket plus a connection context for
/// frame reassembly.
struct TestClient {
    stream: TcpStream,
    ctx: ConnectionContext,
    pending: VecDeque<Frame>,
}

impl TestClient {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self { stream, ctx: ConnectionContext::new(), pending: VecDeque::new() }
    }

    async fn login(addr: std::net::SocketAddr, name: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client.send(&Frame::new(name, Payload::Login)).await;
        assert_eq!(client.recv().await.payload, Payload::LoginAccepted);
        client
    }

    async fn send(&mut self, frame: &Frame) {
        self.stream.write_all(&frame.to_bytes().unwrap()).await.unwrap();
    }

    async fn recv(&mut self) -> Frame {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return frame;
            }
            let mut buf = [0u8; 1024];
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed the connection");
            self.pending.extend(self.ctx.ingest(&buf[..n]).unwrap());
        }
    }

    /// Wait for the server to close this socket.
    async fn expect_close(&mut self) {
        let mut buf = [0u8; 1024];
        loop {
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    // Drain anything in flight before the close.
                    self.pending.extend(self.ctx.ingest(&buf[..n]).unwrap());
                },
            }
        }
    }
}

#[tokio::test]
async fn login_is_accepted() {
    let addr = start_server().await;
    let _alice = TestClient::login(addr, "alice").await;
}

#[tokio::test]
async fn duplicate_name_is_refused_but_connection_survives() {
    let addr = start_server().await;
    let _alice = TestClient::login(addr, "alice").await;

    let mut impostor = TestClient::connect(addr).await;
    impostor.send(&Frame::new("alice", Payload::Login)).await;
    assert_eq!(impostor.recv().await.payload, Payload::LoginRefused);

    // Same connection can retry under a free name.
    impostor.send(&Frame::new("alice2", Payload::Login)).await;
    assert_eq!(impostor.recv().await.payload, Payload::LoginAccepted);
}

#[tokio::test]
async fn users_list_is_sorted() {
    let addr = start_server().await;
    let mut carol = TestClient::login(addr, "carol").await;
    let _alice = TestClient::login(addr, "alice").await;
    let _bob = TestClient::login(addr, "bob").await;

    carol.send(&Frame::new("carol", Payload::GetUsers)).await;
    let frame = carol.recv().await;
    assert_eq!(frame.payload, Payload::UsersList { list: "alice\nbob\ncarol".to_string() });
}

#[tokio::test]
async fn public_message_reaches_everyone_but_the_sender() {
    let addr = start_server().await;
    let mut alice = TestClient::login(addr, "alice").await;
    let mut bob = TestClient::login(addr, "bob").await;

    alice.send(&Frame::new("alice", Payload::Public { text: "hello".to_string() })).await;

    let frame = bob.recv().await;
    assert_eq!(frame.sender, "alice");
    assert_eq!(frame.payload, Payload::Public { text: "hello".to_string() });

    // No echo: the next frame alice sees is her own users-list reply.
    alice.send(&Frame::new("alice", Payload::GetUsers)).await;
    let frame = alice.recv().await;
    assert!(matches!(frame.payload, Payload::UsersList { .. }));
}

#[tokio::test]
async fn private_request_is_relayed_to_the_target() {
    let addr = start_server().await;
    let mut alice = TestClient::login(addr, "alice").await;
    let mut bob = TestClient::login(addr, "bob").await;

    alice
        .send(&Frame::new("alice", Payload::PrivateRequest { target: "bob".to_string() }))
        .await;

    let frame = bob.recv().await;
    assert_eq!(frame.sender, "alice");
    assert_eq!(frame.payload, Payload::PrivateRequest { target: "bob".to_string() });
}

#[tokio::test]
async fn chat_before_login_gets_disconnected() {
    let addr = start_server().await;
    let mut ghost = TestClient::connect(addr).await;

    ghost.send(&Frame::new("ghost", Payload::Public { text: "boo".to_string() })).await;
    ghost.expect_close().await;
}

#[tokio::test]
async fn garbage_bytes_get_disconnected() {
    let addr = start_server().await;
    let mut client = TestClient::connect(addr).await;

    client.stream.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();
    client.expect_close().await;
}

#[tokio::test]
async fn disconnect_frees_the_name() {
    let addr = start_server().await;
    let alice = TestClient::login(addr, "alice").await;
    drop(alice);

    // Retry until the server has observed the disconnect.
    for _ in 0..50 {
        let mut retry = TestClient::connect(addr).await;
        retry.send(&Frame::new("alice", Payload::Login)).await;
        if retry.recv().await.payload == Payload::LoginAccepted {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("name was never released");
}
