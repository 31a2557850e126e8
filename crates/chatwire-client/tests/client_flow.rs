//! Full-stack test: two clients, one server, one file.
//!
//! Drives both clients through their command channels only, the same
//! way the console does, and observes the outcome on the filesystem.

use std::{path::Path, time::Duration};

use chatwire_client::{ClientConfig, Command, run_client};
use chatwire_server::{DriverConfig, Server, ServerRuntimeConfig};
use tokio::sync::mpsc;

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

fn start_client(
    name: &str,
    server: std::net::SocketAddr,
    files_dir: &Path,
) -> mpsc::Sender<Command> {
    let (tx, rx) = mpsc::channel(16);
    let config = ClientConfig {
        name: name.to_string(),
        server_addr: server.to_string(),
        files_dir: files_dir.to_path_buf(),
        direct_bind: "127.0.0.1:0".to_string(),
    };
    tokio::spawn(run_client(config, rx));
    tx
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn file_transfer_end_to_end() {
    let server = start_server().await;
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();

    let alice = start_client("alice", server, alice_dir.path());
    let bob = start_client("bob", server, bob_dir.path());
    settle().await;

    // alice asks, bob accepts, alice's client dials bob's listener.
    alice.send(Command::Request("bob".to_string())).await.unwrap();
    settle().await;
    bob.send(Command::Accept("alice".to_string())).await.unwrap();
    settle().await;

    let source = alice_dir.path().join("report.txt");
    std::fs::write(&source, b"quarterly numbers").unwrap();
    alice
        .send(Command::SendFile { peer: "bob".to_string(), path: source })
        .await
        .unwrap();

    let received = bob_dir.path().join("report.txt");
    for _ in 0..100 {
        if received.exists() {
            assert_eq!(std::fs::read(&received).unwrap(), b"quarterly numbers");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("file never arrived");
}

#[tokio::test]
async fn large_file_transfer_does_not_stall_the_client() {
    let server = start_server().await;
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();

    let alice = start_client("alice", server, alice_dir.path());
    let bob = start_client("bob", server, bob_dir.path());
    settle().await;

    alice.send(Command::Request("bob".to_string())).await.unwrap();
    settle().await;
    bob.send(Command::Accept("alice".to_string())).await.unwrap();
    settle().await;

    // Far more chunks than the session channel can hold at once, so the
    // send must not be allowed to park the dispatch loop.
    let contents: Vec<u8> = (0..600 * 1024u32).map(|i| (i % 251) as u8).collect();
    let source = alice_dir.path().join("big.bin");
    std::fs::write(&source, &contents).unwrap();
    alice
        .send(Command::SendFile { peer: "bob".to_string(), path: source })
        .await
        .unwrap();

    // The client keeps serving unrelated traffic mid-transfer.
    alice.send(Command::Public("still here".to_string())).await.unwrap();

    let received = bob_dir.path().join("big.bin");
    for _ in 0..200 {
        if received.exists() && std::fs::read(&received).unwrap() == contents {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("large file never fully arrived");
}

#[tokio::test]
async fn refused_request_opens_nothing() {
    let server = start_server().await;
    let alice_dir = tempfile::tempdir().unwrap();
    let bob_dir = tempfile::tempdir().unwrap();

    let alice = start_client("alice", server, alice_dir.path());
    let bob = start_client("bob", server, bob_dir.path());
    settle().await;

    alice.send(Command::Request("bob".to_string())).await.unwrap();
    settle().await;
    bob.send(Command::Refuse("alice".to_string())).await.unwrap();
    settle().await;

    // No session was opened, so the send is rejected locally and
    // nothing ever shows up on bob's side.
    let source = alice_dir.path().join("report.txt");
    std::fs::write(&source, b"nope").unwrap();
    alice
        .send(Command::SendFile { peer: "bob".to_string(), path: source })
        .await
        .unwrap();
    settle().await;

    assert!(!bob_dir.path().join("report.txt").exists());
}
