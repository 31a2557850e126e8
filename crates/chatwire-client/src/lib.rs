//! Chatwire chat client.
//!
//! # Architecture
//!
//! The sans-IO [`ClientDriver`] owns all chat state; [`run_client`]
//! wraps it with real I/O on a Tokio current-thread runtime. The server
//! socket, the direct listener, and every open direct socket each get
//! their own task; they report into one event channel and the dispatch
//! loop executes the driver's actions, so no state is ever shared
//! between tasks.
//!
//! Console input arrives as parsed [`Command`]s over a channel the
//! caller provides, which keeps the whole client drivable from tests
//! without a terminal.

mod command;
mod direct;
mod driver;
mod error;

use std::{net::SocketAddr, ops::ControlFlow, path::PathBuf};

use chatwire_core::ConnectionContext;
use chatwire_proto::Frame;
pub use command::{Command, CommandError};
use direct::{DirectRegistry, ExpectedTokens};
pub use driver::{ClientAction, ClientDriver, ClientEvent, LogLevel};
pub use error::ClientError;
use tokio::{
    io::Interest,
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Display name to log in under.
    pub name: String,
    /// Server address to connect to (e.g., "127.0.0.1:7878").
    pub server_addr: String,
    /// Directory received files are written to.
    pub files_dir: PathBuf,
    /// Bind address for the direct listener; port 0 picks a free port.
    pub direct_bind: String,
}

/// Connect and run the client until quit or disconnect.
///
/// `commands` carries parsed console lines; dropping the sender quits.
pub async fn run_client(
    config: ClientConfig,
    mut commands: mpsc::Receiver<Command>,
) -> Result<(), ClientError> {
    let server = TcpStream::connect(&config.server_addr).await?;

    // Advertise the IP the server sees us on, with the listener's port.
    let listener = TcpListener::bind(&config.direct_bind).await?;
    let direct_addr = SocketAddr::new(server.local_addr()?.ip(), listener.local_addr()?.port());
    tracing::debug!(%direct_addr, "direct listener up");

    let mut driver = ClientDriver::new(&config.name, direct_addr);

    let (events_tx, mut events_rx) = mpsc::channel::<ClientEvent>(256);
    let expected = ExpectedTokens::new();
    let registry = DirectRegistry::new();

    tokio::spawn(direct::run_acceptor(
        listener,
        expected.clone(),
        registry.clone(),
        config.files_dir.clone(),
        events_tx.clone(),
    ));

    let (server_tx, server_rx) = mpsc::channel::<Frame>(64);
    {
        let events = events_tx.clone();
        tokio::spawn(async move {
            let reason = match server_task(server, server_rx, &events).await {
                Ok(reason) => reason,
                Err(e) => e.to_string(),
            };
            let _ = events.send(ClientEvent::ServerClosed { reason }).await;
        });
    }

    let mut actions = driver.process_event(ClientEvent::Connected);
    'dispatch: loop {
        for action in actions.drain(..) {
            let flow = execute_action(
                action,
                &server_tx,
                &expected,
                &registry,
                &config.files_dir,
                &events_tx,
            )
            .await;
            if flow.is_break() {
                break 'dispatch;
            }
        }

        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => actions = driver.process_event(ClientEvent::Command(command)),
                None => break 'dispatch,
            },
            event = events_rx.recv() => {
                // The loop keeps a sender alive, so recv cannot fail.
                let Some(event) = event else {
                    unreachable!("event channel closed while the client is running")
                };
                actions = driver.process_event(event);
            },
        }
    }

    Ok(())
}

/// Execute one driver action against the runtime's channels.
async fn execute_action(
    action: ClientAction,
    server_tx: &mpsc::Sender<Frame>,
    expected: &ExpectedTokens,
    registry: &DirectRegistry,
    files_dir: &std::path::Path,
    events_tx: &mpsc::Sender<ClientEvent>,
) -> ControlFlow<()> {
    match action {
        ClientAction::SendToServer(frame) => {
            if server_tx.send(frame).await.is_err() {
                return ControlFlow::Break(());
            }
        },
        ClientAction::Display(message) => println!("{message}"),
        ClientAction::ExpectDirect { peer, token } => expected.arm(token, &peer),
        ClientAction::ConnectDirect { peer, addr, token } => {
            direct::spawn_initiator(
                peer,
                addr,
                token,
                registry.clone(),
                files_dir.to_path_buf(),
                events_tx.clone(),
            );
        },
        ClientAction::SendFile { peer, path } => {
            // Queueing a large file can outpace the session task, so the
            // send runs in its own task and the dispatch loop stays free
            // to drain events.
            let registry = registry.clone();
            tokio::spawn(async move {
                direct::send_file(&registry, &peer, &path).await;
            });
        },
        ClientAction::Log { level, message } => match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
        },
        ClientAction::Quit => return ControlFlow::Break(()),
    }
    ControlFlow::Continue(())
}

/// Own the server socket: decode inbound frames into events and drain
/// queued outbound frames.
async fn server_task(
    stream: TcpStream,
    mut outbound: mpsc::Receiver<Frame>,
    events: &mpsc::Sender<ClientEvent>,
) -> std::io::Result<String> {
    let mut ctx = ConnectionContext::new();

    loop {
        let interest = if ctx.wants_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = ctx.enqueue(&frame) {
                        return Ok(format!("outbound frame failed to encode: {e}"));
                    }
                },
                None => return Ok("quit".to_string()),
            },

            ready = stream.ready(interest) => {
                let ready = ready?;

                if ready.is_readable() {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.try_read(&mut buf) {
                            Ok(0) => return Ok("server closed the connection".to_string()),
                            Ok(n) => match ctx.ingest(&buf[..n]) {
                                Ok(frames) => {
                                    for frame in frames {
                                        let event = ClientEvent::ServerFrame(frame);
                                        if events.send(event).await.is_err() {
                                            return Ok("client shutting down".to_string());
                                        }
                                    }
                                },
                                Err(e) => return Ok(format!("protocol violation: {e}")),
                            },
                            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                            Err(e) => return Err(e),
                        }
                    }
                }

                if ready.is_writable() {
                    while let Some(chunk) = ctx.next_chunk() {
                        match stream.try_write(chunk) {
                            Ok(n) => ctx.advance(n),
                            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                            Err(e) => return Err(e),
                        }
                    }
                }
            },
        }
    }
}
