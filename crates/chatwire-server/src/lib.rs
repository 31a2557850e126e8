//! Chatwire production server.
//!
//! # Architecture
//!
//! This crate wraps the sans-IO [`ServerDriver`] with real TCP I/O. The
//! driver is pure event-to-action logic; [`Server`] executes its actions
//! on a Tokio current-thread runtime.
//!
//! All chat state lives in one dispatch loop. Each accepted socket gets
//! its own task that owns the socket and a [`chatwire_core`] connection
//! context, talks to the dispatch loop over channels, and never touches
//! shared state, so the server needs no locks at all:
//!
//! ```text
//! socket task ──Inbound frames──> dispatch loop (ServerDriver)
//! socket task <──outbound frames── dispatch loop
//! ```
//!
//! Dropping a session's outbound sender is the close signal: the socket
//! task flushes its queue and shuts the socket down.

mod driver;
mod error;
mod registry;

use std::collections::HashMap;

use chatwire_core::ConnectionContext;
use chatwire_proto::Frame;
pub use driver::{LogLevel, ServerAction, ServerConfig as DriverConfig, ServerDriver, ServerEvent};
pub use error::ServerError;
pub use registry::{LoginOutcome, SessionRegistry};
use tokio::{
    io::Interest,
    net::{TcpListener, TcpStream},
    sync::mpsc,
    sync::mpsc::error::TrySendError,
};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:7878").
    pub bind_address: String,
    /// Driver configuration (connection limits).
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:7878".to_string(), driver: DriverConfig::default() }
    }
}

/// Messages from socket tasks to the dispatch loop.
#[derive(Debug)]
enum Inbound {
    /// A decoded frame from a live connection.
    Frame { session_id: u64, frame: Frame },
    /// The connection is gone; the task has exited.
    Closed { session_id: u64, reason: String },
}

/// Production Chatwire server.
///
/// Wraps [`ServerDriver`] with TCP transport.
pub struct Server {
    listener: TcpListener,
    driver: ServerDriver,
}

impl Server {
    /// Create and bind a new server.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.bind_address).await?;
        Ok(Self { listener, driver: ServerDriver::new(config.driver) })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server, accepting connections and dispatching frames.
    ///
    /// Runs until the process is shut down or the listener fails.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self { listener, mut driver } = self;

        let (events_tx, mut events_rx) = mpsc::channel::<Inbound>(1024);
        let mut outbound: HashMap<u64, mpsc::Sender<Frame>> = HashMap::new();
        let mut next_session_id: u64 = 1;

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let session_id = next_session_id;
                    next_session_id += 1;
                    tracing::debug!(%peer, session_id, "connection accepted");

                    let (tx, rx) = mpsc::channel::<Frame>(64);
                    outbound.insert(session_id, tx);

                    let events = events_tx.clone();
                    tokio::spawn(async move {
                        let reason = match connection_task(session_id, stream, rx, &events).await
                        {
                            Ok(reason) => reason,
                            Err(e) => e.to_string(),
                        };
                        let _ = events.send(Inbound::Closed { session_id, reason }).await;
                    });

                    let actions =
                        driver.process_event(ServerEvent::ConnectionAccepted { session_id });
                    execute_actions(&driver, &mut outbound, actions);
                },

                inbound = events_rx.recv() => {
                    // The loop keeps a sender alive, so recv cannot fail.
                    let Some(inbound) = inbound else {
                        unreachable!("event channel closed while the server is running")
                    };
                    let event = match inbound {
                        Inbound::Frame { session_id, frame } => {
                            ServerEvent::FrameReceived { session_id, frame }
                        },
                        Inbound::Closed { session_id, reason } => {
                            outbound.remove(&session_id);
                            ServerEvent::ConnectionClosed { session_id, reason }
                        },
                    };
                    let actions = driver.process_event(event);
                    execute_actions(&driver, &mut outbound, actions);
                },
            }
        }
    }
}

/// Own one socket: decode inbound bytes into frames for the dispatch
/// loop and drain queued outbound frames, asking for write readiness
/// only while the queue is non-empty.
///
/// Returns the close reason; an `Err` is a transport failure.
async fn connection_task(
    session_id: u64,
    stream: TcpStream,
    mut outbound: mpsc::Receiver<Frame>,
    events: &mpsc::Sender<Inbound>,
) -> std::io::Result<String> {
    let mut ctx = ConnectionContext::new();
    let mut open = true;

    loop {
        let interest = if ctx.wants_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        tokio::select! {
            frame = outbound.recv(), if open => match frame {
                Some(frame) => {
                    if let Err(e) = ctx.enqueue(&frame) {
                        return Ok(format!("outbound frame failed to encode: {e}"));
                    }
                },
                None => {
                    // Close signal: flush what is queued, then stop.
                    open = false;
                    if !ctx.wants_write() {
                        return Ok("closed by server".to_string());
                    }
                },
            },

            ready = stream.ready(interest) => {
                let ready = ready?;

                if ready.is_readable() {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.try_read(&mut buf) {
                            Ok(0) => return Ok("peer closed".to_string()),
                            Ok(n) => match ctx.ingest(&buf[..n]) {
                                Ok(frames) => {
                                    for frame in frames {
                                        let inbound = Inbound::Frame { session_id, frame };
                                        if events.send(inbound).await.is_err() {
                                            return Ok("server shutting down".to_string());
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
                    if !open && !ctx.wants_write() {
                        return Ok("closed by server".to_string());
                    }
                }
            },
        }
    }
}

/// Execute driver actions against the outbound channel map.
fn execute_actions(
    driver: &ServerDriver,
    outbound: &mut HashMap<u64, mpsc::Sender<Frame>>,
    actions: Vec<ServerAction>,
) {
    for action in actions {
        match action {
            ServerAction::SendToSession { session_id, frame } => {
                deliver(outbound, session_id, frame);
            },

            ServerAction::Broadcast { frame, exclude } => {
                let targets: Vec<u64> =
                    driver.broadcast_targets().filter(|id| Some(*id) != exclude).collect();
                for session_id in targets {
                    deliver(outbound, session_id, frame.clone());
                }
            },

            ServerAction::CloseConnection { session_id, reason } => {
                tracing::info!(session_id, %reason, "closing connection");
                outbound.remove(&session_id);
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{message}"),
                LogLevel::Info => tracing::info!("{message}"),
                LogLevel::Warn => tracing::warn!("{message}"),
            },
        }
    }
}

/// Hand a frame to a session's socket task.
///
/// A full queue means the client stopped draining its socket; the
/// connection is dropped rather than letting it stall the dispatch loop.
fn deliver(outbound: &mut HashMap<u64, mpsc::Sender<Frame>>, session_id: u64, frame: Frame) {
    let Some(tx) = outbound.get(&session_id) else {
        tracing::warn!(session_id, "send to unknown session");
        return;
    };
    match tx.try_send(frame) {
        Ok(()) => {},
        Err(TrySendError::Full(_)) => {
            tracing::warn!(session_id, "outbound queue full, dropping connection");
            outbound.remove(&session_id);
        },
        Err(TrySendError::Closed(_)) => {
            outbound.remove(&session_id);
        },
    }
}
