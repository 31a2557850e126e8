//! Direct peer sockets for private sessions.
//!
//! The client always runs one direct listener. Accepting a request arms
//! it with the token the peer must present; the requester dials the
//! advertised address and sends the token as the first frame. Once a
//! socket passes the handshake it is symmetric: either side can send
//! files, and inbound chunks are assembled straight to disk under the
//! configured download directory.
//!
//! Tasks here never share chat state. They report to the dispatch loop
//! through [`ClientEvent`]s and receive outbound frames over a channel;
//! the only shared structures are the token table the listener checks
//! and the per-peer sender map used to hand file chunks to a socket.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use chatwire_core::{ConnectionContext, FileReceiver, FileSender, PrivateSession, TransferEvent};
use chatwire_proto::{Frame, Payload};
use tokio::{
    fs,
    io::{AsyncWriteExt, Interest},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

use crate::driver::ClientEvent;

/// Tokens handed out in accept frames, awaiting the peer's dial.
///
/// The listener removes an entry on first presentation, so a token
/// works exactly once.
#[derive(Debug, Clone, Default)]
pub struct ExpectedTokens {
    tokens: Arc<Mutex<HashMap<u64, String>>>,
}

impl ExpectedTokens {
    /// Create an empty token table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the listener: a dial presenting `token` belongs to `peer`.
    pub fn arm(&self, token: u64, peer: &str) {
        self.locked().insert(token, peer.to_string());
    }

    /// Claim a presented token, returning the peer it was handed to.
    fn claim(&self, token: u64) -> Option<String> {
        self.locked().remove(&token)
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<u64, String>> {
        match self.tokens.lock() {
            Ok(guard) => guard,
            // Poisoning requires a panic, which this crate denies.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Open direct sockets by peer name.
///
/// The dispatch loop uses this to hand file chunks to the task that
/// owns the peer's socket.
#[derive(Debug, Clone, Default)]
pub struct DirectRegistry {
    senders: Arc<Mutex<HashMap<String, mpsc::Sender<Frame>>>>,
}

impl DirectRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Outbound sender for a peer's socket, if a session is open.
    #[must_use]
    pub fn sender_for(&self, peer: &str) -> Option<mpsc::Sender<Frame>> {
        self.locked().get(peer).cloned()
    }

    fn insert(&self, peer: &str, tx: mpsc::Sender<Frame>) {
        self.locked().insert(peer.to_string(), tx);
    }

    fn remove(&self, peer: &str) {
        self.locked().remove(peer);
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, mpsc::Sender<Frame>>> {
        match self.senders.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Accept loop for the direct listener. Runs for the client's lifetime.
pub async fn run_acceptor(
    listener: TcpListener,
    expected: ExpectedTokens,
    registry: DirectRegistry,
    files_dir: PathBuf,
    events: mpsc::Sender<ClientEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                tracing::debug!(%peer_addr, "direct connection accepted");
                let expected = expected.clone();
                let registry = registry.clone();
                let files_dir = files_dir.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        accept_session(stream, expected, registry, files_dir, events).await
                    {
                        tracing::debug!(%peer_addr, "direct connection failed: {e}");
                    }
                });
            },
            Err(e) => tracing::warn!("direct accept failed: {e}"),
        }
    }
}

/// Acceptor-side handshake: the first frame on the socket must be a
/// session-open presenting an armed token. Anything else drops the
/// socket without a reply.
async fn accept_session(
    stream: TcpStream,
    expected: ExpectedTokens,
    registry: DirectRegistry,
    files_dir: PathBuf,
    events: mpsc::Sender<ClientEvent>,
) -> std::io::Result<()> {
    let mut ctx = ConnectionContext::new();
    let mut frames = read_handshake(&stream, &mut ctx).await?;
    // The peer may pipeline chunks behind the open frame; anything that
    // coalesced into the same read belongs to the session.
    let open_frame = frames.remove(0);

    let Payload::SessionOpen { token } = open_frame.payload else {
        tracing::warn!("direct socket opened with {:?} instead of a token", open_frame.opcode());
        return Ok(());
    };
    let Some(peer) = expected.claim(token) else {
        tracing::warn!("direct socket presented an unknown token");
        return Ok(());
    };

    let mut session = PrivateSession::acceptor(&peer, token);
    if let Err(e) = session.handle_open(&Frame::new("", Payload::SessionOpen { token })) {
        tracing::warn!("direct handshake failed: {e}");
        return Ok(());
    }

    run_open_session(peer, stream, ctx, frames, registry, files_dir, events).await;
    Ok(())
}

/// Initiator side: dial the advertised address and present the token.
pub fn spawn_initiator(
    peer: String,
    addr: std::net::SocketAddr,
    token: u64,
    registry: DirectRegistry,
    files_dir: PathBuf,
    events: mpsc::Sender<ClientEvent>,
) {
    tokio::spawn(async move {
        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = events
                    .send(ClientEvent::DirectClosed { peer, reason: e.to_string() })
                    .await;
                return;
            },
        };

        let mut session = PrivateSession::initiator(&peer, token);
        let mut ctx = ConnectionContext::new();
        if ctx.enqueue(&session.open_frame()).is_err() {
            return;
        }

        run_open_session(peer, stream, ctx, Vec::new(), registry, files_dir, events).await;
    });
}

/// Register the open socket, run it until it closes, then clean up.
async fn run_open_session(
    peer: String,
    stream: TcpStream,
    ctx: ConnectionContext,
    pending: Vec<Frame>,
    registry: DirectRegistry,
    files_dir: PathBuf,
    events: mpsc::Sender<ClientEvent>,
) {
    let (tx, rx) = mpsc::channel::<Frame>(64);
    registry.insert(&peer, tx);
    let _ = events.send(ClientEvent::DirectOpened { peer: peer.clone() }).await;

    let reason = match session_loop(&peer, stream, ctx, pending, rx, &files_dir, &events).await {
        Ok(reason) => reason,
        Err(e) => e.to_string(),
    };

    registry.remove(&peer);
    let _ = events.send(ClientEvent::DirectClosed { peer, reason }).await;
}

/// Drive one open direct socket: drain outbound chunk frames and
/// assemble inbound chunks to disk.
async fn session_loop(
    peer: &str,
    stream: TcpStream,
    mut ctx: ConnectionContext,
    pending: Vec<Frame>,
    mut outbound: mpsc::Receiver<Frame>,
    files_dir: &Path,
    events: &mpsc::Sender<ClientEvent>,
) -> std::io::Result<String> {
    let mut receiver = FileReceiver::new();
    let mut open_file: Option<fs::File> = None;
    let mut closing = false;

    // Frames that arrived in the same reads as the handshake.
    for frame in pending {
        if let Some(reason) =
            handle_inbound(peer, frame, &mut receiver, &mut open_file, files_dir, events).await?
        {
            return Ok(reason);
        }
    }

    loop {
        let interest = if ctx.wants_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };

        tokio::select! {
            frame = outbound.recv(), if !closing => match frame {
                Some(frame) => {
                    if let Err(e) = ctx.enqueue(&frame) {
                        return Ok(format!("outbound frame failed to encode: {e}"));
                    }
                },
                None => {
                    closing = true;
                    if !ctx.wants_write() {
                        return Ok("closed".to_string());
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
                            Ok(n) => {
                                let frames = match ctx.ingest(&buf[..n]) {
                                    Ok(frames) => frames,
                                    Err(e) => return Ok(format!("protocol violation: {e}")),
                                };
                                for frame in frames {
                                    if let Some(reason) = handle_inbound(
                                        peer,
                                        frame,
                                        &mut receiver,
                                        &mut open_file,
                                        files_dir,
                                        events,
                                    )
                                    .await?
                                    {
                                        return Ok(reason);
                                    }
                                }
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
                    if closing && !ctx.wants_write() {
                        return Ok("closed".to_string());
                    }
                }
            },
        }
    }
}

/// Process one inbound frame on an open session.
///
/// Returns `Some(reason)` when the frame is fatal for the socket.
async fn handle_inbound(
    peer: &str,
    frame: Frame,
    receiver: &mut FileReceiver,
    open_file: &mut Option<fs::File>,
    files_dir: &Path,
    events: &mpsc::Sender<ClientEvent>,
) -> std::io::Result<Option<String>> {
    let Payload::FileChunk { name, total_size, data } = frame.payload else {
        return Ok(Some(format!("unexpected {:?} frame on an open session", frame.opcode())));
    };

    let transfer_events = match receiver.on_chunk(&name, total_size, data) {
        Ok(transfer_events) => transfer_events,
        Err(e) => return Ok(Some(e.to_string())),
    };

    for event in transfer_events {
        match event {
            TransferEvent::Started { name, total_size } => {
                let Some(file_name) = safe_file_name(&name) else {
                    return Ok(Some(format!("unsafe file name {name:?}")));
                };
                tracing::debug!(name, total_size, "receiving file from {peer}");
                *open_file = Some(fs::File::create(files_dir.join(file_name)).await?);
            },
            TransferEvent::Data { bytes, .. } => {
                // INVARIANT: Started always precedes Data.
                let Some(file) = open_file.as_mut() else {
                    unreachable!("file chunk before transfer start")
                };
                file.write_all(&bytes).await?;
            },
            TransferEvent::Completed { name } => {
                if let Some(mut file) = open_file.take() {
                    file.flush().await?;
                }
                let received =
                    ClientEvent::FileReceived { peer: peer.to_string(), name };
                if events.send(received).await.is_err() {
                    return Ok(Some("client shutting down".to_string()));
                }
            },
        }
    }

    Ok(None)
}

/// Read a file and queue it, chunk by chunk, onto a peer's socket.
pub async fn send_file(registry: &DirectRegistry, peer: &str, path: &Path) {
    let Some(tx) = registry.sender_for(peer) else {
        tracing::warn!("no open session with {peer}");
        return;
    };

    let contents = match fs::read(path).await {
        Ok(contents) => contents,
        Err(e) => {
            tracing::warn!("cannot read {}: {e}", path.display());
            return;
        },
    };

    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let frames = match FileSender::chunks(&name, &contents) {
        Ok(frames) => frames,
        Err(e) => {
            tracing::warn!("cannot send {}: {e}", path.display());
            return;
        },
    };

    for frame in frames {
        if tx.send(frame).await.is_err() {
            tracing::warn!("session with {peer} closed mid-transfer");
            return;
        }
    }
    tracing::debug!("queued {} for {peer}", path.display());
}

/// Read from the socket until at least one full frame decodes.
///
/// Returns every frame the reads produced, never an empty vec. Frames
/// after the first are pipelined traffic that coalesced with the
/// handshake and must not be dropped.
async fn read_handshake(
    stream: &TcpStream,
    ctx: &mut ConnectionContext,
) -> std::io::Result<Vec<Frame>> {
    loop {
        stream.readable().await?;
        let mut buf = [0u8; 4096];
        match stream.try_read(&mut buf) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "closed before the handshake",
                ));
            },
            Ok(n) => match ctx.ingest(&buf[..n]) {
                Ok(frames) => {
                    if !frames.is_empty() {
                        return Ok(frames);
                    }
                },
                Err(e) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e));
                },
            },
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {},
            Err(e) => return Err(e),
        }
    }
}

/// A bare file name with no path components; `None` rejects the name.
fn safe_file_name(name: &str) -> Option<&str> {
    if name.is_empty() || name == ".." || name.contains(['/', '\\']) {
        return None;
    }
    Some(name)
}
