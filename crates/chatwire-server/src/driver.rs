//! Server driver.
//!
//! Pure event-to-action logic: the runtime feeds [`ServerEvent`]s in and
//! executes the [`ServerAction`]s that come back. Nothing here touches a
//! socket, so every routing rule is testable with plain frames.
//!
//! The driver is the sole owner of all chat state. The runtime confines
//! it to one task, so no locking is needed anywhere in the server.

use chatwire_proto::{Frame, Payload};

use crate::registry::{LoginOutcome, SessionRegistry};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { max_connections: 10_000 }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the runtime as connections come and go.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted.
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime.
        session_id: u64,
    },

    /// A decoded frame arrived from a connection.
    FrameReceived {
        /// Connection that sent the frame.
        session_id: u64,
        /// The received frame.
        frame: Frame,
    },

    /// A connection was closed (by peer or error).
    ConnectionClosed {
        /// Connection that was closed.
        session_id: u64,
        /// Reason for closure.
        reason: String,
    },
}

/// Actions that the server driver produces.
#[derive(Debug, Clone)]
pub enum ServerAction {
    /// Send a frame to a specific session.
    SendToSession {
        /// Target session ID.
        session_id: u64,
        /// Frame to send.
        frame: Frame,
    },

    /// Broadcast a frame to every logged-in session.
    Broadcast {
        /// Frame to broadcast.
        frame: Frame,
        /// Optional session to exclude (usually the originator).
        exclude: Option<u64>,
    },

    /// Close a connection.
    CloseConnection {
        /// Session to close.
        session_id: u64,
        /// Reason for closure.
        reason: String,
    },

    /// Log a message.
    Log {
        /// Log level.
        level: LogLevel,
        /// Message to log.
        message: String,
    },
}

/// Log levels for server actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational message.
    Info,
    /// Warning.
    Warn,
}

/// Action-based server driver.
///
/// Orchestrates login, broadcast, and private-frame relaying over the
/// session registry.
#[derive(Debug, Default)]
pub struct ServerDriver {
    /// Live connections, logged in or not.
    connections: Vec<u64>,
    /// Name ↔ session registry.
    registry: SessionRegistry,
    /// Server configuration.
    config: ServerConfig,
}

impl ServerDriver {
    /// Create a new server driver.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self { connections: Vec::new(), registry: SessionRegistry::new(), config }
    }

    /// Process a server event and return actions to execute.
    pub fn process_event(&mut self, event: ServerEvent) -> Vec<ServerAction> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                self.handle_connection_accepted(session_id)
            },
            ServerEvent::FrameReceived { session_id, frame } => {
                self.handle_frame_received(session_id, frame)
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                self.handle_connection_closed(session_id, &reason)
            },
        }
    }

    /// Sessions a broadcast fans out to. Used by the action executor.
    pub fn broadcast_targets(&self) -> impl Iterator<Item = u64> + '_ {
        self.registry.logged_in_sessions()
    }

    fn handle_connection_accepted(&mut self, session_id: u64) -> Vec<ServerAction> {
        if self.connections.len() >= self.config.max_connections {
            return vec![ServerAction::CloseConnection {
                session_id,
                reason: "max connections exceeded".to_string(),
            }];
        }

        self.connections.push(session_id);
        vec![ServerAction::Log {
            level: LogLevel::Debug,
            message: format!("connection accepted, session_id={session_id}"),
        }]
    }

    fn handle_connection_closed(&mut self, session_id: u64, reason: &str) -> Vec<ServerAction> {
        self.connections.retain(|id| *id != session_id);

        match self.registry.remove_session(session_id) {
            Some(name) => vec![ServerAction::Log {
                level: LogLevel::Info,
                message: format!("{name} disconnected: {reason}"),
            }],
            None => vec![ServerAction::Log {
                level: LogLevel::Debug,
                message: format!("session {session_id} closed before login: {reason}"),
            }],
        }
    }

    fn handle_frame_received(&mut self, session_id: u64, frame: Frame) -> Vec<ServerAction> {
        match self.registry.name_of(session_id) {
            None => self.handle_pre_login(session_id, frame),
            Some(name) => {
                let name = name.to_string();
                self.handle_logged_in(session_id, &name, frame)
            },
        }
    }

    /// Before login only `Login` does anything; a keepalive is tolerated,
    /// everything else is a protocol violation.
    fn handle_pre_login(&mut self, session_id: u64, frame: Frame) -> Vec<ServerAction> {
        match frame.payload {
            Payload::Login => self.handle_login(session_id, &frame.sender),
            Payload::Noop => Vec::new(),
            other => vec![ServerAction::CloseConnection {
                session_id,
                reason: format!("{:?} before login", other.opcode()),
            }],
        }
    }

    fn handle_login(&mut self, session_id: u64, name: &str) -> Vec<ServerAction> {
        if name.is_empty() {
            return vec![
                ServerAction::SendToSession {
                    session_id,
                    frame: Frame::new("", Payload::LoginRefused),
                },
                ServerAction::Log {
                    level: LogLevel::Warn,
                    message: format!("session {session_id} sent an empty login name"),
                },
            ];
        }

        match self.registry.login(session_id, name) {
            LoginOutcome::Accepted => vec![
                ServerAction::SendToSession {
                    session_id,
                    frame: Frame::new("", Payload::LoginAccepted),
                },
                ServerAction::Log {
                    level: LogLevel::Info,
                    message: format!("{name} logged in (session {session_id})"),
                },
            ],
            LoginOutcome::NameTaken => vec![
                ServerAction::SendToSession {
                    session_id,
                    frame: Frame::new("", Payload::LoginRefused),
                },
                ServerAction::Log {
                    level: LogLevel::Warn,
                    message: format!("login refused for {name}: name in use"),
                },
            ],
            // Unreachable from handle_pre_login; kept for registry misuse.
            LoginOutcome::AlreadyLoggedIn => vec![ServerAction::CloseConnection {
                session_id,
                reason: "second login on one connection".to_string(),
            }],
        }
    }

    fn handle_logged_in(&mut self, session_id: u64, name: &str, frame: Frame) -> Vec<ServerAction> {
        let opcode = frame.opcode();
        match frame.payload {
            Payload::Noop => Vec::new(),

            Payload::Login => vec![ServerAction::CloseConnection {
                session_id,
                reason: "second login on one connection".to_string(),
            }],

            // Sender is always rewritten to the registered name so a
            // client cannot speak as someone else.
            Payload::Public { text } => vec![ServerAction::Broadcast {
                frame: Frame::new(name, Payload::Public { text }),
                exclude: Some(session_id),
            }],

            Payload::GetUsers => vec![ServerAction::SendToSession {
                session_id,
                frame: Frame::new(name, Payload::UsersList {
                    list: self.registry.user_list().join("\n"),
                }),
            }],

            Payload::PrivateRequest { target } => {
                let relayed =
                    Frame::new(name, Payload::PrivateRequest { target: target.clone() });
                self.relay_to(name, &target, relayed)
            },
            Payload::PrivateAccept { target, addr, token } => {
                let relayed = Frame::new(name, Payload::PrivateAccept {
                    target: target.clone(),
                    addr,
                    token,
                });
                self.relay_to(name, &target, relayed)
            },
            Payload::PrivateRefuse { target } => {
                let relayed = Frame::new(name, Payload::PrivateRefuse { target: target.clone() });
                self.relay_to(name, &target, relayed)
            },

            // These never travel client-to-server.
            Payload::LoginAccepted
            | Payload::LoginRefused
            | Payload::UsersList { .. }
            | Payload::SessionOpen { .. }
            | Payload::FileChunk { .. } => vec![ServerAction::CloseConnection {
                session_id,
                reason: format!("{opcode:?} is not a client-to-server frame"),
            }],
        }
    }

    /// Relay a private-negotiation frame to the named target.
    ///
    /// An unknown target drops the frame with a warning; it is not an
    /// error for the sender's connection.
    fn relay_to(&self, from: &str, target: &str, frame: Frame) -> Vec<ServerAction> {
        match self.registry.session_for(target) {
            Some(target_session) => {
                vec![ServerAction::SendToSession { session_id: target_session, frame }]
            },
            None => vec![ServerAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "dropping {:?} from {from}: no user named {target}",
                    frame.opcode()
                ),
            }],
        }
    }
}
