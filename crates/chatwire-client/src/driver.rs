//! Client state machine.
//!
//! Pure event-to-action logic for one chat session: the runtime feeds in
//! server frames, console commands, and direct-socket notifications, and
//! executes the actions that come back. Nothing here performs I/O, so
//! every rule about login, session negotiation, and send gating is
//! testable with plain values.

use std::{collections::HashSet, net::SocketAddr, path::PathBuf};

use chatwire_proto::{Frame, Payload};

use crate::command::Command;

/// Events the client driver processes.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The server socket is up; time to log in.
    Connected,
    /// A decoded frame arrived from the server.
    ServerFrame(Frame),
    /// The server socket is gone.
    ServerClosed {
        /// Reason for closure.
        reason: String,
    },
    /// The user typed a command.
    Command(Command),
    /// A direct socket completed its token handshake.
    DirectOpened {
        /// Peer on the other end.
        peer: String,
    },
    /// A direct socket is gone.
    DirectClosed {
        /// Peer that was on the other end.
        peer: String,
        /// Reason for closure.
        reason: String,
    },
    /// A file finished assembling on a direct socket.
    FileReceived {
        /// Peer that sent it.
        peer: String,
        /// File name as received.
        name: String,
    },
}

/// Actions the client driver produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Send a frame on the server socket.
    SendToServer(Frame),
    /// Show a line to the user.
    Display(String),
    /// Arm the direct listener to expect a peer presenting this token.
    ExpectDirect {
        /// Peer the token was handed to.
        peer: String,
        /// Token the peer must present.
        token: u64,
    },
    /// Dial a peer's direct listener and present the token.
    ConnectDirect {
        /// Peer to connect to.
        peer: String,
        /// Peer's advertised listen address.
        addr: SocketAddr,
        /// Token to present.
        token: u64,
    },
    /// Send a file over the open session with a peer.
    SendFile {
        /// Peer with an open session.
        peer: String,
        /// Local file to send.
        path: PathBuf,
    },
    /// Log a message.
    Log {
        /// Log level.
        level: LogLevel,
        /// Message to log.
        message: String,
    },
    /// Disconnect and exit.
    Quit,
}

/// Log levels for client actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Warning.
    Warn,
}

/// Action-based chat client.
///
/// Tracks login state, pending private-session requests in both
/// directions, and which peers have an open direct session.
#[derive(Debug)]
pub struct ClientDriver {
    /// Display name to log in under.
    name: String,
    /// Direct listen address advertised in accept frames.
    direct_addr: SocketAddr,
    /// Whether the server accepted our login.
    logged_in: bool,
    /// Peers we received a request from, awaiting /accept or /refuse.
    pending_in: HashSet<String>,
    /// Peers we sent a request to, awaiting their answer.
    pending_out: HashSet<String>,
    /// Peers with an open direct session.
    open_peers: HashSet<String>,
}

impl ClientDriver {
    /// Create a driver that will log in as `name` and advertise
    /// `direct_addr` when accepting private sessions.
    #[must_use]
    pub fn new(name: impl Into<String>, direct_addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            direct_addr,
            logged_in: false,
            pending_in: HashSet::new(),
            pending_out: HashSet::new(),
            open_peers: HashSet::new(),
        }
    }

    /// Display name this client logs in under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the server accepted our login.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Process an event and return actions to execute.
    pub fn process_event(&mut self, event: ClientEvent) -> Vec<ClientAction> {
        match event {
            ClientEvent::Connected => vec![
                ClientAction::Log {
                    level: LogLevel::Debug,
                    message: format!("logging in as {}", self.name),
                },
                ClientAction::SendToServer(Frame::new(&self.name, Payload::Login)),
            ],
            ClientEvent::ServerFrame(frame) => self.handle_server_frame(frame),
            ClientEvent::ServerClosed { reason } => vec![
                ClientAction::Display(format!("* disconnected from server: {reason}")),
                ClientAction::Quit,
            ],
            ClientEvent::Command(command) => self.handle_command(command),
            ClientEvent::DirectOpened { peer } => {
                self.open_peers.insert(peer.clone());
                vec![ClientAction::Display(format!("* private session with {peer} is open"))]
            },
            ClientEvent::DirectClosed { peer, reason } => {
                self.open_peers.remove(&peer);
                vec![ClientAction::Display(format!(
                    "* private session with {peer} closed: {reason}"
                ))]
            },
            ClientEvent::FileReceived { peer, name } => {
                vec![ClientAction::Display(format!("* received {name} from {peer}"))]
            },
        }
    }

    fn handle_server_frame(&mut self, frame: Frame) -> Vec<ClientAction> {
        let sender = frame.sender;
        match frame.payload {
            Payload::LoginAccepted => {
                self.logged_in = true;
                vec![ClientAction::Display(format!("* logged in as {}", self.name))]
            },

            // Fatal: the user picks another name by restarting.
            Payload::LoginRefused => vec![
                ClientAction::Display(format!("* login refused: {} is already in use", self.name)),
                ClientAction::Quit,
            ],

            Payload::Public { text } => vec![ClientAction::Display(format!("{sender}: {text}"))],

            Payload::UsersList { list } => {
                vec![ClientAction::Display(format!("* users:\n{list}"))]
            },

            Payload::PrivateRequest { .. } => {
                self.pending_in.insert(sender.clone());
                vec![ClientAction::Display(format!(
                    "* {sender} wants a private session (/accept {sender} or /refuse {sender})"
                ))]
            },

            Payload::PrivateAccept { addr, token, .. } => {
                if self.pending_out.remove(&sender) {
                    vec![
                        ClientAction::Display(format!("* {sender} accepted, connecting")),
                        ClientAction::ConnectDirect { peer: sender, addr, token },
                    ]
                } else {
                    vec![ClientAction::Log {
                        level: LogLevel::Warn,
                        message: format!("ignoring accept from {sender}: nothing was requested"),
                    }]
                }
            },

            Payload::PrivateRefuse { .. } => {
                self.pending_out.remove(&sender);
                vec![ClientAction::Display(format!("* {sender} refused the private session"))]
            },

            Payload::Noop => Vec::new(),

            other => vec![ClientAction::Log {
                level: LogLevel::Warn,
                message: format!("ignoring unexpected {:?} frame from the server", other.opcode()),
            }],
        }
    }

    fn handle_command(&mut self, command: Command) -> Vec<ClientAction> {
        if !self.logged_in && !matches!(command, Command::Quit) {
            return vec![ClientAction::Display("* not logged in yet".to_string())];
        }

        match command {
            Command::Public(text) => {
                vec![ClientAction::SendToServer(Frame::new(&self.name, Payload::Public { text }))]
            },

            Command::Users => {
                vec![ClientAction::SendToServer(Frame::new(&self.name, Payload::GetUsers))]
            },

            Command::Request(peer) => {
                if peer == self.name {
                    return vec![ClientAction::Display(
                        "* cannot open a private session with yourself".to_string(),
                    )];
                }
                self.pending_out.insert(peer.clone());
                vec![ClientAction::SendToServer(Frame::new(
                    &self.name,
                    Payload::PrivateRequest { target: peer },
                ))]
            },

            Command::Accept(peer) => {
                if !self.pending_in.remove(&peer) {
                    return vec![ClientAction::Display(format!(
                        "* no pending request from {peer}"
                    ))];
                }
                let token = rand::random::<u64>();
                vec![
                    ClientAction::ExpectDirect { peer: peer.clone(), token },
                    ClientAction::SendToServer(Frame::new(&self.name, Payload::PrivateAccept {
                        target: peer,
                        addr: self.direct_addr,
                        token,
                    })),
                ]
            },

            Command::Refuse(peer) => {
                if !self.pending_in.remove(&peer) {
                    return vec![ClientAction::Display(format!(
                        "* no pending request from {peer}"
                    ))];
                }
                vec![ClientAction::SendToServer(Frame::new(
                    &self.name,
                    Payload::PrivateRefuse { target: peer },
                ))]
            },

            Command::SendFile { peer, path } => {
                if !self.open_peers.contains(&peer) {
                    return vec![ClientAction::Display(format!(
                        "* no open session with {peer} (/request {peer} first)"
                    ))];
                }
                vec![ClientAction::SendFile { peer, path }]
            },

            Command::Quit => vec![ClientAction::Quit],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "192.168.1.10:4040".parse().unwrap()
    }

    fn logged_in(name: &str) -> ClientDriver {
        let mut driver = ClientDriver::new(name, addr());
        driver.process_event(ClientEvent::Connected);
        driver.process_event(ClientEvent::ServerFrame(Frame::new("", Payload::LoginAccepted)));
        assert!(driver.is_logged_in());
        driver
    }

    #[test]
    fn connecting_sends_login() {
        let mut driver = ClientDriver::new("alice", addr());
        let actions = driver.process_event(ClientEvent::Connected);
        assert!(actions.contains(&ClientAction::SendToServer(Frame::new(
            "alice",
            Payload::Login
        ))));
    }

    #[test]
    fn refused_login_quits() {
        let mut driver = ClientDriver::new("alice", addr());
        driver.process_event(ClientEvent::Connected);

        let actions =
            driver.process_event(ClientEvent::ServerFrame(Frame::new("", Payload::LoginRefused)));
        assert_eq!(actions.last(), Some(&ClientAction::Quit));
        assert!(!driver.is_logged_in());
    }

    #[test]
    fn commands_are_gated_on_login() {
        let mut driver = ClientDriver::new("alice", addr());
        let actions =
            driver.process_event(ClientEvent::Command(Command::Public("hi".to_string())));
        assert_eq!(actions, vec![ClientAction::Display("* not logged in yet".to_string())]);
    }

    #[test]
    fn public_messages_go_to_the_server() {
        let mut driver = logged_in("alice");
        let actions =
            driver.process_event(ClientEvent::Command(Command::Public("hi".to_string())));
        assert_eq!(actions, vec![ClientAction::SendToServer(Frame::new(
            "alice",
            Payload::Public { text: "hi".to_string() },
        ))]);
    }

    #[test]
    fn accept_arms_the_listener_with_the_advertised_token() {
        let mut driver = logged_in("alice");
        driver.process_event(ClientEvent::ServerFrame(Frame::new(
            "bob",
            Payload::PrivateRequest { target: "alice".to_string() },
        )));

        let actions = driver.process_event(ClientEvent::Command(Command::Accept(
            "bob".to_string(),
        )));

        let [
            ClientAction::ExpectDirect { peer, token },
            ClientAction::SendToServer(frame),
        ] = actions.as_slice()
        else {
            panic!("expected expect + accept, got {actions:?}");
        };
        assert_eq!(peer, "bob");
        assert_eq!(frame.payload, Payload::PrivateAccept {
            target: "bob".to_string(),
            addr: addr(),
            token: *token,
        });
    }

    #[test]
    fn accept_without_a_pending_request_does_nothing() {
        let mut driver = logged_in("alice");
        let actions = driver.process_event(ClientEvent::Command(Command::Accept(
            "bob".to_string(),
        )));
        assert_eq!(actions, vec![ClientAction::Display(
            "* no pending request from bob".to_string()
        )]);
    }

    #[test]
    fn accept_frame_connects_only_after_a_request() {
        let mut driver = logged_in("alice");

        // Unsolicited accept is dropped.
        let actions = driver.process_event(ClientEvent::ServerFrame(Frame::new(
            "mallory",
            Payload::PrivateAccept { target: "alice".to_string(), addr: addr(), token: 1 },
        )));
        assert!(!actions.iter().any(|a| matches!(a, ClientAction::ConnectDirect { .. })));

        // After a request it dials.
        driver.process_event(ClientEvent::Command(Command::Request("bob".to_string())));
        let actions = driver.process_event(ClientEvent::ServerFrame(Frame::new(
            "bob",
            Payload::PrivateAccept { target: "alice".to_string(), addr: addr(), token: 42 },
        )));
        assert!(actions.contains(&ClientAction::ConnectDirect {
            peer: "bob".to_string(),
            addr: addr(),
            token: 42,
        }));
    }

    #[test]
    fn refuse_answers_the_requester() {
        let mut driver = logged_in("alice");
        driver.process_event(ClientEvent::ServerFrame(Frame::new(
            "bob",
            Payload::PrivateRequest { target: "alice".to_string() },
        )));

        let actions = driver.process_event(ClientEvent::Command(Command::Refuse(
            "bob".to_string(),
        )));
        assert_eq!(actions, vec![ClientAction::SendToServer(Frame::new(
            "alice",
            Payload::PrivateRefuse { target: "bob".to_string() },
        ))]);
    }

    #[test]
    fn send_requires_an_open_session() {
        let mut driver = logged_in("alice");

        let command =
            Command::SendFile { peer: "bob".to_string(), path: PathBuf::from("notes.txt") };
        let actions = driver.process_event(ClientEvent::Command(command.clone()));
        assert!(matches!(actions.as_slice(), [ClientAction::Display(_)]));

        driver.process_event(ClientEvent::DirectOpened { peer: "bob".to_string() });
        let actions = driver.process_event(ClientEvent::Command(command));
        assert_eq!(actions, vec![ClientAction::SendFile {
            peer: "bob".to_string(),
            path: PathBuf::from("notes.txt"),
        }]);
    }

    #[test]
    fn closed_session_gates_send_again() {
        let mut driver = logged_in("alice");
        driver.process_event(ClientEvent::DirectOpened { peer: "bob".to_string() });
        driver.process_event(ClientEvent::DirectClosed {
            peer: "bob".to_string(),
            reason: "peer closed".to_string(),
        });

        let actions = driver.process_event(ClientEvent::Command(Command::SendFile {
            peer: "bob".to_string(),
            path: PathBuf::from("notes.txt"),
        }));
        assert!(matches!(actions.as_slice(), [ClientAction::Display(_)]));
    }

    #[test]
    fn losing_the_server_quits() {
        let mut driver = logged_in("alice");
        let actions = driver.process_event(ClientEvent::ServerClosed {
            reason: "peer closed".to_string(),
        });
        assert_eq!(actions.last(), Some(&ClientAction::Quit));
    }

    #[test]
    fn requesting_yourself_is_refused_locally() {
        let mut driver = logged_in("alice");
        let actions = driver.process_event(ClientEvent::Command(Command::Request(
            "alice".to_string(),
        )));
        assert!(matches!(actions.as_slice(), [ClientAction::Display(_)]));
    }
}
