//! Console command parsing.
//!
//! A line starting with `/` is a command; anything else is a public
//! message. Commands:
//!
//! ```text
//! /users                 list logged-in users
//! /request <name>        ask <name> for a private session
//! /accept <name>         accept a pending request from <name>
//! /refuse <name>         refuse a pending request from <name>
//! /send <name> <path>    send a file over the open session with <name>
//! /quit                  disconnect and exit
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Broadcast a message to every logged-in user.
    Public(String),
    /// List logged-in users.
    Users,
    /// Request a private session with a user.
    Request(String),
    /// Accept a pending private-session request.
    Accept(String),
    /// Refuse a pending private-session request.
    Refuse(String),
    /// Send a file over an open private session.
    SendFile {
        /// Peer to send to.
        peer: String,
        /// Local file to send.
        path: PathBuf,
    },
    /// Disconnect and exit.
    Quit,
}

/// Command lines that do not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The line was empty or whitespace.
    #[error("empty line")]
    Empty,

    /// The `/command` is not one of the known commands.
    #[error("unknown command /{0}")]
    Unknown(String),

    /// A required argument is missing.
    #[error("usage: {0}")]
    Usage(&'static str),
}

impl Command {
    /// Parse one console line.
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Empty);
        }

        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Public(line.to_string()));
        };

        let mut words = rest.split_whitespace();
        let command = words.next().unwrap_or_default();
        match command {
            "users" => Ok(Self::Users),
            "quit" => Ok(Self::Quit),
            "request" => one_name(words.next(), "/request <name>").map(Self::Request),
            "accept" => one_name(words.next(), "/accept <name>").map(Self::Accept),
            "refuse" => one_name(words.next(), "/refuse <name>").map(Self::Refuse),
            "send" => {
                let usage = "/send <name> <path>";
                let peer = one_name(words.next(), usage)?;
                let path = one_name(words.next(), usage)?;
                Ok(Self::SendFile { peer, path: PathBuf::from(path) })
            },
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn one_name(word: Option<&str>, usage: &'static str) -> Result<String, CommandError> {
    word.map(str::to_string).ok_or(CommandError::Usage(usage))
}
