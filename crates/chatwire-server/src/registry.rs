//! Session registry for display-name tracking.
//!
//! The registry maintains bidirectional mappings: session → name (for
//! attribution and cleanup) and name → session (for routing private
//! frames to their target). This enables O(1) lookups in both directions
//! and enforces one session per display name.

use std::collections::HashMap;

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// The name was free and is now bound to this session.
    Accepted,
    /// Another live session already owns the name.
    NameTaken,
    /// This session already logged in under another name.
    AlreadyLoggedIn,
}

/// Registry of logged-in sessions.
///
/// Maintains bidirectional mappings for efficient lookups:
/// - Get the name behind a session (for attribution on relayed frames)
/// - Get the session behind a name (for private-frame routing)
/// - Enforces name uniqueness across live connections
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Session ID → display name
    names: HashMap<u64, String>,
    /// Display name → session ID (reverse index)
    sessions: HashMap<String, u64>,
}

impl SessionRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to bind `name` to `session_id`.
    pub fn login(&mut self, session_id: u64, name: &str) -> LoginOutcome {
        if self.names.contains_key(&session_id) {
            return LoginOutcome::AlreadyLoggedIn;
        }
        if self.sessions.contains_key(name) {
            return LoginOutcome::NameTaken;
        }
        self.names.insert(session_id, name.to_string());
        self.sessions.insert(name.to_string(), session_id);
        LoginOutcome::Accepted
    }

    /// Remove a session, releasing its name for reuse.
    ///
    /// Returns the name the session was logged in under, if any.
    pub fn remove_session(&mut self, session_id: u64) -> Option<String> {
        let name = self.names.remove(&session_id)?;
        self.sessions.remove(&name);
        Some(name)
    }

    /// Name a session logged in under. `None` before login.
    #[must_use]
    pub fn name_of(&self, session_id: u64) -> Option<&str> {
        self.names.get(&session_id).map(String::as_str)
    }

    /// Session currently owning a name. O(1) via the reverse index.
    #[must_use]
    pub fn session_for(&self, name: &str) -> Option<u64> {
        self.sessions.get(name).copied()
    }

    /// All logged-in names, sorted for a stable listing.
    #[must_use]
    pub fn user_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.keys().cloned().collect();
        names.sort();
        names
    }

    /// All logged-in sessions, for broadcast fan-out.
    pub fn logged_in_sessions(&self) -> impl Iterator<Item = u64> + '_ {
        self.names.keys().copied()
    }

    /// Number of logged-in sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.names.len()
    }
}
