//! Registry of logged-in sessions.
//!
//! Maps case-insensitive usernames to [`SessionHandle`]s. Membership changes
//! push a fresh `ACTIVE_USERS:` roster to everyone online. The lock is only
//! held for map access; queueing to sessions always happens on a snapshot
//! taken under the lock, after it is released.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::connection::{SessionHandle, SessionId};
use crate::protocol::Reply;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("user '{0}' is already logged in")]
    AlreadyRegistered(String),
}

#[derive(Default)]
struct Members {
    /// Ordered by id, i.e. by login order of the live sessions.
    sessions: BTreeMap<SessionId, SessionHandle>,
    /// Lowercased username -> session id.
    by_name: HashMap<String, SessionId>,
}

#[derive(Default)]
pub struct Registry {
    members: Mutex<Members>,
}

fn name_key(username: &str) -> String {
    username.to_lowercase()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a logged-in session. Fails if the name is taken (ignoring
    /// case); the existing entry is never replaced. On success `greeting` is
    /// queued to the newcomer before the roster goes out to everyone.
    pub fn add(&self, session: SessionHandle, greeting: Option<Reply>) -> Result<(), RegistryError> {
        {
            let mut members = self.members.lock();
            let key = name_key(session.username());
            if members.by_name.contains_key(&key) {
                return Err(RegistryError::AlreadyRegistered(session.username().to_string()));
            }
            // Queued before the session becomes visible to broadcasters, so
            // the greeting is the newcomer's first line. `send` never blocks.
            if let Some(greeting) = greeting {
                session.send(greeting);
            }
            members.by_name.insert(key, session.id());
            members.sessions.insert(session.id(), session.clone());
        }
        tracing::info!(
            session_id = %session.id(),
            username = session.username(),
            "User logged in"
        );
        self.broadcast_roster();
        Ok(())
    }

    /// Deregister a session. Safe to call more than once or for sessions
    /// that never logged in; returns whether anything was removed. A
    /// removal is followed by a roster push and a departure notice to the
    /// remaining users.
    pub fn remove(&self, id: SessionId) -> bool {
        let removed = {
            let mut members = self.members.lock();
            let removed = members.sessions.remove(&id);
            if let Some(ref session) = removed {
                let key = name_key(session.username());
                if members.by_name.get(&key) == Some(&id) {
                    members.by_name.remove(&key);
                }
            }
            removed
        };
        let Some(session) = removed else {
            return false;
        };
        tracing::info!(session_id = %id, username = session.username(), "User logged out");
        self.broadcast_roster();
        self.broadcast(&Reply::Departed(session.username().to_string()).to_string());
        true
    }

    /// Point-in-time copy of every logged-in session, in login order.
    pub fn snapshot(&self) -> Vec<SessionHandle> {
        self.members.lock().sessions.values().cloned().collect()
    }

    pub fn find_by_username(&self, username: &str) -> Option<SessionHandle> {
        let members = self.members.lock();
        let id = members.by_name.get(&name_key(username))?;
        members.sessions.get(id).cloned()
    }

    pub fn usernames(&self) -> Vec<String> {
        self.members
            .lock()
            .sessions
            .values()
            .map(|s| s.username().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `line` to every logged-in session. Returns how many accepted it.
    pub fn broadcast(&self, line: &str) -> usize {
        self.snapshot()
            .iter()
            .filter(|session| session.send(line))
            .count()
    }

    fn broadcast_roster(&self) {
        let sessions = self.snapshot();
        let roster = Reply::ActiveUsers(sessions.iter().map(|s| s.username().to_string()).collect()).to_string();
        tracing::debug!(%roster, "Broadcasting roster");
        for session in &sessions {
            session.send(roster.as_str());
        }
    }
}
