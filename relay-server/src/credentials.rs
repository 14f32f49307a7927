//! Plaintext credential store.
//!
//! Loaded once at start-up from a flat file with one `username:password`
//! record per line. Lookups are exact-match on both fields. Loading never
//! fails hard: an unreadable file yields an empty store and bad lines are
//! skipped, each with a warning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read credential file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: expected `username:password`")]
    Malformed { line: usize },
    #[error("line {line}: empty username or password")]
    EmptyField { line: usize },
}

#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from `path`. Read failures are logged and produce an
    /// empty store.
    pub fn load(path: impl AsRef<Path>) -> Self {
        match Self::try_load(path.as_ref()) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!("{e}; starting with no users");
                Self::default()
            }
        }
    }

    /// Like [`CredentialStore::load`], but reports an unreadable file.
    pub fn try_load(path: &Path) -> Result<Self, CredentialError> {
        tracing::info!(path = %path.display(), "Loading credentials");
        let contents = std::fs::read_to_string(path).map_err(|source| CredentialError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    /// Parse file contents. Blank lines are ignored; malformed lines and
    /// repeated usernames are logged and skipped (first occurrence wins).
    pub fn parse(contents: &str) -> Self {
        let mut users = HashMap::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = idx + 1;
            match parse_record(raw, line) {
                Ok(Some((username, password))) => {
                    if users.contains_key(&username) {
                        tracing::warn!(line, %username, "Duplicate username in credential file, keeping first");
                        continue;
                    }
                    users.insert(username, password);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping credential record: {e}"),
            }
        }
        tracing::info!(count = users.len(), "Credentials loaded");
        Self { users }
    }

    /// Build a store from explicit pairs, with the same first-wins rule.
    pub fn from_pairs<I, U, P>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: Into<String>,
        P: Into<String>,
    {
        let mut users = HashMap::new();
        for (u, p) in pairs {
            users.entry(u.into()).or_insert_with(|| p.into());
        }
        Self { users }
    }

    /// True iff `username` exists and its password is exactly `password`.
    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        let ok = self.users.get(username).is_some_and(|stored| stored == password);
        tracing::debug!(%username, ok, "Credential check");
        ok
    }

    pub fn contains_user(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn parse_record(raw: &str, line: usize) -> Result<Option<(String, String)>, CredentialError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let parts: Vec<&str> = raw.split(':').collect();
    let [username, password] = parts.as_slice() else {
        return Err(CredentialError::Malformed { line });
    };
    let (username, password) = (username.trim(), password.trim());
    if username.is_empty() || password.is_empty() {
        return Err(CredentialError::EmptyField { line });
    }
    Ok(Some((username.to_string(), password.to_string())))
}
