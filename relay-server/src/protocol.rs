//! Wire vocabulary of the relay.
//!
//! Every message is a single line of UTF-8 text. Client lines are parsed
//! into a [`LoginRequest`] during the handshake and into a [`Command`]
//! afterwards; everything the server says is a [`Reply`].

use std::fmt;

pub const LOGIN_PREFIX: &str = "LOGIN:";
pub const ACTIVE_USERS_PREFIX: &str = "ACTIVE_USERS:";
pub const DISCONNECT: &str = "DISCONNECT";

/// A line sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    LoginSuccess,
    LoginFailed,
    LoginAlreadyLoggedIn,
    LoginRequired(String),
    LoginError(String),
    /// Full roster of online users, in login order.
    ActiveUsers(Vec<String>),
    /// Directed message delivered to its recipient.
    Private { from: String, text: String },
    /// Sent to the remaining users when someone leaves.
    Departed(String),
    /// Error or notice meant for one client only.
    Notice(String),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::LoginSuccess => f.write_str("LOGIN_SUCCESS"),
            Reply::LoginFailed => f.write_str("LOGIN_FAILED"),
            Reply::LoginAlreadyLoggedIn => f.write_str("LOGIN_ALREADY_LOGGED_IN"),
            Reply::LoginRequired(msg) => write!(f, "LOGIN_REQUIRED: {msg}"),
            Reply::LoginError(msg) => write!(f, "LOGIN_ERROR: {msg}"),
            Reply::ActiveUsers(users) => write!(f, "{ACTIVE_USERS_PREFIX}{}", users.join(",")),
            Reply::Private { from, text } => write!(f, "[{from}] (private): {text}"),
            Reply::Departed(user) => write!(f, "[{user}] left the chat."),
            Reply::Notice(msg) => write!(f, "Server: {msg}"),
        }
    }
}

impl From<Reply> for String {
    fn from(reply: Reply) -> Self {
        reply.to_string()
    }
}

/// Credentials carried by a `LOGIN:<username>:<password>` line.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    #[error("Please log in first.")]
    NotLogin,
    #[error("Malformed LOGIN message.")]
    Malformed,
}

impl LoginError {
    pub fn reply(&self) -> Reply {
        match self {
            LoginError::NotLogin => Reply::LoginRequired(self.to_string()),
            LoginError::Malformed => Reply::LoginError(self.to_string()),
        }
    }
}

/// Parse the first line of a connection. The password is everything after
/// the second `:`, so it may contain `:` itself.
pub fn parse_login(line: &str) -> Result<LoginRequest, LoginError> {
    if !line.starts_with(LOGIN_PREFIX) {
        return Err(LoginError::NotLogin);
    }
    let mut parts = line.splitn(3, ':');
    let _prefix = parts.next();
    match (parts.next(), parts.next()) {
        (Some(username), Some(password)) => Ok(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        }),
        _ => Err(LoginError::Malformed),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectError {
    #[error("Malformed private message. Usage: @username message")]
    MissingText,
    #[error("Malformed private message. No recipient after '@'.")]
    MissingRecipient,
}

/// A line received from an authenticated client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Disconnect,
    Direct { recipient: &'a str, text: &'a str },
    BadDirect(DirectError),
    Broadcast(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(line: &'a str) -> Self {
        if line.eq_ignore_ascii_case(DISCONNECT) {
            return Command::Disconnect;
        }
        let Some(rest) = line.strip_prefix('@') else {
            return Command::Broadcast(line);
        };
        let Some((recipient, text)) = rest.split_once(' ') else {
            return Command::BadDirect(DirectError::MissingText);
        };
        if recipient.trim().is_empty() {
            return Command::BadDirect(DirectError::MissingRecipient);
        }
        Command::Direct { recipient, text }
    }
}
