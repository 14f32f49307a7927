//! Login handshake.
//!
//! The first non-empty line of a connection must be
//! `LOGIN:<username>:<password>`. Every outcome other than success sends
//! exactly one reply and ends the connection.

use tokio::io::AsyncRead;

use crate::codec::{Frame, FrameReader};
use crate::protocol::{self, Reply};
use crate::registry::RegistryError;
use crate::server::SharedState;

use super::{CloseReason, Outbox, SessionHandle, next_frame};

pub(super) async fn login<R>(
    outbox: &Outbox,
    frames: &mut FrameReader<R>,
    state: &SharedState,
) -> Result<SessionHandle, CloseReason>
where
    R: AsyncRead + Unpin,
{
    let line = loop {
        match next_frame(frames, outbox).await? {
            None => {
                tracing::info!(session_id = %outbox.id(), peer = outbox.peer(), "Closed before login");
                return Err(CloseReason::PeerClosed);
            }
            Some(Frame::Oversized(len)) => {
                outbox.send(Reply::LoginError("Login message too long.".to_string()));
                tracing::warn!(session_id = %outbox.id(), len, "Oversized login line");
                return Err(CloseReason::LoginRejected("oversized login line"));
            }
            Some(Frame::Line(line)) if line.is_empty() => continue,
            Some(Frame::Line(line)) => break line,
        }
    };

    let request = match protocol::parse_login(&line) {
        Ok(request) => request,
        Err(e) => {
            outbox.send(e.reply());
            tracing::info!(session_id = %outbox.id(), peer = outbox.peer(), "Login rejected: {e}");
            return Err(CloseReason::LoginRejected("malformed login"));
        }
    };

    if !state.credentials.authenticate(&request.username, &request.password) {
        outbox.send(Reply::LoginFailed);
        tracing::info!(
            session_id = %outbox.id(),
            peer = outbox.peer(),
            username = %request.username,
            "Login failed: bad credentials"
        );
        return Err(CloseReason::LoginRejected("bad credentials"));
    }

    let session = SessionHandle::new(request.username, outbox.clone());
    match state.registry.add(session.clone(), Some(Reply::LoginSuccess)) {
        Ok(()) => Ok(session),
        Err(RegistryError::AlreadyRegistered(username)) => {
            outbox.send(Reply::LoginAlreadyLoggedIn);
            tracing::info!(session_id = %outbox.id(), peer = outbox.peer(), %username, "Login refused: already online");
            Err(CloseReason::LoginRejected("already logged in"))
        }
    }
}
