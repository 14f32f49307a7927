//! Per-client connection handler.
//!
//! Each accepted socket runs as its own task through the states
//! `Authenticating → Authenticated → Closed`:
//! - [`handshake`] reads the `LOGIN` line and registers the user
//! - [`routing`] dispatches every later line
//! - [`outbox`] holds the send side; a dedicated writer task owns the
//!   socket's write half so lines from different senders never interleave
//!
//! Whatever ends the session (`DISCONNECT`, end of stream, I/O error, a
//! rejected login, an overflowing outbound queue), cleanup is the same:
//! deregister, let the writer flush what is queued, shut the socket down.

mod handshake;
mod outbox;
pub mod routing;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::codec::{self, Frame, FrameReader, TransportError};
use crate::protocol::Reply;
use crate::server::SharedState;

pub use outbox::{Kicker, Outbox, SessionHandle, SessionId};
pub use routing::Route;

/// Most queued lines the writer sends before it flushes.
const WRITE_BATCH: usize = 64;

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The client sent `DISCONNECT`.
    Disconnect,
    /// End of stream.
    PeerClosed,
    /// Read failed.
    Transport(TransportError),
    /// Handshake did not succeed; the client was told why.
    LoginRejected(&'static str),
    /// The outbound queue overflowed or the writer failed.
    Kicked,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Disconnect => f.write_str("client disconnected"),
            CloseReason::PeerClosed => f.write_str("connection closed by peer"),
            CloseReason::Transport(e) => write!(f, "{e}"),
            CloseReason::LoginRejected(why) => write!(f, "login rejected ({why})"),
            CloseReason::Kicked => f.write_str("dropped: client not keeping up"),
        }
    }
}

impl From<TransportError> for CloseReason {
    fn from(e: TransportError) -> Self {
        CloseReason::Transport(e)
    }
}

/// Handle an accepted TCP connection.
pub async fn handle(stream: TcpStream, state: Arc<SharedState>) -> Result<()> {
    let peer = stream.peer_addr()?.to_string();
    let (reader, writer) = stream.into_split();
    handle_io(reader, writer, peer, state).await
}

/// Handle any bidirectional stream (used by tests with in-memory pipes).
pub async fn handle_generic<S>(stream: S, peer: impl Into<String>, state: Arc<SharedState>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    handle_io(reader, writer, peer.into(), state).await
}

async fn handle_io<R, W>(reader: R, writer: W, peer: String, state: Arc<SharedState>) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = SessionId::next();
    tracing::info!(session_id = %id, %peer, "New connection");

    let (outbox, rx) = Outbox::channel(id, peer.as_str(), state.config.outbound_queue);
    let mut write_task = tokio::spawn(write_loop(writer, rx, id, outbox.kicker()));
    let mut frames = FrameReader::new(reader, state.config.max_line_len);

    let (username, reason) = match handshake::login(&outbox, &mut frames, &state).await {
        Ok(session) => {
            let reason = message_loop(&session, &mut frames, &state).await;
            (Some(session.username().to_string()), reason)
        }
        Err(reason) => (None, reason),
    };

    // A no-op unless this session is the one registered under its name.
    state.registry.remove(id);

    // The writer exits once every sender is gone: ours, plus any snapshot
    // clone a router is still holding.
    drop(outbox);
    match tokio::time::timeout(state.config.drain_timeout(), &mut write_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(session_id = %id, "Writer task failed: {e}"),
        Err(_) => {
            tracing::warn!(session_id = %id, "Timed out flushing replies, aborting writer");
            write_task.abort();
        }
    }

    tracing::info!(
        session_id = %id,
        %peer,
        username = username.as_deref().unwrap_or("-"),
        reason = %reason,
        "Connection closed"
    );
    Ok(())
}

async fn message_loop<R>(session: &SessionHandle, frames: &mut FrameReader<R>, state: &SharedState) -> CloseReason
where
    R: AsyncRead + Unpin,
{
    let max_line_len = state.config.max_line_len;
    loop {
        let frame = match next_frame(frames, session.outbox()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return CloseReason::PeerClosed,
            Err(reason) => return reason,
        };
        let line = match frame {
            Frame::Line(line) => line,
            Frame::Oversized(len) => {
                tracing::warn!(session_id = %session.id(), len, "Oversized line dropped");
                session.send(Reply::Notice(format!(
                    "Message too long ({len} bytes), the limit is {max_line_len} bytes."
                )));
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        tracing::debug!(session_id = %session.id(), username = session.username(), "<- {line}");
        if routing::route(session, &line, &state.registry) == Route::Disconnect {
            return CloseReason::Disconnect;
        }
    }
}

/// Read the next frame unless the session gets kicked first.
async fn next_frame<R>(frames: &mut FrameReader<R>, outbox: &Outbox) -> Result<Option<Frame>, CloseReason>
where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        biased;
        _ = outbox.kicked() => Err(CloseReason::Kicked),
        frame = frames.next_frame() => Ok(frame?),
    }
}

/// Sole writer of a socket. Drains the queue in order, batching writes
/// between flushes, and shuts the write half down once every sender is
/// gone. A write failure kicks the session so its reader stops too.
async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<String>, id: SessionId, kicker: Kicker)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let mut result = codec::write_line(&mut writer, &line).await;
        let mut batched = 0;
        while result.is_ok() && batched < WRITE_BATCH {
            let Ok(queued) = rx.try_recv() else { break };
            result = codec::write_line(&mut writer, &queued).await;
            batched += 1;
        }
        if result.is_ok() {
            result = writer.flush().await.map_err(TransportError::from);
        }
        if let Err(e) = result {
            tracing::warn!(session_id = %id, "Write error: {e}");
            kicker.kick();
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(session_id = %id, "Shutdown error: {e}");
    }
}
