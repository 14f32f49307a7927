//! Send side of a connection.
//!
//! Every socket has exactly one writer task, fed by a bounded queue. An
//! [`Outbox`] is a cloneable sender into that queue; a [`SessionHandle`] is
//! an outbox bound to a logged-in username. Neither owns the socket:
//! dropping or removing a handle never closes the connection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Notify, mpsc};

/// Process-unique connection id, increasing in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        SessionId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Clone)]
pub struct Outbox {
    id: SessionId,
    peer: Arc<str>,
    tx: mpsc::Sender<String>,
    kick: Arc<Notify>,
}

impl Outbox {
    /// Create an outbox and the receiving end its writer task drains.
    pub fn channel(id: SessionId, peer: impl Into<Arc<str>>, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let outbox = Self {
            id,
            peer: peer.into(),
            tx,
            kick: Arc::new(Notify::new()),
        };
        (outbox, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue one line without waiting. Returns false if the line was
    /// dropped. A full queue means the client is not keeping up: the owning
    /// session is told to close.
    pub fn send(&self, line: impl Into<String>) -> bool {
        match self.tx.try_send(line.into()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(session_id = %self.id, peer = %self.peer, "Outbound queue full, dropping client");
                self.kick();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(session_id = %self.id, "Outbound queue closed");
                false
            }
        }
    }

    /// Ask the owning session to close.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// A kick-only handle that does not keep the queue open.
    pub fn kicker(&self) -> Kicker {
        Kicker(Arc::clone(&self.kick))
    }

    /// Resolves once [`Outbox::kick`] has been called on any clone.
    pub async fn kicked(&self) {
        self.kick.notified().await;
    }
}

impl fmt::Debug for Outbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outbox")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Kicker(Arc<Notify>);

impl Kicker {
    pub fn kick(&self) {
        self.0.notify_one();
    }
}

/// An authenticated session as seen by the registry and the router.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    username: Arc<str>,
    outbox: Outbox,
}

impl SessionHandle {
    pub fn new(username: impl Into<Arc<str>>, outbox: Outbox) -> Self {
        Self {
            username: username.into(),
            outbox,
        }
    }

    pub fn id(&self) -> SessionId {
        self.outbox.id()
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn send(&self, line: impl Into<String>) -> bool {
        self.outbox.send(line)
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn ids_increase() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(a < b);
    }

    #[tokio::test]
    async fn send_queues_in_order() {
        let (outbox, mut rx) = Outbox::channel(SessionId::next(), "127.0.0.1:1", 8);
        assert!(outbox.send("one"));
        assert!(outbox.clone().send("two"));
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn full_queue_kicks_owner() {
        let (outbox, _rx) = Outbox::channel(SessionId::next(), "127.0.0.1:1", 1);
        assert!(outbox.send("fits"));
        assert!(!outbox.send("overflows"));
        tokio::time::timeout(Duration::from_secs(1), outbox.kicked())
            .await
            .expect("overflow should kick the session");
    }

    #[tokio::test]
    async fn kicker_wakes_session_without_holding_queue() {
        let (outbox, mut rx) = Outbox::channel(SessionId::next(), "127.0.0.1:1", 4);
        let kicker = outbox.kicker();
        kicker.kick();
        tokio::time::timeout(Duration::from_secs(1), outbox.kicked())
            .await
            .expect("kicker should wake the session");
        drop(outbox);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn closed_queue_drops_quietly() {
        let (outbox, rx) = Outbox::channel(SessionId::next(), "127.0.0.1:1", 4);
        drop(rx);
        assert!(!outbox.send("nobody home"));
    }
}
