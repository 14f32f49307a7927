//! Message routing for logged-in sessions.
//!
//! Public lines go to everyone online, sender included. `@user text` goes to
//! exactly one user. Problems are reported to the sender alone as a
//! `Server:` notice. Delivery is fire-and-forget per recipient: one full or
//! closed queue never stops delivery to the rest and is never reported back.

use crate::protocol::{Command, Reply};
use crate::registry::Registry;

use super::SessionHandle;

/// What the router did with a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The client asked to leave; nothing was sent.
    Disconnect,
    /// Sent to every logged-in session; `recipients` accepted it.
    Broadcast { recipients: usize },
    /// Delivered to one user.
    Private { recipient: String },
    /// Named user is not online; the sender was told.
    NotFound { recipient: String },
    /// Bad `@` syntax; the sender was told.
    Malformed,
}

pub fn route(sender: &SessionHandle, line: &str, registry: &Registry) -> Route {
    match Command::parse(line) {
        Command::Disconnect => Route::Disconnect,
        Command::Broadcast(text) => {
            let recipients = registry.broadcast(text);
            tracing::debug!(from = sender.username(), recipients, "Broadcast");
            Route::Broadcast { recipients }
        }
        Command::Direct { recipient, text } => match registry.find_by_username(recipient) {
            Some(target) => {
                target.send(Reply::Private {
                    from: sender.username().to_string(),
                    text: text.to_string(),
                });
                tracing::debug!(from = sender.username(), to = target.username(), "Private message");
                Route::Private {
                    recipient: target.username().to_string(),
                }
            }
            None => {
                sender.send(Reply::Notice(format!("user '{recipient}' not found or offline")));
                tracing::debug!(from = sender.username(), to = recipient, "Private message to unknown user");
                Route::NotFound {
                    recipient: recipient.to_string(),
                }
            }
        },
        Command::BadDirect(e) => {
            sender.send(Reply::Notice(e.to_string()));
            Route::Malformed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Outbox, SessionId};
    use tokio::sync::mpsc;

    struct Online {
        registry: Registry,
        alice: SessionHandle,
        alice_rx: mpsc::Receiver<String>,
        bob: SessionHandle,
        bob_rx: mpsc::Receiver<String>,
        carol_rx: mpsc::Receiver<String>,
    }

    fn session(name: &str) -> (SessionHandle, mpsc::Receiver<String>) {
        let (outbox, rx) = Outbox::channel(SessionId::next(), "127.0.0.1:1", 64);
        (SessionHandle::new(name, outbox), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    fn online() -> Online {
        let registry = Registry::new();
        let (alice, mut alice_rx) = session("alice");
        let (bob, mut bob_rx) = session("bob");
        let (carol, mut carol_rx) = session("carol");
        registry.add(alice.clone(), None).unwrap();
        registry.add(bob.clone(), None).unwrap();
        registry.add(carol, None).unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);
        drain(&mut carol_rx);
        Online { registry, alice, alice_rx, bob, bob_rx, carol_rx }
    }

    #[test]
    fn broadcast_reaches_everyone_including_sender() {
        let mut o = online();
        assert_eq!(route(&o.alice, "hi all", &o.registry), Route::Broadcast { recipients: 3 });
        assert_eq!(drain(&mut o.alice_rx), ["hi all"]);
        assert_eq!(drain(&mut o.bob_rx), ["hi all"]);
        assert_eq!(drain(&mut o.carol_rx), ["hi all"]);
    }

    #[test]
    fn private_reaches_only_recipient() {
        let mut o = online();
        assert_eq!(
            route(&o.bob, "@alice yo", &o.registry),
            Route::Private { recipient: "alice".to_string() }
        );
        assert_eq!(drain(&mut o.alice_rx), ["[bob] (private): yo"]);
        assert!(drain(&mut o.bob_rx).is_empty());
        assert!(drain(&mut o.carol_rx).is_empty());
    }

    #[test]
    fn private_lookup_ignores_case() {
        let mut o = online();
        route(&o.alice, "@BOB hello there", &o.registry);
        assert_eq!(drain(&mut o.bob_rx), ["[alice] (private): hello there"]);
    }

    #[test]
    fn unknown_recipient_answers_sender_only() {
        let mut o = online();
        assert_eq!(
            route(&o.alice, "@dave hi", &o.registry),
            Route::NotFound { recipient: "dave".to_string() }
        );
        assert_eq!(drain(&mut o.alice_rx), ["Server: user 'dave' not found or offline"]);
        assert!(drain(&mut o.bob_rx).is_empty());
        assert!(drain(&mut o.carol_rx).is_empty());
    }

    #[test]
    fn malformed_private_never_broadcasts() {
        let mut o = online();
        assert_eq!(route(&o.alice, "@bob", &o.registry), Route::Malformed);
        assert_eq!(route(&o.alice, "@ hi", &o.registry), Route::Malformed);
        let replies = drain(&mut o.alice_rx);
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|r| r.starts_with("Server: Malformed private message")));
        assert!(drain(&mut o.bob_rx).is_empty());
        assert!(drain(&mut o.carol_rx).is_empty());
    }

    #[test]
    fn disconnect_sends_nothing() {
        let mut o = online();
        assert_eq!(route(&o.alice, "disconnect", &o.registry), Route::Disconnect);
        assert!(drain(&mut o.alice_rx).is_empty());
        assert!(drain(&mut o.bob_rx).is_empty());
    }

    #[test]
    fn dead_recipient_does_not_stop_broadcast() {
        let o = online();
        let Online { registry, alice, bob_rx, mut carol_rx, .. } = o;
        drop(bob_rx);
        assert_eq!(route(&alice, "still here?", &registry), Route::Broadcast { recipients: 2 });
        assert_eq!(drain(&mut carol_rx), ["still here?"]);
    }
}
