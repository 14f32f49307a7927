//! Multi-client chat relay.
//!
//! Clients log in over a persistent TCP connection with a
//! `LOGIN:<user>:<password>` line, then exchange public and `@user`
//! directed messages through the server, which keeps every client's view of
//! who is online up to date.

pub mod codec;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod protocol;
pub mod registry;
pub mod server;
