//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Default address the plain TCP listener binds to.
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8888";
/// Default credential file, one `username:password` per line.
pub const DEFAULT_USERS_FILE: &str = "users.txt";
/// Default cap on a single inbound line, in bytes.
pub const DEFAULT_MAX_LINE_LEN: usize = 4096;
/// Default number of lines that may wait in one client's outbound queue.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 1024;
/// Default time a closing session waits for its queued replies to flush.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone, Parser)]
#[command(name = "relay-server", about = "Multi-client TCP chat relay")]
pub struct ServerConfig {
    /// Address to listen on for client connections.
    #[arg(long, env = "RELAY_LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen_addr: String,

    /// Credential file with one `username:password` record per line.
    #[arg(long, env = "RELAY_USERS_FILE", default_value = DEFAULT_USERS_FILE)]
    pub users_file: PathBuf,

    /// Longest accepted inbound line in bytes; longer lines are discarded.
    #[arg(long, env = "RELAY_MAX_LINE_LEN", default_value_t = DEFAULT_MAX_LINE_LEN)]
    pub max_line_len: usize,

    /// Capacity of each client's outbound queue. A client whose queue
    /// overflows is disconnected.
    #[arg(long, env = "RELAY_OUTBOUND_QUEUE", default_value_t = DEFAULT_OUTBOUND_QUEUE)]
    pub outbound_queue: usize,

    /// How long a closing connection may spend flushing queued replies.
    #[arg(long, env = "RELAY_DRAIN_TIMEOUT_MS", default_value_t = DEFAULT_DRAIN_TIMEOUT_MS)]
    pub drain_timeout_ms: u64,
}

impl ServerConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            users_file: PathBuf::from(DEFAULT_USERS_FILE),
            max_line_len: DEFAULT_MAX_LINE_LEN,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_defaults() {
        let parsed = ServerConfig::try_parse_from(["relay-server"]).unwrap();
        let default = ServerConfig::default();
        assert_eq!(parsed.listen_addr, default.listen_addr);
        assert_eq!(parsed.users_file, default.users_file);
        assert_eq!(parsed.max_line_len, default.max_line_len);
        assert_eq!(parsed.outbound_queue, default.outbound_queue);
        assert_eq!(parsed.drain_timeout_ms, default.drain_timeout_ms);
    }

    #[test]
    fn flags_override_defaults() {
        let parsed = ServerConfig::try_parse_from([
            "relay-server",
            "--listen-addr",
            "0.0.0.0:9000",
            "--users-file",
            "/etc/relay/users.txt",
            "--max-line-len",
            "128",
        ])
        .unwrap();
        assert_eq!(parsed.listen_addr, "0.0.0.0:9000");
        assert_eq!(parsed.users_file, PathBuf::from("/etc/relay/users.txt"));
        assert_eq!(parsed.max_line_len, 128);
        assert_eq!(parsed.drain_timeout(), Duration::from_millis(2000));
    }
}
