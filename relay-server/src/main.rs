use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use relay_server::config::ServerConfig;
use relay_server::credentials::CredentialStore;
use relay_server::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs when RELAY_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("RELAY_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("relay_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = ServerConfig::parse();
    tracing::info!(
        listen_addr = %config.listen_addr,
        max_line_len = config.max_line_len,
        outbound_queue = config.outbound_queue,
        "Starting chat relay"
    );

    let credentials = CredentialStore::load(&config.users_file);
    if credentials.is_empty() {
        tracing::warn!("No users loaded from {}; every login will fail", config.users_file.display());
    }

    Server::with_credentials(config, credentials).run().await
}
