//! TCP listener: accepts connections and spawns a session task for each.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection;
use crate::credentials::CredentialStore;
use crate::registry::Registry;

/// Pause after the process runs out of file descriptors, so the accept loop
/// does not spin while connections drain.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State shared by every connection task.
pub struct SharedState {
    pub config: ServerConfig,
    pub credentials: CredentialStore,
    pub registry: Registry,
}

impl SharedState {
    pub fn new(config: ServerConfig, credentials: CredentialStore) -> Self {
        Self {
            config,
            credentials,
            registry: Registry::new(),
        }
    }
}

pub struct Server {
    config: ServerConfig,
    credentials: Option<CredentialStore>,
}

impl Server {
    /// Credentials are read from `config.users_file` when the server starts.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            credentials: None,
        }
    }

    pub fn with_credentials(config: ServerConfig, credentials: CredentialStore) -> Self {
        Self {
            config,
            credentials: Some(credentials),
        }
    }

    fn build_state(self) -> Arc<SharedState> {
        let credentials = self
            .credentials
            .unwrap_or_else(|| CredentialStore::load(&self.config.users_file));
        tracing::info!(users = credentials.len(), "Credential store ready");
        Arc::new(SharedState::new(self.config, credentials))
    }

    /// Run the server until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let listener = bind(&self.config.listen_addr).await?;
        let state = self.build_state();
        serve(listener, state, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
            tracing::info!("Ctrl-C received");
        })
        .await
    }

    /// Start the server in the background and return the bound address and
    /// a handle to stop it (for testing).
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle)> {
        let listener = bind(&self.config.listen_addr).await?;
        let addr = listener.local_addr()?;
        let state = self.build_state();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(serve(listener, Arc::clone(&state), async move {
            // A dropped handle leaves the listener running.
            if shutdown_rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        }));

        let handle = ServerHandle {
            addr,
            shutdown: shutdown_tx,
            task,
            state,
        };
        Ok((addr, handle))
    }
}

async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Handle to a server started with [`Server::start`].
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
    state: Arc<SharedState>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn registry(&self) -> &Registry {
        &self.state.registry
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    /// Sessions that are already running are left alone.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.context("Listener task panicked")?
    }
}

/// Accept connections until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<SharedState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    loop {
        let (stream, peer) = tokio::select! {
            biased;
            () = &mut shutdown => {
                tracing::info!("Listener shutting down");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) if is_fd_exhaustion(&e) => {
                    tracing::warn!("Accept error: {e}, backing off");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
                Err(e) if is_transient(&e) => {
                    tracing::debug!("Transient accept error: {e}");
                    continue;
                }
                Err(e) => return Err(anyhow::Error::new(e).context("Accept failed")),
            },
        };
        tracing::debug!(%peer, "Accepted connection");
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = connection::handle(stream, state).await {
                tracing::error!("Connection error: {e}");
            }
        });
    }
}

/// ENFILE or EMFILE.
fn is_fd_exhaustion(e: &io::Error) -> bool {
    matches!(e.raw_os_error(), Some(23 | 24))
}

/// Errors that concern one pending connection rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
