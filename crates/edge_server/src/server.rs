//! Accept loop and lifecycle

use std::net::SocketAddr;
use std::sync::Arc;

use contracts::{ServerConfig, TaskSink};
use coordinator::SensorDataCoordinator;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, instrument, warn};

use crate::connection::handle_connection;
use crate::registry::{ConnectionId, VehicleRegistry};
use crate::{Result, ServerError};

/// Everything a connection task needs
pub struct ServerContext {
    pub config: ServerConfig,
    pub coordinator: Arc<SensorDataCoordinator>,
    pub registry: Arc<VehicleRegistry>,
    pub tasks: Arc<dyn TaskSink>,
}

pub struct EdgeServer {
    listener: TcpListener,
    context: Arc<ServerContext>,
}

impl EdgeServer {
    /// Bind the listener; port 0 picks an ephemeral port
    #[instrument(name = "edge_server_bind", skip(context), fields(host = %context.config.host, port = context.config.port))]
    pub async fn bind(context: ServerContext) -> Result<Self> {
        let host = context.config.host.clone();
        let port = context.config.port;
        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|source| ServerError::Bind { host, port, source })?;
        Ok(Self {
            listener,
            context: Arc::new(context),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept until `shutdown` flips, then close and join every connection
    #[instrument(name = "edge_server_run", skip_all)]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let max_connections = self.context.config.max_connections;
        info!(addr = ?self.listener.local_addr().ok(), max_connections, "Edge server listening");

        let mut connections = JoinSet::new();
        let mut next_id: ConnectionId = 0;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "Accept failed");
                            continue;
                        }
                    };
                    if connections.len() >= max_connections {
                        warn!(%peer, max_connections, "Connection limit reached, refusing");
                        continue;
                    }
                    next_id += 1;
                    debug!(%peer, connection = next_id, "Accepted");
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        next_id,
                        Arc::clone(&self.context),
                        shutdown.clone(),
                    ));
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_connection_end(joined);
                }
            }
        }

        info!(open = connections.len(), "Edge server stopping");
        drop(self.listener);
        while let Some(joined) = connections.join_next().await {
            log_connection_end(joined);
        }
        info!("Edge server stopped");
        Ok(())
    }

    /// Run on a background task
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            join,
        })
    }
}

fn log_connection_end(joined: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Connection closed with error"),
        Err(e) => warn!(error = %e, "Connection task panicked"),
    }
}

pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close connections and wait
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.join.await.map_err(|e| ServerError::Join {
            message: e.to_string(),
        })?
    }
}
