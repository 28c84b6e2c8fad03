//! Server bootstrap: listener, shared state, role startup, shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::commands::RequestContext;
use crate::config::Config;
use crate::connection;
use crate::replication::{self, Replication};
use crate::snapshot::SnapshotReader;
use crate::store::Keyspace;
use crate::transactions::TransactionRegistry;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound, ready-to-run server.
pub struct Server {
    config: Arc<Config>,
    keyspace: Arc<Keyspace>,
    replication: Arc<Replication>,
    transactions: Arc<TransactionRegistry>,
    listener: TcpListener,
    propagated: mpsc::Receiver<Vec<u8>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Binds the listener and assembles shared state.
    ///
    /// When `<dir>/<dbfilename>` exists the keyspace is hydrated from it;
    /// a missing file is not an error, and a malformed one only logs (the
    /// entries read so far stay).
    pub async fn bind(config: Config) -> Result<Self, ServerError> {
        let config = Arc::new(config);
        let keyspace = Arc::new(Keyspace::new());

        let snapshot_path = config.snapshot_path();
        match tokio::fs::read(&snapshot_path).await {
            Ok(blob) => {
                if let Err(error) = keyspace.hydrate(SnapshotReader::new(blob)).await {
                    warn!(path = %snapshot_path.display(), %error, "snapshot hydration aborted");
                } else {
                    let keys = keyspace.len().await;
                    info!(path = %snapshot_path.display(), keys, "hydrated from snapshot");
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => (),
            Err(error) => {
                warn!(path = %snapshot_path.display(), %error, "failed to read snapshot file");
            }
        }

        let (replication, propagated) = Replication::new(&config);

        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Server {
            config,
            keyspace,
            replication: Arc::new(replication),
            transactions: Arc::new(TransactionRegistry::new()),
            listener,
            propagated,
            shutdown_tx,
        })
    }

    /// The address the listener actually bound (port 0 resolves here).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// A handle that triggers graceful shutdown when sent to.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Runs the accept loop until shutdown.
    ///
    /// Spawns the replication broadcaster and, on a replica, the outbound
    /// link to the primary.
    pub async fn run(self) -> Result<(), ServerError> {
        let Server {
            config,
            keyspace,
            replication,
            transactions,
            listener,
            propagated,
            shutdown_tx,
        } = self;

        tokio::spawn(
            Arc::clone(&replication).run_broadcaster(propagated, shutdown_tx.subscribe()),
        );

        if config.is_replica() {
            tokio::spawn(run_primary_link(
                Arc::clone(&config),
                Arc::clone(&keyspace),
                Arc::clone(&replication),
                Arc::clone(&transactions),
                shutdown_tx.subscribe(),
            ));
        }

        info!(
            addr = %listener.local_addr()?,
            role = replication.role().as_str(),
            "listening"
        );

        let mut shutdown_rx = shutdown_tx.subscribe();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(error) => {
                            warn!(%error, "accept failed");
                            continue;
                        }
                    };

                    let ctx = RequestContext {
                        keyspace: Arc::clone(&keyspace),
                        replication: Arc::clone(&replication),
                        transactions: Arc::clone(&transactions),
                        config: Arc::clone(&config),
                        conn_id: peer_addr.to_string(),
                    };

                    tokio::spawn(connection::handle_client_connection(
                        stream,
                        ctx,
                        shutdown_tx.subscribe(),
                    ));
                }
                _ = shutdown_rx.recv() => {
                    info!("listener shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Connects to the primary, performs the handshake, hydrates from the
/// full-resync snapshot, and applies the propagated stream until the
/// link drops. A handshake failure is fatal for the process.
async fn run_primary_link(
    config: Arc<Config>,
    keyspace: Arc<Keyspace>,
    replication: Arc<Replication>,
    transactions: Arc<TransactionRegistry>,
    shutdown: broadcast::Receiver<()>,
) {
    let (host, port) = config
        .replicaof
        .clone()
        .expect("primary link requires a replica role");
    let primary_addr = format!("{}:{}", host, port);

    let mut stream = match TcpStream::connect(&primary_addr).await {
        Ok(stream) => stream,
        Err(error) => {
            error!(addr = %primary_addr, %error, "failed to connect to primary");
            std::process::exit(1);
        }
    };

    let outcome = match replication::handshake(&mut stream, config.port).await {
        Ok(outcome) => outcome,
        Err(error) => {
            error!(addr = %primary_addr, %error, "replication handshake failed");
            std::process::exit(1);
        }
    };

    replication.set_primary_replid(outcome.primary_replid);

    if let Err(error) = keyspace
        .hydrate(SnapshotReader::new(outcome.snapshot))
        .await
    {
        warn!(%error, "full-resync snapshot hydration aborted");
    }

    let ctx = RequestContext {
        keyspace,
        replication,
        transactions,
        config,
        conn_id: primary_addr,
    };

    connection::handle_primary_link(stream, outcome.leftover, ctx, shutdown).await;
}
