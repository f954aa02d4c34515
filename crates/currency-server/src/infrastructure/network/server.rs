//! The TCP listener and the table of live connections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use linecmd_core::{ConnectionConfig, LineConfig};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::session::{run_session, ServerEvent};
use crate::application::rates::ExchangeRates;
use crate::infrastructure::storage::config::AppConfig;

/// Pause after a failed `accept` so a persistent error does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Error type for the listener.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

/// Settings applied to every accepted connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    /// Template for each connection; the name is replaced by the peer address.
    pub connection: ConnectionConfig,
    pub line: LineConfig,
    /// Live connections allowed at once; 0 means no limit.
    pub max_connections: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::named("client"),
            line: LineConfig::default(),
            max_connections: 0,
        }
    }
}

impl From<&AppConfig> for ServerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            connection: config.connection.connection_config("client"),
            line: config.connection.line_config(),
            max_connections: config.network.max_connections,
        }
    }
}

/// Counters reported when the server stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub accepted: usize,
    /// Connections dropped because `max_connections` were already live.
    pub rejected: usize,
    /// Connections still live when the server stopped.
    pub closed_on_stop: usize,
}

/// Asks a running server to stop, as if a client had sent `stop`.
#[derive(Debug, Clone)]
pub struct StopHandle {
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl StopHandle {
    /// Returns `false` if the server has already finished.
    pub fn stop(&self) -> bool {
        self.events
            .send(ServerEvent::StopRequested { id: Uuid::nil() })
            .is_ok()
    }
}

struct LiveConnection {
    peer: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The currency server.
///
/// [`run`](Self::run) spawns connection tasks with
/// [`tokio::task::spawn_local`], so it must be awaited inside a
/// [`tokio::task::LocalSet`].
pub struct CurrencyServer {
    listener: TcpListener,
    settings: ServerSettings,
    rates: Rc<dyn ExchangeRates>,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl CurrencyServer {
    /// Binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        settings: ServerSettings,
        rates: Rc<dyn ExchangeRates>,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailed { addr, source })?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            listener,
            settings,
            rates,
            events_tx,
            events_rx,
        })
    }

    /// The bound address (useful when binding port 0).
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::LocalAddr`] if the OS cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Accepts and serves connections until a stop is requested.
    ///
    /// On stop, the listener is closed first, then every live connection is
    /// closed explicitly, and the call returns once their tasks finish.
    pub async fn run(self) -> ServerStats {
        let Self {
            listener,
            settings,
            rates,
            events_tx,
            mut events_rx,
        } = self;
        let mut live: HashMap<Uuid, LiveConnection> = HashMap::new();
        let mut stats = ServerStats::default();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        if settings.max_connections != 0 && live.len() >= settings.max_connections {
                            warn!(%peer, live = live.len(), "connection limit reached; dropping");
                            stats.rejected += 1;
                            continue;
                        }
                        let id = Uuid::new_v4();
                        let (shutdown_tx, shutdown_rx) = oneshot::channel();
                        let task = tokio::task::spawn_local(run_session(
                            socket,
                            id,
                            settings.connection.clone(),
                            settings.line,
                            Rc::clone(&rates),
                            events_tx.clone(),
                            shutdown_rx,
                        ));
                        live.insert(id, LiveConnection { peer, shutdown: shutdown_tx, task });
                        stats.accepted += 1;
                        info!(%id, %peer, live = live.len(), "connection accepted");
                    }
                    Err(e) => {
                        warn!("accept failed: {e}");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(event) = events_rx.recv() => match event {
                    ServerEvent::StopRequested { id } => {
                        info!(%id, "stop requested");
                        break;
                    }
                    ServerEvent::ConnectionClosed { id, error } => {
                        if let Some(conn) = live.remove(&id) {
                            debug!(%id, peer = %conn.peer, ?error, "connection closed");
                        }
                    }
                    ServerEvent::SessionEnded { id } => {
                        if let Some(conn) = live.remove(&id) {
                            debug!(%id, peer = %conn.peer, "session ended");
                        }
                    }
                },
            }
        }

        drop(listener);
        stats.closed_on_stop = live.len();
        let tasks: Vec<JoinHandle<()>> = live
            .into_values()
            .map(|conn| {
                let _ = conn.shutdown.send(());
                conn.task
            })
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("connection task failed: {e}");
            }
        }
        info!(
            accepted = stats.accepted,
            rejected = stats.rejected,
            closed_on_stop = stats.closed_on_stop,
            "server stopped"
        );
        stats
    }
}
