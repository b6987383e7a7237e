//! Hub: the per-instance context tying the subsystem together
//!
//! A `Hub` owns the connection registry, room manager, stats tracker and
//! route table. There is no global state; several hubs can run side by side
//! in one process.

mod listener;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::HubConfig;
use crate::connection::{
    Connection, ConnectionInfo, ConnectionRegistry, Driver, DriverContext, MessageHandler,
};
use crate::handshake::{negotiate, write_accept, write_reject, RequestHead};
use crate::rooms::RoomManager;
use crate::stats::StatsTracker;
use crate::types::{CloseCode, ConnectionId, HubError, HubResult, Message};

/// Handle to one WebSocket hub. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: Arc<HubConfig>,
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomManager>,
    stats: Arc<StatsTracker>,
    routes: RwLock<HashMap<String, Arc<dyn MessageHandler>>>,
}

impl Hub {
    /// Create a hub after validating `config`.
    pub fn new(config: HubConfig) -> HubResult<Self> {
        config.validate()?;
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let stats = Arc::new(StatsTracker::new());
        let rooms = Arc::new(RoomManager::new(
            registry.clone(),
            stats.clone(),
            config.delete_empty_rooms,
        ));
        Ok(Self {
            inner: Arc::new(HubInner {
                config: Arc::new(config),
                registry,
                rooms,
                stats,
                routes: RwLock::new(HashMap::new()),
            }),
        })
    }

    /// Register the handler for upgrade requests targeting `path`
    pub fn route<H: MessageHandler>(&self, path: &str, handler: H) -> &Self {
        self.inner
            .routes
            .write()
            .insert(path.to_string(), Arc::new(handler));
        self
    }

    /// Get the number of registered routes
    pub fn route_count(&self) -> usize {
        self.inner.routes.read().len()
    }

    fn handler_for(&self, path: &str) -> Option<Arc<dyn MessageHandler>> {
        self.inner.routes.read().get(path).cloned()
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.inner.rooms
    }

    pub fn stats(&self) -> &Arc<StatsTracker> {
        &self.inner.stats
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Connection> {
        self.inner.registry.get(id)
    }

    /// Send to every open member of `room` except `except`.
    pub fn broadcast(
        &self,
        room: &str,
        message: impl Into<Message>,
        except: Option<ConnectionId>,
    ) -> usize {
        self.inner.rooms.broadcast(room, &message.into(), except)
    }

    /// Start the closing handshake on every open connection.
    ///
    /// Returns the number of connections asked to close.
    pub fn shutdown(&self, code: CloseCode, reason: &str) -> usize {
        let connections = self.inner.registry.connections();
        let mut closing = 0;
        for conn in connections {
            match conn.close(Some(code.into()), reason) {
                Ok(()) => closing += 1,
                Err(e) => tracing::debug!(connection_id = %conn.id(), error = %e, "close skipped"),
            }
        }
        tracing::info!(connections = closing, code = %code, "hub shutting down");
        closing
    }

    /// Promote an already-read upgrade request on `stream` to a connection.
    ///
    /// On success the 101 response has been written and a task drives the
    /// connection; `leftover` holds any bytes received after the request
    /// head. On rejection an HTTP error response is written and the stream
    /// is ended; no connection is created.
    pub async fn upgrade<S>(
        &self,
        stream: S,
        head: RequestHead,
        leftover: BytesMut,
        peer_addr: Option<SocketAddr>,
    ) -> HubResult<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let deadline = Instant::now() + self.inner.config.handshake_timeout();
        self.upgrade_until(stream, head, leftover, peer_addr, deadline)
            .await
    }

    pub(crate) async fn upgrade_until<S>(
        &self,
        mut stream: S,
        head: RequestHead,
        leftover: BytesMut,
        peer_addr: Option<SocketAddr>,
        deadline: Instant,
    ) -> HubResult<Connection>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let config = &self.inner.config;

        let Some(handler) = self.handler_for(&head.path) else {
            let reason = format!("no handler for {}", head.path);
            return Err(self.reject(&mut stream, 404, reason, false, deadline).await);
        };

        let result = negotiate(
            &head,
            &config.supported_protocols,
            config.allowed_origins.as_deref(),
        );
        if !result.accepted {
            let reason = result
                .reject_reason
                .clone()
                .unwrap_or_else(|| "bad upgrade request".to_string());
            return Err(self
                .reject(&mut stream, 400, reason, result.version_mismatch, deadline)
                .await);
        }

        let (tx, rx) = mpsc::channel(config.max_send_queue);
        let conn = Connection::new(
            self.inner.registry.next_id(),
            ConnectionInfo {
                peer_addr,
                path: head.path.clone(),
                protocol: result.selected_protocol.clone(),
            },
            tx,
            self.inner.rooms.clone(),
        );
        if let Err(e) = self.inner.registry.insert(conn.clone()) {
            return Err(self
                .reject(&mut stream, 503, e.to_string(), false, deadline)
                .await);
        }

        let written = tokio::time::timeout_at(deadline, write_accept(&mut stream, &result)).await;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.inner.registry.remove(conn.id());
                return Err(HubError::Transport(e));
            }
            Err(_) => {
                self.inner.registry.remove(conn.id());
                self.inner.stats.handshake_timed_out();
                return Err(HubError::HandshakeRejected("handshake timed out".into()));
            }
        }

        self.inner.stats.connection_opened();
        tracing::info!(
            connection_id = %conn.id(),
            peer = ?peer_addr,
            path = %head.path,
            protocol = ?result.selected_protocol,
            "connection open"
        );

        let ctx = DriverContext {
            config: self.inner.config.clone(),
            registry: self.inner.registry.clone(),
            rooms: self.inner.rooms.clone(),
            stats: self.inner.stats.clone(),
            handler,
        };
        tokio::spawn(Driver::new(stream, leftover, conn.clone(), rx, ctx).run());
        Ok(conn)
    }

    /// Answer with an HTTP error and end the stream; returns the error to
    /// report to the caller.
    async fn reject<S>(
        &self,
        stream: &mut S,
        status: u16,
        reason: String,
        advertise_version: bool,
        deadline: Instant,
    ) -> HubError
    where
        S: AsyncWrite + Unpin,
    {
        self.inner.stats.handshake_rejected();
        tracing::warn!(status, reason = %reason, "upgrade rejected");
        let write = write_reject(stream, status, &reason, advertise_version);
        if let Ok(Err(e)) = tokio::time::timeout_at(deadline, write).await {
            tracing::debug!(error = %e, "failed to write rejection");
        }
        HubError::HandshakeRejected(reason)
    }

    /// Accept sockets from `listener` until the task is dropped.
    pub async fn serve(&self, listener: TcpListener) -> HubResult<()> {
        listener::accept_loop(self.clone(), listener).await
    }

    /// Bind `bind_addr` and serve in a background task.
    pub async fn start(&self) -> HubResult<ServerHandle> {
        let listener = TcpListener::bind(&self.inner.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "websocket listener bound");

        let hub = self.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = hub.serve(listener).await {
                tracing::error!(error = %e, "listener stopped");
            }
        });
        Ok(ServerHandle {
            local_addr,
            hub: self.clone(),
            task,
        })
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("bind_addr", &self.inner.config.bind_addr)
            .field("routes", &self.route_count())
            .field("connections", &self.inner.registry.count())
            .finish()
    }
}

/// A running listener started with [`Hub::start`]
#[derive(Debug)]
pub struct ServerHandle {
    pub local_addr: SocketAddr,
    hub: Hub,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Stop accepting and ask every connection to close with 1001.
    pub fn shutdown(self) -> usize {
        self.task.abort();
        self.hub.shutdown(CloseCode::GoingAway, "server shutting down")
    }
}
