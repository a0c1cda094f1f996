//! The server role: a listener plus one connection per accepted socket.
//!
//! Every accepted socket gets its own [`Connection`], inbox, read task and
//! dispatch task; connections never share anything but the archive and the
//! handler.  The registry is append-only for the life of the server: closed
//! connections stay listed (and report `is_connected() == false`).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use junction_core::{encode_frame, Message, ProtocolError};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::connection::{resolve_address, CloseReason, Connection, ConnectionError, ConnectionId};
use crate::dispatch::MessageHandler;
use crate::inbox::{Archive, Inbox};
use crate::lock;
use crate::session::{spawn_session, Session};

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long [`Server::stop`] waits, in total, for connection tasks to finish.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by [`Server`] operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The bind host could not be resolved.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server is already started")]
    AlreadyStarted,

    /// A broadcast message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected { id: ConnectionId, peer: SocketAddr },
    Disconnected { id: ConnectionId, reason: CloseReason },
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    connections: Vec<Arc<Connection>>,
    index: HashMap<ConnectionId, usize>,
}

impl Registry {
    fn insert(&mut self, connection: Arc<Connection>) {
        self.index.insert(connection.id(), self.connections.len());
        self.connections.push(connection);
    }

    fn get(&self, id: ConnectionId) -> Option<&Arc<Connection>> {
        self.index.get(&id).map(|&i| &self.connections[i])
    }
}

/// State shared between the [`Server`] handle and its accept task.
struct Shared {
    transport: TransportConfig,
    handler: Arc<dyn MessageHandler>,
    archive: Arc<Archive>,
    registry: RwLock<Registry>,
    sessions: Mutex<Vec<Session>>,
    events: mpsc::UnboundedSender<ServerEvent>,
    running: watch::Sender<bool>,
}

impl Shared {
    fn registry(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connected connections matching `keep`, copied out of the registry.
    fn live_connections<F>(&self, keep: F) -> Vec<Arc<Connection>>
    where
        F: Fn(&Connection) -> bool,
    {
        self.registry()
            .connections
            .iter()
            .filter(|c| c.is_connected() && keep(c))
            .cloned()
            .collect()
    }

    /// Registers an accepted socket and starts its tasks.
    fn register(&self, stream: TcpStream, peer: SocketAddr) {
        let connection = Arc::new(Connection::new(stream, peer, &self.transport));
        let id = connection.id();
        self.registry_mut().insert(Arc::clone(&connection));
        info!("connection {id} accepted from {peer}");
        let _ = self.events.send(ServerEvent::Connected { id, peer });

        let events = self.events.clone();
        let session = spawn_session(
            connection,
            Arc::new(Inbox::new()),
            Arc::clone(&self.archive),
            Arc::clone(&self.handler),
            self.transport.idle_poll(),
            move |reason| {
                let _ = events.send(ServerEvent::Disconnected { id, reason });
            },
        );
        lock(&self.sessions).push(session);
    }

    async fn disconnect_all(&self) {
        for connection in self.live_connections(|_| true) {
            connection.disconnect_with_notice().await;
        }
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
    let mut running = shared.running.subscribe();
    loop {
        let accepted = tokio::select! {
            _ = running.wait_for(|r| !*r) => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => shared.register(stream, peer),
            Err(e) => {
                warn!("accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("accept loop stopped");
}

// ── Server ────────────────────────────────────────────────────────────────────

/// Accepts connections and broadcasts to them.
pub struct Server {
    shared: Arc<Shared>,
    accept_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    join_timeout: Duration,
}

impl Server {
    /// Creates a stopped server and the receiver for its [`ServerEvent`]s.
    ///
    /// Events are dropped silently if the receiver is dropped.
    pub fn new(
        transport: TransportConfig,
        handler: Arc<dyn MessageHandler>,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (running, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            transport,
            handler,
            archive: Arc::new(Archive::new()),
            registry: RwLock::new(Registry::default()),
            sessions: Mutex::new(Vec::new()),
            events,
            running,
        });
        let server = Self {
            shared,
            accept_task: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        };
        (server, receiver)
    }

    /// Binds `host:port` and starts accepting.  Port `0` picks an ephemeral
    /// port; the bound address is returned.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyStarted`], [`ServerError::Resolve`] or
    /// [`ServerError::Bind`].
    pub async fn start(&self, host: &str, port: u16) -> Result<SocketAddr, ServerError> {
        let mut accept_task = self.accept_task.lock().await;
        if accept_task.is_some() {
            return Err(ServerError::AlreadyStarted);
        }

        let addr = resolve_address(host, port)
            .await
            .map_err(|source| ServerError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        self.shared.running.send_replace(true);
        *lock(&self.local_addr) = Some(local);
        *accept_task = Some(tokio::spawn(accept_loop(Arc::clone(&self.shared), listener)));
        info!("server listening on {local}");
        Ok(local)
    }

    /// Overrides how long [`Server::stop`] waits for connection tasks.
    pub fn set_join_timeout(&mut self, timeout: Duration) {
        self.join_timeout = timeout;
    }

    /// Disconnects every live connection (with notice), stops accepting and
    /// waits for every connection's tasks to finish.  Safe to call repeatedly.
    ///
    /// The wait is bounded by the join timeout ([`DEFAULT_JOIN_TIMEOUT`]
    /// unless overridden).  A handler that never returns, or one that calls
    /// `stop` itself, keeps its dispatch task alive; once the deadline passes
    /// that task is left detached and a warning is logged.
    pub async fn stop(&self) {
        let was_running = self.shared.running.send_replace(false);
        self.shared.disconnect_all().await;

        let accept_task = self.accept_task.lock().await.take();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                warn!("accept task ended abnormally: {e}");
            }
        }
        // Sockets accepted while the first sweep ran.
        self.shared.disconnect_all().await;

        let sessions = std::mem::take(&mut *lock(&self.shared.sessions));
        let deadline = tokio::time::Instant::now() + self.join_timeout;
        let mut abandoned = 0usize;
        for session in sessions {
            if tokio::time::timeout_at(deadline, session.join()).await.is_err() {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!(
                "{abandoned} connection(s) still dispatching after {:?}; leaving them detached",
                self.join_timeout
            );
        }

        *lock(&self.local_addr) = None;
        if was_running {
            info!("server stopped");
        }
    }

    /// Sends `message` to every connected client.  Returns the number of
    /// clients it was delivered to.
    ///
    /// # Errors
    ///
    /// [`ServerError::Protocol`] if the message cannot be encoded.  Per-client
    /// failures are logged and skipped.
    pub async fn send_to_all(&self, message: &Message) -> Result<usize, ServerError> {
        let frame = encode_frame(message)?;
        let targets = self.shared.live_connections(|_| true);
        Ok(deliver(&frame, message, targets).await)
    }

    /// Like [`Server::send_to_all`], skipping `except`.
    pub async fn send_to_all_except(
        &self,
        message: &Message,
        except: ConnectionId,
    ) -> Result<usize, ServerError> {
        let frame = encode_frame(message)?;
        let targets = self.shared.live_connections(|c| c.id() != except);
        Ok(deliver(&frame, message, targets).await)
    }

    /// Sends `message` to each of `ids` that is still connected.
    pub async fn send_to_many(
        &self,
        message: &Message,
        ids: &[ConnectionId],
    ) -> Result<usize, ServerError> {
        let frame = encode_frame(message)?;
        let targets = self.shared.live_connections(|c| ids.contains(&c.id()));
        Ok(deliver(&frame, message, targets).await)
    }

    /// Sends `message` to one client.
    ///
    /// Returns `Ok(false)` if `id` is unknown or no longer connected.
    ///
    /// # Errors
    ///
    /// Encoding and transport failures.
    pub async fn send_to(&self, message: &Message, id: ConnectionId) -> Result<bool, ServerError> {
        let Some(connection) = self.connection(id) else {
            return Ok(false);
        };
        match connection.send(message).await {
            Ok(()) => Ok(true),
            Err(ConnectionError::NotConnected(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every connection accepted so far, in accept order.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.shared.registry().connections.clone()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.shared.registry().get(id).cloned()
    }

    pub fn connected_count(&self) -> usize {
        self.shared
            .registry()
            .connections
            .iter()
            .filter(|c| c.is_connected())
            .count()
    }

    /// Messages dispatched from every connection, in dispatch order.
    pub fn archive(&self) -> Arc<Archive> {
        Arc::clone(&self.shared.archive)
    }

    /// The bound address while the server is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Lets the accept task exit and release the listener.
        self.shared.running.send_replace(false);
    }
}

/// Writes a pre-encoded frame to each target; returns how many succeeded.
async fn deliver(frame: &[u8], message: &Message, targets: Vec<Arc<Connection>>) -> usize {
    let mut delivered = 0;
    for connection in targets {
        match connection.send_frame(frame).await {
            Ok(()) => delivered += 1,
            Err(ConnectionError::NotConnected(id)) => {
                debug!("connection {id} closed before {} was sent; skipping", message.header());
            }
            Err(e) => warn!("connection {}: broadcast of {} failed: {e}", connection.id(), message.header()),
        }
    }
    delivered
}

// ── Tests ─────────────────────────────────────────────────────────────────────
