//! The client role: one connection to one remote endpoint.
//!
//! ```text
//!  Idle ──connect()──► Connecting ──ok──► Connected ──close──► Disconnected
//!                           └──────error──────────────────────────┘
//!  Disconnected ──reset()──► Idle
//! ```
//!
//! Application tick logic lives outside the client: callers drive it while
//! awaiting [`Client::closed`].

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use junction_core::Message;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::info;

use crate::config::TransportConfig;
use crate::connection::{resolve_address, Connection, ConnectionError};
use crate::dispatch::{DispatchStats, MessageHandler};
use crate::inbox::{Archive, Inbox};
use crate::lock;
use crate::session::{spawn_session, Session};

/// Lifecycle of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClientState::Idle => "idle",
            ClientState::Connecting => "connecting",
            ClientState::Connected => "connected",
            ClientState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Errors returned by [`Client`] operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The host name could not be resolved.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// TCP connection to the server failed.
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// `connect` or `reset` was called from the wrong state.
    #[error("operation not allowed while {0}")]
    InvalidState(ClientState),

    /// No live connection.
    #[error("client is not connected")]
    NotConnected,

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// A single outbound connection with its own dispatch loop and archive.
pub struct Client {
    transport: TransportConfig,
    handler: Arc<dyn MessageHandler>,
    archive: Arc<Archive>,
    state: Mutex<ClientState>,
    connection: Mutex<Option<Arc<Connection>>>,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl Client {
    pub fn new(transport: TransportConfig, handler: Arc<dyn MessageHandler>) -> Self {
        Self {
            transport,
            handler,
            archive: Arc::new(Archive::new()),
            state: Mutex::new(ClientState::Idle),
            connection: Mutex::new(None),
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// Current state.  A connection closed by the peer reads as
    /// [`ClientState::Disconnected`].
    pub fn state(&self) -> ClientState {
        let recorded = *lock(&self.state);
        self.effective_state(recorded)
    }

    fn effective_state(&self, recorded: ClientState) -> ClientState {
        let live = lock(&self.connection)
            .as_ref()
            .is_some_and(|connection| connection.is_connected());
        if recorded == ClientState::Connected && !live {
            ClientState::Disconnected
        } else {
            recorded
        }
    }

    /// Resolves `host`, connects, and starts the read and dispatch tasks.
    ///
    /// Returns the address actually connected to.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidState`] unless the client is idle.
    /// - [`ClientError::Resolve`] / [`ClientError::ConnectFailed`]; the client
    ///   is then `Disconnected`.
    pub async fn connect(&self, host: &str, port: u16) -> Result<SocketAddr, ClientError> {
        {
            let mut state = lock(&self.state);
            if *state != ClientState::Idle {
                return Err(ClientError::InvalidState(*state));
            }
            *state = ClientState::Connecting;
        }

        match self.open(host, port).await {
            Ok(addr) => {
                *lock(&self.state) = ClientState::Connected;
                Ok(addr)
            }
            Err(e) => {
                *lock(&self.state) = ClientState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open(&self, host: &str, port: u16) -> Result<SocketAddr, ClientError> {
        let addr = resolve_address(host, port)
            .await
            .map_err(|source| ClientError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::ConnectFailed { addr, source })?;

        let connection = Arc::new(Connection::new(stream, addr, &self.transport));
        info!("connection {} established to {addr}", connection.id());

        let id = connection.id();
        let session = spawn_session(
            Arc::clone(&connection),
            Arc::new(Inbox::new()),
            Arc::clone(&self.archive),
            Arc::clone(&self.handler),
            self.transport.idle_poll(),
            move |reason| info!("connection {id} to {addr} finished: {reason}"),
        );

        *lock(&self.connection) = Some(connection);
        *self.session.lock().await = Some(session);
        Ok(addr)
    }

    /// Sends `message` to the server.
    ///
    /// # Errors
    ///
    /// [`ClientError::NotConnected`] without a live connection, otherwise the
    /// connection's own send errors.
    pub async fn send(&self, message: &Message) -> Result<(), ClientError> {
        let connection = self.live_connection().ok_or(ClientError::NotConnected)?;
        connection.send(message).await?;
        Ok(())
    }

    /// Sends the disconnect notice (best effort) and closes the connection.
    ///
    /// The read and dispatch tasks finish on their own; await
    /// [`Client::closed`] to wait for them.
    pub async fn disconnect(&self) {
        let connection = lock(&self.connection).clone();
        if let Some(connection) = connection {
            connection.disconnect_with_notice().await;
        }
        let mut state = lock(&self.state);
        if *state == ClientState::Connected {
            *state = ClientState::Disconnected;
        }
    }

    /// Resolves once the connection has closed and every received message
    /// has been dispatched.
    ///
    /// Returns the dispatch counters, or `None` if nothing was running.
    pub async fn closed(&self) -> Option<DispatchStats> {
        let session = self.session.lock().await.take();
        match session {
            Some(session) => session.join().await,
            None => None,
        }
    }

    /// Returns a disconnected client to `Idle` so it can connect again.
    /// The archive is kept.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidState`] unless the client is disconnected.
    pub fn reset(&self) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        let current = self.effective_state(*state);
        if current != ClientState::Disconnected {
            return Err(ClientError::InvalidState(current));
        }
        *state = ClientState::Idle;
        *lock(&self.connection) = None;
        Ok(())
    }

    /// The current connection, if one is live.
    pub fn live_connection(&self) -> Option<Arc<Connection>> {
        lock(&self.connection)
            .as_ref()
            .filter(|connection| connection.is_connected())
            .cloned()
    }

    pub fn archive(&self) -> Arc<Archive> {
        Arc::clone(&self.archive)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
