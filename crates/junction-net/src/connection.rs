//! One TCP socket, framed.
//!
//! A [`Connection`] splits its stream in two:
//!
//! - the **read half** is moved into [`Connection::run`], which owns it (and
//!   the accumulation buffer) for the lifetime of the read loop;
//! - the **write half** sits behind an async mutex so concurrent senders
//!   never interleave the chunks of two frames.
//!
//! The `connected` flag is a `watch` channel.  Closing flips it exactly once
//! and wakes any read or write that is parked on the socket, so a blocked
//! read returns immediately instead of waiting for the peer.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use junction_core::{decode_message, encode_frame, FrameDecoder, Message, ProtocolError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::lock;

/// How long [`Connection::disconnect_with_notice`] waits for the notice to be
/// accepted by the socket before closing anyway.
const NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

// ── Identity ──────────────────────────────────────────────────────────────────

/// Stable identifier of one connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Errors and close reasons ──────────────────────────────────────────────────

/// Errors returned by [`Connection`] operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection has already been closed.
    #[error("connection {0} is not connected")]
    NotConnected(ConnectionId),

    /// [`Connection::run`] was called a second time.
    #[error("connection {0} read loop is already running")]
    AlreadyRunning(ConnectionId),

    /// The outgoing message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The socket failed while writing; the connection has been closed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Why a read loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Connection::disconnect`] was called on this side.
    Local,
    /// The peer sent the disconnect control message.
    PeerNotice,
    /// The peer closed the socket (end of stream).
    PeerClosed,
    /// The socket failed (reset, aborted, ...).  Never retried.
    Transport(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::PeerNotice => f.write_str("peer sent disconnect notice"),
            CloseReason::PeerClosed => f.write_str("peer closed the socket"),
            CloseReason::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

// ── Connection ────────────────────────────────────────────────────────────────

/// A framed, exclusively owned TCP connection.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    chunk_size: usize,
    read_buffer_size: usize,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    connected: watch::Sender<bool>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection {
    /// Wraps an established stream.  The connection starts out connected.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, config: &TransportConfig) -> Self {
        let (read_half, write_half) = stream.into_split();
        let (connected, _) = watch::channel(true);
        Self {
            id: ConnectionId::new(),
            peer_addr,
            chunk_size: config.chunk_size.max(1),
            read_buffer_size: config.read_buffer_size.max(1),
            reader: Mutex::new(Some(read_half)),
            writer: tokio::sync::Mutex::new(Some(write_half)),
            connected,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Encodes `message` and writes it in `chunk_size` pieces.
    ///
    /// Returns only after every chunk has been accepted by the socket.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::NotConnected`] if the connection is closed, or is
    ///   closed while the write is pending.
    /// - [`ConnectionError::Protocol`] if the message cannot be encoded.
    /// - [`ConnectionError::Transport`] if the socket fails; the connection is
    ///   closed before returning.
    pub async fn send(&self, message: &Message) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected(self.id));
        }
        let frame = encode_frame(message)?;
        self.send_frame(&frame).await?;
        debug!(
            "connection {}: sent {} ({} bytes)",
            self.id,
            message.header(),
            frame.len()
        );
        Ok(())
    }

    /// Writes an already encoded frame (terminator included).
    pub(crate) async fn send_frame(&self, frame: &[u8]) -> Result<(), ConnectionError> {
        let mut state = self.connected.subscribe();
        let result = {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Err(ConnectionError::NotConnected(self.id));
            };
            tokio::select! {
                written = write_chunked(writer, frame, self.chunk_size) => written,
                _ = state.wait_for(|connected| !*connected) => {
                    return Err(ConnectionError::NotConnected(self.id));
                }
            }
        };

        if let Err(e) = result {
            warn!("connection {} to {}: write failed: {e}", self.id, self.peer_addr);
            self.disconnect().await;
            return Err(ConnectionError::Transport(e));
        }
        Ok(())
    }

    /// Runs the read loop until the connection closes.
    ///
    /// Every complete frame is decoded; malformed frames are logged and
    /// dropped, the disconnect notice closes the connection without reaching
    /// `on_message`, and every other message is passed to `on_message` in
    /// wire order.  Read errors and end-of-stream close the connection; they
    /// are never retried.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::AlreadyRunning`] if the read half has
    /// already been taken by an earlier call.
    pub async fn run<F>(&self, mut on_message: F) -> Result<CloseReason, ConnectionError>
    where
        F: FnMut(Message),
    {
        let mut reader = lock(&self.reader)
            .take()
            .ok_or(ConnectionError::AlreadyRunning(self.id))?;
        let mut state = self.connected.subscribe();
        let mut decoder = FrameDecoder::with_capacity(self.read_buffer_size);
        let mut chunk = vec![0u8; self.read_buffer_size];

        let reason = loop {
            let n = tokio::select! {
                _ = state.wait_for(|connected| !*connected) => break CloseReason::Local,
                read = reader.read(&mut chunk) => match read {
                    Ok(0) => break CloseReason::PeerClosed,
                    Ok(n) => n,
                    Err(e) => {
                        warn!("connection {} to {}: read failed: {e}", self.id, self.peer_addr);
                        break CloseReason::Transport(e.to_string());
                    }
                },
            };

            decoder.extend(&chunk[..n]);
            if let Some(reason) = self.drain_frames(&mut decoder, &mut on_message) {
                break reason;
            }
        };

        self.disconnect().await;
        if !decoder.is_empty() {
            debug!(
                "connection {}: discarding {} bytes of incomplete frame",
                self.id,
                decoder.buffered_len()
            );
        }
        debug!("connection {}: read loop stopped ({reason})", self.id);
        Ok(reason)
    }

    /// Decodes every complete frame in `decoder`.
    ///
    /// Returns `Some` when a disconnect notice ends the loop.
    fn drain_frames<F>(&self, decoder: &mut FrameDecoder, on_message: &mut F) -> Option<CloseReason>
    where
        F: FnMut(Message),
    {
        while let Some(frame) = decoder.next_frame() {
            match decode_message(&frame) {
                Ok(message) if message.is_disconnect_notice() => {
                    info!("connection {}: peer {} requested disconnect", self.id, self.peer_addr);
                    return Some(CloseReason::PeerNotice);
                }
                Ok(message) => {
                    debug!("connection {}: received {}", self.id, message.header());
                    on_message(message);
                }
                Err(e) => {
                    warn!(
                        "connection {}: dropping malformed frame ({} bytes): {e}",
                        self.id,
                        frame.len()
                    );
                }
            }
        }
        None
    }

    /// Closes the connection.
    ///
    /// Flips `connected` to `false` (only the first call logs), wakes a parked
    /// read loop, then shuts down and drops the write half.  Safe to call from
    /// any task, any number of times.
    pub async fn disconnect(&self) {
        let was_connected = self.connected.send_replace(false);
        if was_connected {
            info!("connection {} to {} closed", self.id, self.peer_addr);
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("connection {}: shutdown after close: {e}", self.id);
            }
        }
    }

    /// Sends the disconnect control message (best effort), then closes.
    pub async fn disconnect_with_notice(&self) {
        if self.is_connected() {
            match tokio::time::timeout(NOTICE_TIMEOUT, self.send(&Message::disconnect_notice())).await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("connection {}: disconnect notice not sent: {e}", self.id),
                Err(_) => debug!("connection {}: disconnect notice timed out", self.id),
            }
        }
        self.disconnect().await;
    }
}

/// Writes `frame` in pieces of at most `chunk_size` bytes.
///
/// `write_all` keeps retrying the remainder of a chunk when the transport
/// accepts only part of it.
async fn write_chunked<W>(writer: &mut W, frame: &[u8], chunk_size: usize) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for chunk in frame.chunks(chunk_size) {
        writer.write_all(chunk).await?;
    }
    writer.flush().await
}

/// Resolves `host:port` to the first socket address returned by the resolver.
pub(crate) async fn resolve_address(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses found for {host}:{port}"),
            )
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
