//! # junction-net
//!
//! Point-to-point messaging over TCP built on the `junction-core` frame codec.
//!
//! ```text
//! socket bytes ─► FrameDecoder ─► Message ─► Inbox ─► DispatchLoop ─► handler ─► Archive
//!                 (read task, one per connection)      (dispatch task, one per connection)
//! ```
//!
//! - **`connection`** – [`Connection`] owns one TCP socket: a read loop that
//!   turns frames into messages, and a chunked, serialised send path.
//! - **`inbox`** – the per-connection FIFO between the read task and the
//!   dispatch task, and the append-only [`Archive`] of dispatched messages.
//! - **`dispatch`** – the [`MessageHandler`] hook and the [`DispatchLoop`]
//!   that drains an inbox into it.
//! - **`client`** / **`server`** – the two roles composed from the pieces above.
//! - **`config`** – TOML-backed configuration shared by both roles.

pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod inbox;
pub mod server;

mod session;

pub use client::{Client, ClientError, ClientState};
pub use config::{ConfigError, JunctionConfig, NetworkConfig, TransportConfig};
pub use connection::{CloseReason, Connection, ConnectionError, ConnectionId};
pub use dispatch::{handler_fn, DispatchLoop, DispatchStats, FnHandler, MessageHandler, NoopHandler};
pub use inbox::{Archive, ArchivedMessage, Inbox};
pub use junction_core::Message;
pub use server::{Server, ServerError, ServerEvent, DEFAULT_JOIN_TIMEOUT};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a std mutex, recovering the data if a previous holder panicked.
///
/// No critical section in this crate leaves its data half-updated.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
