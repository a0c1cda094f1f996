//! The application hook and the loop that feeds it.
//!
//! A [`DispatchLoop`] is the consumer half of a connection: it removes the
//! oldest message from the inbox, hands it to the [`MessageHandler`], and
//! records it in the [`Archive`].  Handler failures (errors or panics) are
//! logged and do not stop the loop; the failed message is archived anyway, so
//! a message that always fails cannot wedge the connection.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use junction_core::Message;
use serde_json::Value;
use tracing::{debug, error};

use crate::connection::Connection;
use crate::inbox::{Archive, Inbox, Take};

// ── Handler hook ──────────────────────────────────────────────────────────────

/// Application logic invoked once per received message.
///
/// `connection` is the connection the message arrived on; handlers may use
/// it to reply.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(
        &self,
        header: &str,
        payload: &Value,
        connection: &Connection,
    ) -> anyhow::Result<()>;
}

/// Handler that accepts every message and does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl MessageHandler for NoopHandler {
    async fn on_message(&self, _: &str, _: &Value, _: &Connection) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Adapter returned by [`handler_fn`].
#[derive(Debug, Clone)]
pub struct FnHandler<F>(F);

/// Turns a synchronous closure into a [`MessageHandler`].
///
/// ```rust
/// use junction_net::handler_fn;
///
/// let handler = handler_fn(|header, payload, _conn| {
///     println!("{header}: {payload}");
///     Ok(())
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&str, &Value, &Connection) -> anyhow::Result<()> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&str, &Value, &Connection) -> anyhow::Result<()> + Send + Sync,
{
    async fn on_message(
        &self,
        header: &str,
        payload: &Value,
        connection: &Connection,
    ) -> anyhow::Result<()> {
        (self.0)(header, payload, connection)
    }
}

// ── Dispatch loop ─────────────────────────────────────────────────────────────

/// Counters returned when a dispatch loop finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages handed to the handler (successful or not).
    pub dispatched: u64,
    /// Messages whose handler returned an error or panicked.
    pub failed: u64,
}

/// Consumer task for one connection's inbox.
pub struct DispatchLoop {
    connection: Arc<Connection>,
    inbox: Arc<Inbox>,
    archive: Arc<Archive>,
    handler: Arc<dyn MessageHandler>,
    idle_poll: Duration,
}

impl DispatchLoop {
    pub fn new(
        connection: Arc<Connection>,
        inbox: Arc<Inbox>,
        archive: Arc<Archive>,
        handler: Arc<dyn MessageHandler>,
        idle_poll: Duration,
    ) -> Self {
        Self {
            connection,
            inbox,
            archive,
            handler,
            idle_poll,
        }
    }

    /// Drains the inbox until it is closed and empty.
    pub async fn run(self) -> DispatchStats {
        let mut stats = DispatchStats::default();
        loop {
            match self.inbox.take() {
                Take::Message(message) => {
                    if !self.dispatch_one(&message).await {
                        stats.failed += 1;
                    }
                    stats.dispatched += 1;
                    self.archive.record(self.connection.id(), message);
                }
                Take::Empty => self.inbox.wait(self.idle_poll).await,
                Take::Closed => break,
            }
        }
        debug!(
            "connection {}: dispatch loop stopped ({} dispatched, {} failed)",
            self.connection.id(),
            stats.dispatched,
            stats.failed
        );
        stats
    }

    /// Invokes the handler once.  Returns `false` if it failed.
    async fn dispatch_one(&self, message: &Message) -> bool {
        let call = self
            .handler
            .on_message(message.header(), message.payload(), &self.connection);

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(
                    "connection {}: handler failed on {}: {e:#}",
                    self.connection.id(),
                    message.header()
                );
                false
            }
            Err(_) => {
                error!(
                    "connection {}: handler panicked on {}",
                    self.connection.id(),
                    message.header()
                );
                false
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
