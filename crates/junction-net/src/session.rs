//! Wires one connection to its read task and dispatch task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::{CloseReason, Connection};
use crate::dispatch::{DispatchLoop, DispatchStats, MessageHandler};
use crate::inbox::{Archive, Inbox};

/// The two tasks serving one connection.
pub(crate) struct Session {
    read_task: JoinHandle<()>,
    dispatch_task: JoinHandle<DispatchStats>,
}

impl Session {
    /// Waits for both tasks.  Returns the dispatch counters, or `None` if the
    /// dispatch task was cancelled or panicked.
    pub(crate) async fn join(self) -> Option<DispatchStats> {
        if let Err(e) = self.read_task.await {
            warn!("read task ended abnormally: {e}");
        }
        match self.dispatch_task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("dispatch task ended abnormally: {e}");
                None
            }
        }
    }
}

/// Spawns the read loop and the dispatch loop for `connection`.
///
/// The read task pushes into `inbox`; when it stops it closes the inbox
/// (the dispatch loop then drains what is left and exits) and calls
/// `on_close` with the reason.
pub(crate) fn spawn_session<C>(
    connection: Arc<Connection>,
    inbox: Arc<Inbox>,
    archive: Arc<Archive>,
    handler: Arc<dyn MessageHandler>,
    idle_poll: Duration,
    on_close: C,
) -> Session
where
    C: FnOnce(CloseReason) + Send + 'static,
{
    let dispatch_task = tokio::spawn(
        DispatchLoop::new(
            Arc::clone(&connection),
            Arc::clone(&inbox),
            archive,
            handler,
            idle_poll,
        )
        .run(),
    );

    let read_task = tokio::spawn(async move {
        let reason = match connection.run(|message| {
            inbox.push(message);
        })
        .await
        {
            Ok(reason) => reason,
            Err(e) => {
                warn!("connection {}: read loop not started: {e}", connection.id());
                CloseReason::Local
            }
        };
        inbox.close();
        debug!("connection {}: session closing ({reason})", connection.id());
        on_close(reason);
    });

    Session {
        read_task,
        dispatch_task,
    }
}
