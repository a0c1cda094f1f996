//! Per-connection inbox and the shared archive of dispatched messages.
//!
//! The inbox is the only structure shared between a connection's read task
//! (which pushes) and its dispatch task (which pops).  Removal is strictly
//! oldest-first.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use junction_core::Message;
use tokio::sync::Notify;
use tracing::debug;

use crate::connection::ConnectionId;
use crate::lock;

// ── Inbox ─────────────────────────────────────────────────────────────────────

/// Result of [`Inbox::take`].
#[derive(Debug, PartialEq)]
pub enum Take {
    /// The oldest pending message.
    Message(Message),
    /// Nothing pending yet; the producer is still running.
    Empty,
    /// Nothing pending and the producer has closed the inbox.
    Closed,
}

#[derive(Debug, Default)]
struct InboxState {
    queue: VecDeque<Message>,
    closed: bool,
}

/// Unbounded FIFO of received messages awaiting dispatch.
#[derive(Debug, Default)]
pub struct Inbox {
    state: Mutex<InboxState>,
    ready: Notify,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `message` and wakes the consumer.
    ///
    /// Returns `false` (dropping the message) if the inbox was already closed.
    pub fn push(&self, message: Message) -> bool {
        {
            let mut state = lock(&self.state);
            if state.closed {
                debug!("inbox closed; dropping {}", message.header());
                return false;
            }
            state.queue.push_back(message);
        }
        self.ready.notify_one();
        true
    }

    /// Removes the oldest pending message, or reports whether more can arrive.
    pub fn take(&self) -> Take {
        let mut state = lock(&self.state);
        match state.queue.pop_front() {
            Some(message) => Take::Message(message),
            None if state.closed => Take::Closed,
            None => Take::Empty,
        }
    }

    /// Marks the producer as finished.  Pending messages stay available.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.ready.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).queue.is_empty()
    }

    /// Waits until a push or close is signalled, or `max` elapses.
    pub async fn wait(&self, max: Duration) {
        let _ = tokio::time::timeout(max, self.ready.notified()).await;
    }
}

// ── Archive ───────────────────────────────────────────────────────────────────

/// One dispatched message and the connection it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedMessage {
    pub connection: ConnectionId,
    pub message: Message,
}

/// Append-only log of dispatched messages, in dispatch order.
///
/// Entries are never pruned here; retention is up to the embedding application.
#[derive(Debug, Default)]
pub struct Archive {
    entries: Mutex<Vec<ArchivedMessage>>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, connection: ConnectionId, message: Message) {
        lock(&self.entries).push(ArchivedMessage {
            connection,
            message,
        });
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// Copies every entry, oldest first.
    pub fn snapshot(&self) -> Vec<ArchivedMessage> {
        lock(&self.entries).clone()
    }

    /// Messages dispatched for one connection, in dispatch order.
    pub fn messages_for(&self, connection: ConnectionId) -> Vec<Message> {
        lock(&self.entries)
            .iter()
            .filter(|entry| entry.connection == connection)
            .map(|entry| entry.message.clone())
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn msg(n: u64) -> Message {
        Message::new("/n", json!(n))
    }

    #[test]
    fn test_take_is_fifo() {
        let inbox = Inbox::new();
        for n in 0..3 {
            assert!(inbox.push(msg(n)));
        }

        assert_eq!(inbox.take(), Take::Message(msg(0)));
        assert_eq!(inbox.take(), Take::Message(msg(1)));
        assert_eq!(inbox.take(), Take::Message(msg(2)));
        assert_eq!(inbox.take(), Take::Empty);
    }

    #[test]
    fn test_take_drains_pending_before_reporting_closed() {
        // Arrange
        let inbox = Inbox::new();
        inbox.push(msg(1));
        inbox.close();

        // Act / Assert – the message pushed before close is still delivered
        assert_eq!(inbox.take(), Take::Message(msg(1)));
        assert_eq!(inbox.take(), Take::Closed);
    }

    #[test]
    fn test_take_on_open_empty_inbox_is_empty() {
        assert_eq!(Inbox::new().take(), Take::Empty);
    }

    #[test]
    fn test_push_after_close_is_rejected() {
        let inbox = Inbox::new();
        inbox.close();
        assert!(!inbox.push(msg(9)));
        assert!(inbox.is_empty());
        assert!(inbox.is_closed());
    }

    #[tokio::test]
    async fn test_wait_returns_promptly_after_push_from_another_task() {
        let inbox = Arc::new(Inbox::new());
        let producer = {
            let inbox = Arc::clone(&inbox);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                inbox.push(msg(7));
            })
        };

        let started = std::time::Instant::now();
        inbox.wait(Duration::from_secs(5)).await;
        producer.await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(inbox.len(), 1);
    }

    #[tokio::test]
    async fn test_wait_times_out_when_idle() {
        let inbox = Inbox::new();
        let started = tokio::time::Instant::now();
        inbox.wait(Duration::from_millis(20)).await;
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_archive_keeps_order_and_filters_by_connection() {
        // Arrange
        let archive = Archive::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        // Act
        archive.record(a, msg(1));
        archive.record(b, msg(2));
        archive.record(a, msg(3));

        // Assert
        assert_eq!(archive.len(), 3);
        assert_eq!(archive.messages_for(a), vec![msg(1), msg(3)]);
        assert_eq!(archive.messages_for(b), vec![msg(2)]);
        let order: Vec<_> = archive.snapshot().into_iter().map(|e| e.message).collect();
        assert_eq!(order, vec![msg(1), msg(2), msg(3)]);
    }
}
