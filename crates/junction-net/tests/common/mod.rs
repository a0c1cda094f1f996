//! Helpers shared by the junction-net integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use junction_net::{Connection, MessageHandler, Server, ServerEvent, TransportConfig};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

/// Records every `(header, payload)` it is handed.  Panics on `/panic` and
/// fails on `/fail`; optionally echoes messages back to their sender.
#[derive(Default)]
pub struct Recorder {
    calls: Mutex<Vec<(String, Value)>>,
    echo: bool,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn echoing() -> Arc<Self> {
        Arc::new(Self {
            echo: true,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn on_message(
        &self,
        header: &str,
        payload: &Value,
        connection: &Connection,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((header.to_string(), payload.clone()));
        match header {
            "/panic" => panic!("handler asked to panic"),
            "/fail" => anyhow::bail!("handler asked to fail"),
            _ => {}
        }
        if self.echo {
            connection
                .send(&junction_net::Message::new(header, payload.clone()))
                .await?;
        }
        Ok(())
    }
}

/// Polls `condition` every 10 ms, panicking after five seconds.
pub async fn wait_until<F>(what: &str, condition: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Transport settings with a short idle poll so tests settle quickly.
pub fn fast_transport() -> TransportConfig {
    TransportConfig {
        idle_poll_ms: 10,
        ..Default::default()
    }
}

/// Starts a server on an ephemeral loopback port.
pub async fn start_server(
    handler: Arc<dyn MessageHandler>,
) -> (Server, UnboundedReceiver<ServerEvent>, u16) {
    let (server, events) = Server::new(fast_transport(), handler);
    let addr = server.start("127.0.0.1", 0).await.unwrap();
    (server, events, addr.port())
}

/// Receives the next event, panicking after five seconds.
pub async fn next_event(events: &mut UnboundedReceiver<ServerEvent>) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for a server event")
        .expect("server event channel closed")
}
