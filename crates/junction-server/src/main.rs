//! Junction server entry point.
//!
//! Listens for Junction clients, logs every message it receives and echoes
//! it back to the sender unchanged.
//!
//! # Usage
//!
//! ```text
//! junction-server [OPTIONS]
//!
//! Options:
//!   --config <FILE>  TOML config file
//!   --host   <HOST>  Bind address (overrides the file)
//!   --port   <PORT>  Bind port (overrides the file)
//! ```
//!
//! | Variable          | Equivalent flag |
//! |-------------------|-----------------|
//! | `JUNCTION_CONFIG` | `--config`      |
//! | `JUNCTION_HOST`   | `--host`        |
//! | `JUNCTION_PORT`   | `--port`        |
//!
//! Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use junction_net::{Connection, JunctionConfig, Message, MessageHandler, Server, ServerEvent};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Junction echo server.
#[derive(Debug, Parser)]
#[command(name = "junction-server", about = "Echo/log server for Junction clients", version)]
struct Cli {
    /// TOML configuration file.  Defaults apply when omitted.
    #[arg(long, env = "JUNCTION_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind.  `0.0.0.0` accepts connections on every interface.
    #[arg(long, env = "JUNCTION_HOST")]
    host: Option<String>,

    /// Port to bind.  `0` picks a free port.
    #[arg(long, env = "JUNCTION_PORT")]
    port: Option<u16>,
}

impl Cli {
    /// Loads the config file (if any) and applies the CLI overrides.
    fn into_config(self) -> anyhow::Result<JunctionConfig> {
        let config = JunctionConfig::load_or_default(self.config.as_deref())
            .context("failed to load configuration")?;
        Ok(config.with_network_overrides(self.host, self.port))
    }
}

// ── Handler ───────────────────────────────────────────────────────────────────

/// Logs each message and sends it straight back on the same connection.
struct EchoHandler;

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn on_message(
        &self,
        header: &str,
        payload: &Value,
        connection: &Connection,
    ) -> anyhow::Result<()> {
        info!("{} {header} {payload}", connection.peer_addr());
        connection
            .send(&Message::new(header, payload.clone()))
            .await
            .with_context(|| format!("failed to echo {header} to {}", connection.peer_addr()))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    let (server, mut events) = Server::new(config.transport.clone(), Arc::new(EchoHandler));
    let addr = server
        .start(&config.network.host, config.network.port)
        .await
        .with_context(|| {
            format!(
                "failed to start server on {}:{}",
                config.network.host, config.network.port
            )
        })?;
    info!("Junction server listening on {addr}.  Press Ctrl-C to exit.");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                match signal {
                    Ok(()) => info!("shutdown signal received"),
                    Err(e) => error!("failed to listen for Ctrl-C: {e}"),
                }
                break;
            }
            event = events.recv() => match event {
                Some(ServerEvent::Connected { id, peer }) => info!("client {id} connected from {peer}"),
                Some(ServerEvent::Disconnected { id, reason }) => info!("client {id} disconnected: {reason}"),
                None => break,
            },
        }
    }

    server.stop().await;
    info!("Junction server stopped ({} messages handled)", server.archive().len());
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
