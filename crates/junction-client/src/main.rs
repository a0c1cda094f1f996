//! Junction client entry point.
//!
//! Connects to a Junction server, turns each line of standard input into a
//! message and logs every message the server sends back.
//!
//! Input lines have the form `<header> [json-payload]`:
//!
//! ```text
//! /ping {"n": 1}
//! /chat "hello"
//! /tick
//! ```
//!
//! A line without a payload sends `null`.  Blank lines are ignored.  End of
//! input, Ctrl-C, or the server closing the connection ends the session.
//!
//! Flags and environment variables are the same as `junction-server`:
//! `--config`/`JUNCTION_CONFIG`, `--host`/`JUNCTION_HOST`,
//! `--port`/`JUNCTION_PORT`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use junction_net::{Client, ClientError, Connection, JunctionConfig, Message, MessageHandler};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Junction line-based client.
#[derive(Debug, Parser)]
#[command(name = "junction-client", about = "Send stdin lines to a Junction server", version)]
struct Cli {
    /// TOML configuration file.  Defaults apply when omitted.
    #[arg(long, env = "JUNCTION_CONFIG")]
    config: Option<PathBuf>,

    /// Server host name or IP address.
    #[arg(long, env = "JUNCTION_HOST")]
    host: Option<String>,

    /// Server port.
    #[arg(long, env = "JUNCTION_PORT")]
    port: Option<u16>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<JunctionConfig> {
        let config = JunctionConfig::load_or_default(self.config.as_deref())
            .context("failed to load configuration")?;
        Ok(config.with_network_overrides(self.host, self.port))
    }
}

/// Parses one input line into a message.  Returns `None` for blank lines.
fn parse_line(line: &str) -> anyhow::Result<Option<Message>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (header, rest) = match line.split_once(char::is_whitespace) {
        Some((header, rest)) => (header, rest.trim()),
        None => (line, ""),
    };
    let payload = if rest.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(rest).with_context(|| format!("payload is not valid JSON: {rest}"))?
    };
    Ok(Some(Message::new(header, payload)))
}

// ── Handler ───────────────────────────────────────────────────────────────────

struct LogHandler;

#[async_trait]
impl MessageHandler for LogHandler {
    async fn on_message(&self, header: &str, payload: &Value, _: &Connection) -> anyhow::Result<()> {
        info!("received {header} {payload}");
        Ok(())
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
    let client = Client::new(config.transport.clone(), Arc::new(LogHandler));
    let addr = client
        .connect(&config.network.host, config.network.port)
        .await
        .with_context(|| {
            format!(
                "failed to connect to {}:{}",
                config.network.host, config.network.port
            )
        })?;
    info!("connected to {addr}; type `<header> [json-payload]` lines to send");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    let closed = client.closed();
    tokio::pin!(shutdown, closed);
    let mut finished = false;

    loop {
        tokio::select! {
            _ = &mut closed => {
                info!("server closed the connection");
                finished = true;
                break;
            }
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    error!("failed to listen for Ctrl-C: {e}");
                }
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(message)) => match client.send(&message).await {
                        Ok(()) => {}
                        Err(ClientError::NotConnected) => {
                            warn!("not connected; dropping {}", message.header());
                        }
                        Err(e) => warn!("send failed: {e}"),
                    },
                    Ok(None) => {}
                    Err(e) => warn!("{e:#}"),
                },
                Ok(None) => break,
                Err(e) => {
                    error!("failed to read stdin: {e}");
                    break;
                }
            },
        }
    }

    client.disconnect().await;
    if !finished {
        closed.await;
    }
    info!("Junction client stopped ({} messages received)", client.archive().len());
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_line_with_json_payload() {
        let msg = parse_line(r#"/ping {"n": 1}"#).unwrap().unwrap();
        assert_eq!(msg, Message::new("/ping", json!({"n": 1})));
    }

    #[test]
    fn test_parse_line_without_payload_sends_null() {
        let msg = parse_line("  /tick  ").unwrap().unwrap();
        assert_eq!(msg, Message::new("/tick", Value::Null));
    }

    #[test]
    fn test_parse_blank_line_is_none() {
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn test_parse_line_with_invalid_json_is_error() {
        let err = parse_line("/chat hello world").unwrap_err();
        assert!(err.to_string().contains("not valid JSON"));
    }

    #[test]
    fn test_cli_port_override_keeps_default_host() {
        // Arrange
        let cli = Cli::try_parse_from(["junction-client", "--port", "7777"]).unwrap();

        // Act
        let config = cli.into_config().unwrap();

        // Assert
        assert_eq!(config.network.host, "127.0.0.1");
        assert_eq!(config.network.port, 7777);
    }

    #[test]
    fn test_cli_reads_config_file() {
        let path = std::env::temp_dir().join(format!("junction-client-{}.toml", std::process::id()));
        std::fs::write(&path, "[network]\nhost = \"10.1.2.3\"\nport = 9001\n").unwrap();

        let cli = Cli::try_parse_from(["junction-client", "--config", path.to_str().unwrap()]).unwrap();
        let config = cli.into_config();
        let _ = std::fs::remove_file(&path);

        let config = config.unwrap();
        assert_eq!(config.network.host, "10.1.2.3");
        assert_eq!(config.network.port, 9001);
    }
}
