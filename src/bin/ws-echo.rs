//! ws-echo: WebSocket echo server
//!
//! # Usage
//!
//! ```text
//! ws-echo [OPTIONS]
//!
//! Options:
//!   --bind            <ADDR>  Address to bind [default: 0.0.0.0]
//!   --port            <PORT>  Port to listen on [default: 1234]
//!   --max-connections <N>     Connection table capacity [default: 5]
//!   --poll-timeout    <SECS>  Readiness wait bound [default: 30]
//! ```
//!
//! Every option can also be set through the environment variable named in
//! its help text (`WS_ECHO_*`). Log verbosity follows `RUST_LOG`.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ws_echo::{Config, Server};

/// Single-threaded WebSocket echo server.
///
/// Plain HTTP requests get a small test page; upgrade requests are
/// switched to WebSocket and every data message is sent straight back.
#[derive(Debug, Parser)]
#[command(name = "ws-echo", version)]
struct Cli {
    /// IP address to bind the listener to.
    #[arg(long, default_value = "0.0.0.0", env = "WS_ECHO_BIND")]
    bind: String,

    /// TCP port to listen on.
    #[arg(long, default_value_t = 1234, env = "WS_ECHO_PORT")]
    port: u16,

    /// Maximum number of simultaneous connections.
    ///
    /// Connections arriving while the table is full are accepted and
    /// closed immediately.
    #[arg(long, default_value_t = 5, env = "WS_ECHO_MAX_CONNECTIONS")]
    max_connections: usize,

    /// Upper bound on one readiness wait, in seconds.
    #[arg(long, default_value_t = 30, env = "WS_ECHO_POLL_TIMEOUT")]
    poll_timeout: u64,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<Config> {
        let bind_addr: SocketAddr = format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("invalid bind address: '{}:{}'", self.bind, self.port))?;

        anyhow::ensure!(self.max_connections > 0, "--max-connections must be at least 1");

        Ok(Config::builder()
            .bind_addr(bind_addr)
            .max_connections(self.max_connections)
            .poll_timeout(Duration::from_secs(self.poll_timeout))
            .build())
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    let addr = config.bind_addr;

    let server = Server::bind(config).with_context(|| format!("failed to listen on {addr}"))?;
    server.run().context("server loop failed")?;

    info!("ws-echo stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["ws-echo"]);
        assert_eq!(cli.bind, "0.0.0.0");
        assert_eq!(cli.port, 1234);
        assert_eq!(cli.max_connections, 5);
        assert_eq!(cli.poll_timeout, 30);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "ws-echo",
            "--bind",
            "127.0.0.1",
            "--port",
            "9001",
            "--max-connections",
            "64",
            "--poll-timeout",
            "2",
        ]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:9001");
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.poll_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_default_config_matches_library_default() {
        let config = Cli::parse_from(["ws-echo"]).into_config().unwrap();
        let default = Config::default();
        assert_eq!(config.bind_addr, default.bind_addr);
        assert_eq!(config.max_connections, default.max_connections);
        assert_eq!(config.poll_timeout, default.poll_timeout);
    }

    #[test]
    fn test_invalid_bind_returns_error() {
        let cli = Cli {
            bind: "not.an.ip".to_string(),
            port: 1234,
            max_connections: 5,
            poll_timeout: 30,
        };
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn test_zero_connections_rejected() {
        let cli = Cli::parse_from(["ws-echo", "--max-connections", "0"]);
        assert!(cli.into_config().is_err());
    }
}
