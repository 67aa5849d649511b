//! # ws-echo: readiness-driven WebSocket echo server
//!
//! A single-threaded server that speaks plain HTTP until a client asks for
//! a protocol upgrade, then switches that connection to WebSocket framing
//! and echoes back every data message it receives.
//!
//! ## Layout
//!
//! - [`server`]: the event loop, owning the listener and the connection table
//! - [`table`]: fixed-capacity, densely packed connection registry
//! - [`connection`]: per-connection HTTP → WebSocket state machine
//! - [`http`]: callback-driven HTTP request parser
//! - [`codec`]: event-driven WebSocket codec (receive/send pumps)
//! - [`handshake`]: accept key derivation and canned HTTP responses
//!
//! ## Example
//!
//! ```no_run
//! use ws_echo::{Config, server::Server};
//!
//! let config = Config::builder()
//!     .bind_addr("127.0.0.1:9001".parse().unwrap())
//!     .max_connections(16)
//!     .build();
//!
//! let server = Server::bind(config)?;
//! let shutdown = server.shutdown_handle();
//! std::thread::spawn(move || server.run());
//! // ...
//! shutdown.shutdown()?;
//! # Ok::<(), ws_echo::Error>(())
//! ```

use std::net::SocketAddr;
use std::time::Duration;

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod mask;
pub mod protocol;
pub mod server;
pub mod table;
pub mod utf8;

#[cfg(test)]
mod testing;

pub use codec::{EventContext, MessageHandler, Outbox, Transport};
pub use connection::{Connection, Phase};
pub use error::{Error, Result};
pub use frame::{Frame, OpCode};
pub use protocol::Message;
pub use server::{Server, ShutdownHandle};
pub use table::ConnectionTable;

/// WebSocket GUID for handshake
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Length of a client `Sec-WebSocket-Key` value (base64 of 16 bytes)
pub const CLIENT_KEY_LEN: usize = 24;

/// Length of a `Sec-WebSocket-Accept` value (base64 of a 20 byte SHA-1)
pub const ACCEPT_KEY_LEN: usize = 20_usize.div_ceil(3) * 4;

/// Maximum WebSocket frame header size (2 + 8 + 4 = 14 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Small message threshold (< 126 bytes uses 2-byte header)
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Medium message threshold (< 64KB uses 4-byte header)
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// Server configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ws_echo::Config;
///
/// let config = Config::builder()
///     .max_connections(8)
///     .poll_timeout(Duration::from_secs(5))
///     .max_message_size(64 * 1024)
///     .build();
///
/// assert_eq!(config.max_connections, 8);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the listening socket binds to (default: 0.0.0.0:1234)
    pub bind_addr: SocketAddr,
    /// Connection table capacity, also used as the listen backlog (default: 5)
    pub max_connections: usize,
    /// Upper bound on one readiness wait (default: 30s)
    pub poll_timeout: Duration,
    /// Scratch buffer size for a single socket read (default: 1KB)
    pub read_buffer_size: usize,
    /// Maximum bytes of HTTP request head retained while handshaking (default: 8KB)
    pub max_request_size: usize,
    /// Maximum frame size (default: 1MB)
    pub max_frame_size: usize,
    /// Maximum reassembled message size (default: 1MB)
    pub max_message_size: usize,
    /// Outbound backlog per connection above which reading pauses (default: 1MB)
    pub max_pending_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 1234)),
            max_connections: 5,
            poll_timeout: Duration::from_secs(30),
            read_buffer_size: 1024,
            max_request_size: 8 * 1024,
            max_frame_size: 1024 * 1024,
            max_message_size: 1024 * 1024,
            max_pending_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for server configuration
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the listening address
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the connection table capacity (clamped to at least 1)
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count.max(1);
        self
    }

    /// Set the readiness wait timeout
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = timeout;
        self
    }

    /// Set the per-read scratch buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size.max(1);
        self
    }

    /// Set the maximum retained HTTP request head size
    pub fn max_request_size(mut self, size: usize) -> Self {
        self.config.max_request_size = size;
        self
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum message size
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the outbound backlog at which a connection stops reading
    /// (clamped to at least 1)
    pub fn max_pending_bytes(mut self, size: usize) -> Self {
        self.config.max_pending_bytes = size.max(1);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::error::{Error, Result};
    pub use crate::frame::{Frame, OpCode};
    pub use crate::protocol::Message;
    pub use crate::server::{Server, ShutdownHandle};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_key_len() {
        assert_eq!(ACCEPT_KEY_LEN, 28);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_addr.port(), 1234);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.poll_timeout, Duration::from_secs(30));
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.max_pending_bytes, 1024 * 1024);
    }

    #[test]
    fn test_builder_clamps_capacity() {
        let config = Config::builder().max_connections(0).build();
        assert_eq!(config.max_connections, 1);
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::builder()
            .bind_addr("127.0.0.1:0".parse().unwrap())
            .max_frame_size(4096)
            .max_message_size(8192)
            .build();
        assert_eq!(config.bind_addr.port(), 0);
        assert_eq!(config.max_frame_size, 4096);
        assert_eq!(config.max_message_size, 8192);
    }

    #[test]
    fn test_builder_pending_bytes() {
        assert_eq!(Config::builder().max_pending_bytes(0).build().max_pending_bytes, 1);
        let config = Config::builder().max_pending_bytes(4096).build();
        assert_eq!(config.max_pending_bytes, 4096);
    }
}
