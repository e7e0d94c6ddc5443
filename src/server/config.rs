//! Core configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::protocol::constants::DEFAULT_PORT;
use crate::protocol::CodecConfig;
use crate::registry::DEFAULT_BUCKET_COUNT;

/// Default relay backlog per connection, in publish sequences
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

/// Core configuration options
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Frame codec shared with every Node
    pub codec: CodecConfig,

    /// Hash buckets in the channel registry
    pub bucket_count: usize,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Publish sequences buffered per connection before relays to it are dropped
    pub outbox_capacity: usize,

    /// Close connections that go this long without sending a complete frame
    pub read_timeout: Option<Duration>,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl CoreConfig {
    /// Create a config listening on all interfaces at the default port
    pub fn new(codec: CodecConfig) -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            codec,
            bucket_count: DEFAULT_BUCKET_COUNT,
            max_connections: 0,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
            read_timeout: None,
            tcp_nodelay: true,
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set only the port, keeping the bind interface
    pub fn port(mut self, port: u16) -> Self {
        self.bind_addr.set_port(port);
        self
    }

    /// Set the registry bucket count (at least 1)
    pub fn bucket_count(mut self, count: usize) -> Self {
        self.bucket_count = count.max(1);
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-connection outbox capacity (at least 1)
    pub fn outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{IV_LEN, KEY_LEN};
    use crate::protocol::SharedKey;

    fn codec() -> CodecConfig {
        CodecConfig::new(SharedKey::new([1; KEY_LEN], [2; IV_LEN]))
    }

    #[test]
    fn test_default_config() {
        let config = CoreConfig::new(codec());

        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert!(config.bind_addr.ip().is_unspecified());
        assert_eq!(config.bucket_count, DEFAULT_BUCKET_COUNT);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.outbox_capacity, DEFAULT_OUTBOX_CAPACITY);
        assert!(config.read_timeout.is_none());
        assert!(config.tcp_nodelay);
        assert!(!config.codec.integrity);
    }

    #[test]
    fn test_builder_port_keeps_interface() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let config = CoreConfig::new(codec()).bind(addr).port(4000);

        assert_eq!(config.bind_addr, "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn test_builder_clamps() {
        let config = CoreConfig::new(codec()).bucket_count(0).outbox_capacity(0);

        assert_eq!(config.bucket_count, 1);
        assert_eq!(config.outbox_capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = CoreConfig::new(codec().integrity(true))
            .max_connections(50)
            .read_timeout(Duration::from_secs(5))
            .tcp_nodelay(false);

        assert_eq!(config.max_connections, 50);
        assert_eq!(config.read_timeout, Some(Duration::from_secs(5)));
        assert!(!config.tcp_nodelay);
        assert!(config.codec.integrity);
    }
}
