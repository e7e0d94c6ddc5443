//! Node configuration

use std::net::SocketAddr;

use crate::protocol::CodecConfig;

/// Node connection options
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identifier carried in subscription frames (non-zero, bit 15 clear)
    pub node_id: u32,

    /// Address of the Core
    pub core_addr: SocketAddr,

    /// Frame codec, which must match the Core's
    pub codec: CodecConfig,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
}

impl NodeConfig {
    pub fn new(node_id: u32, core_addr: SocketAddr, codec: CodecConfig) -> Self {
        Self {
            node_id,
            core_addr,
            codec,
            tcp_nodelay: true,
        }
    }

    /// Enable or disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.tcp_nodelay = enabled;
        self
    }
}
