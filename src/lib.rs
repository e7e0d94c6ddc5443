//! Reactant: an encrypted publish/subscribe broker for LAN sensor devices
//!
//! One **Core** listens for TCP connections from many **Nodes**. Nodes
//! subscribe to named channels and publish short text payloads; the Core
//! relays each publish, still encrypted, to every subscriber of its channel.
//!
//! Every unit on the wire is a fixed 256-byte AES-256-CBC frame (optionally
//! followed by an HMAC-SHA256 tag), so payloads are limited to 249 bytes.
//!
//! # Example
//!
//! ```no_run
//! use reactant::{CodecConfig, CoreConfig, CoreServer, NodeClient, NodeConfig, SharedKey};
//!
//! # async fn example() -> reactant::Result<()> {
//! let key = SharedKey::from_hex(
//!     "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f",
//!     "00112233445566778899aabbccddeeff",
//! )?;
//! let codec = CodecConfig::new(key);
//!
//! let core = CoreServer::bind(CoreConfig::new(codec.clone())).await?;
//! let addr = core.local_addr();
//! tokio::spawn(core.run());
//!
//! let node = NodeClient::connect(NodeConfig::new(1, addr, codec)).await?;
//! node.subscribe("temp", |payload| println!("temp = {}", payload)).await?;
//! node.publish("temp", "21.5").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod sensor;
pub mod server;
pub mod session;
pub mod stats;

pub use client::{connect_node, NodeClient, NodeConfig};
pub use error::{Error, Result};
pub use protocol::{CodecConfig, FrameCodec, Message, SharedKey, SourceId};
pub use queue::{BoundedQueue, QueueError};
pub use registry::{ChainedTable, ChannelRegistry, RegistryError};
pub use sensor::{adc_to_celsius, Sensor, SensorPublisher};
pub use server::{start_core_server, CoreConfig, CoreHandle, CoreServer};
pub use stats::BrokerStats;
