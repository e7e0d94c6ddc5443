//! Node client
//!
//! Connects a sensor device to the Core to publish readings and receive the
//! channels it subscribes to.

pub mod config;
pub mod node;

pub use config::NodeConfig;
pub use node::{connect_node, Callback, NodeClient};
