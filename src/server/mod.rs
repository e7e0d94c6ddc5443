//! Core (broker) server
//!
//! ```text
//!                +------------------ CoreServer loop ------------------+
//!   accept ----> | Broker: ChannelRegistry + connection table + stats  |
//!   frames ----> |                                                     | ---> outboxes
//!   control ---> |                                                     |
//!                +-----------------------------------------------------+
//! ```

pub mod broker;
pub mod config;
pub(crate) mod connection;
pub mod handle;
pub mod listener;

pub use broker::BrokerPhase;
pub use config::{CoreConfig, DEFAULT_OUTBOX_CAPACITY};
pub use handle::CoreHandle;
pub use listener::{start_core_server, CoreServer};
