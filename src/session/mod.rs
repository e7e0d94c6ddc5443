//! Connection session state

pub mod state;

pub use state::{ConnectionId, ConnectionPhase, ConnectionState};
