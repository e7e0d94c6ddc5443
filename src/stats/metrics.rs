//! Statistics for the Core broker

use std::time::Duration;

/// Broker-wide counters, maintained by the broker loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Connections rejected by the connection limit
    pub rejected_connections: u64,
    /// Currently open connections
    pub active_connections: u64,
    /// Frames received from all connections
    pub frames_received: u64,
    /// Complete publish sequences received
    pub publishes: u64,
    /// Publishes to channels without subscribers
    pub unrouted_publishes: u64,
    /// Publish sequences handed to a subscriber's outbox
    pub relays: u64,
    /// Relays dropped because a subscriber's outbox was full
    pub relay_drops: u64,
    /// Subscribers evicted after a failed delivery
    pub evictions: u64,
    /// Frames that failed to decode or authenticate
    pub rejected_frames: u64,
    /// Channels currently in the registry
    pub channels: u64,
    /// Time since the broker started
    pub uptime: Duration,
}

impl BrokerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of relays that reached a subscriber outbox
    pub fn delivery_ratio(&self) -> f64 {
        let attempted = self.relays + self.relay_drops + self.evictions;
        if attempted == 0 {
            1.0
        } else {
            self.relays as f64 / attempted as f64
        }
    }
}
