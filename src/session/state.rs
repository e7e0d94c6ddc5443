//! Per-connection state machine
//!
//! Tracks where an accepted Node connection is in the frame protocol. A publish
//! spans two frames, so the broker has to remember the channel frame until the
//! payload frame arrives on the same connection.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::Bytes;

/// Broker-assigned connection identifier, never reused
pub type ConnectionId = u64;

/// Where a connection is in the frame protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Waiting for a publish channel frame or a subscription frame
    AwaitingFrame,
    /// Channel frame of a publish received, waiting for its payload frame
    AwaitingPayload {
        /// Decoded channel name
        channel: String,
        /// Channel frame exactly as received, relayed verbatim
        channel_frame: Bytes,
    },
}

/// State of one accepted connection
#[derive(Debug)]
pub struct ConnectionState {
    /// Unique connection ID
    pub id: ConnectionId,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: ConnectionPhase,

    /// Connection start time
    pub connected_at: Instant,

    /// Node id learned from the most recent subscription frame
    pub node_id: Option<u32>,

    /// Frames received on this connection
    pub frames_received: u64,
}

impl ConnectionState {
    /// Create the state of a freshly accepted connection
    pub fn new(id: ConnectionId, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: ConnectionPhase::AwaitingFrame,
            connected_at: Instant::now(),
            node_id: None,
            frames_received: 0,
        }
    }

    /// Remember a publish channel frame until its payload frame arrives
    pub fn await_payload(&mut self, channel: String, channel_frame: Bytes) {
        self.phase = ConnectionPhase::AwaitingPayload {
            channel,
            channel_frame,
        };
    }

    /// Take the pending publish, returning to `AwaitingFrame`
    pub fn take_pending(&mut self) -> Option<(String, Bytes)> {
        match std::mem::replace(&mut self.phase, ConnectionPhase::AwaitingFrame) {
            ConnectionPhase::AwaitingPayload {
                channel,
                channel_frame,
            } => Some((channel, channel_frame)),
            ConnectionPhase::AwaitingFrame => None,
        }
    }

    /// Whether a publish channel frame is waiting for its payload
    pub fn is_awaiting_payload(&self) -> bool {
        matches!(self.phase, ConnectionPhase::AwaitingPayload { .. })
    }

    /// Get connection duration
    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn test_publish_phase_cycle() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 10112);
        let mut state = ConnectionState::new(1, addr);

        assert_eq!(state.phase, ConnectionPhase::AwaitingFrame);
        assert!(state.take_pending().is_none());

        state.await_payload("temp".into(), Bytes::from_static(&[1, 2, 3]));
        assert!(state.is_awaiting_payload());

        let (channel, frame) = state.take_pending().unwrap();
        assert_eq!(channel, "temp");
        assert_eq!(&frame[..], &[1, 2, 3]);
        assert_eq!(state.phase, ConnectionPhase::AwaitingFrame);
    }
}
