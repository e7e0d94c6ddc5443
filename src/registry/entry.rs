//! Channel entry and subscriber records

use std::net::SocketAddr;

use crate::session::ConnectionId;

/// A Node subscribed to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    /// Node identifier (direction flag already masked off)
    pub node_id: u32,
    /// Connection the Node subscribed over
    pub connection: ConnectionId,
    /// Remote address of that connection
    pub addr: SocketAddr,
}

impl Subscriber {
    pub fn new(node_id: u32, connection: ConnectionId, addr: SocketAddr) -> Self {
        Self {
            node_id,
            connection,
            addr,
        }
    }
}

/// Result of adding a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The channel did not exist and was created with this subscriber
    Created,
    /// The Node was appended to an existing channel
    Added,
    /// The Node was already subscribed; its connection binding was refreshed
    Refreshed,
}

/// Result of removing a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The subscriber was removed and others remain
    Removed,
    /// The last subscriber was removed and the channel deleted
    ChannelRemoved,
}

/// Per-channel state stored in the registry
#[derive(Debug, Clone)]
pub struct ChannelEntry {
    subscribers: Vec<Subscriber>,

    /// Number of publishes relayed on this channel
    pub publish_count: u64,
}

impl ChannelEntry {
    /// Create a channel with its first subscriber
    pub fn new(first: Subscriber) -> Self {
        Self {
            subscribers: vec![first],
            publish_count: 0,
        }
    }

    /// Subscribers in insertion order
    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn position(&self, node_id: u32) -> Option<usize> {
        self.subscribers.iter().position(|s| s.node_id == node_id)
    }

    /// Append a subscriber, or refresh the binding of an existing one
    pub(super) fn upsert(&mut self, subscriber: Subscriber) -> SubscribeOutcome {
        match self.position(subscriber.node_id) {
            Some(i) => {
                self.subscribers[i] = subscriber;
                SubscribeOutcome::Refreshed
            }
            None => {
                self.subscribers.push(subscriber);
                SubscribeOutcome::Added
            }
        }
    }

    /// Remove a subscriber, keeping the order of the rest
    pub(super) fn remove(&mut self, node_id: u32) -> Option<Subscriber> {
        let i = self.position(node_id)?;
        Some(self.subscribers.remove(i))
    }
}
