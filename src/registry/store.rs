//! Channel registry
//!
//! Maps channel names to their subscriber lists. The registry keeps one
//! invariant on top of the table: a channel with no subscribers does not exist.
//! Channels are created by the first subscribe and deleted as soon as their
//! last subscriber leaves, whether by unsubscribe or by eviction.
//!
//! The registry is owned and mutated by the broker loop alone, so it carries
//! no internal locking.

use super::entry::{ChannelEntry, RemoveOutcome, SubscribeOutcome, Subscriber};
use super::error::RegistryError;
use super::table::{exact_match, fnv1a, ChainedTable};

/// Default number of hash buckets
pub const DEFAULT_BUCKET_COUNT: usize = 64;

/// Registry of channel subscriptions
pub struct ChannelRegistry {
    table: ChainedTable<String, ChannelEntry>,
}

impl ChannelRegistry {
    /// Create a registry with the default bucket count
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKET_COUNT)
    }

    /// Create a registry with `bucket_count` hash buckets
    pub fn with_buckets(bucket_count: usize) -> Self {
        Self {
            table: ChainedTable::new(bucket_count, fnv1a, exact_match),
        }
    }

    /// Subscribe a Node to a channel, creating the channel if needed
    ///
    /// A Node already subscribed to the channel has its connection and address
    /// refreshed, which covers Nodes that reconnect without unsubscribing.
    pub fn subscribe(&mut self, channel: &str, subscriber: Subscriber) -> SubscribeOutcome {
        let key = channel.to_owned();

        if let Some(entry) = self.table.search_mut(&key) {
            let outcome = entry.upsert(subscriber);
            tracing::debug!(
                channel = %channel,
                subscribers = entry.len(),
                outcome = ?outcome,
                "Subscriber updated"
            );
            return outcome;
        }

        let node_id = subscriber.node_id;
        // Absent key was just checked, so insert cannot collide
        if let Err(e) = self.table.insert(key, ChannelEntry::new(subscriber)) {
            tracing::error!(channel = %channel, error = %e, "Registry insert failed");
        }

        tracing::info!(channel = %channel, node_id = node_id, "Channel created");
        SubscribeOutcome::Created
    }

    /// Remove a Node from a channel
    ///
    /// Deletes the channel when its last subscriber leaves. Fails with
    /// `NotFound` if the channel does not exist or the Node is not subscribed.
    pub fn unsubscribe(&mut self, channel: &str, node_id: u32) -> Result<RemoveOutcome, RegistryError> {
        let key = channel.to_owned();

        let entry = self.table.search_mut(&key).ok_or(RegistryError::NotFound)?;
        entry.remove(node_id).ok_or(RegistryError::NotFound)?;

        if !entry.is_empty() {
            tracing::debug!(
                channel = %channel,
                node_id = node_id,
                subscribers = entry.len(),
                "Subscriber removed"
            );
            return Ok(RemoveOutcome::Removed);
        }

        self.table.remove(&key)?;
        tracing::info!(channel = %channel, node_id = node_id, "Last subscriber left, channel removed");
        Ok(RemoveOutcome::ChannelRemoved)
    }

    /// Current subscribers of a channel
    pub fn subscribers(&self, channel: &str) -> Option<&[Subscriber]> {
        self.table
            .search(&channel.to_owned())
            .map(ChannelEntry::subscribers)
    }

    /// Look up a channel entry
    pub fn channel(&self, channel: &str) -> Option<&ChannelEntry> {
        self.table.search(&channel.to_owned())
    }

    /// Count a publish relayed on `channel`
    pub fn record_publish(&mut self, channel: &str) {
        if let Some(entry) = self.table.search_mut(&channel.to_owned()) {
            entry.publish_count += 1;
        }
    }

    /// Whether the channel exists
    pub fn contains(&self, channel: &str) -> bool {
        self.table.contains(&channel.to_owned())
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.table.len()
    }

    /// Visit every channel with its entry
    pub fn traverse<F>(&self, visit: F)
    where
        F: FnMut(&String, &ChannelEntry),
    {
        self.table.traverse(visit)
    }

    /// Total number of subscriptions across all channels
    pub fn subscription_count(&self) -> usize {
        let mut total = 0;
        self.traverse(|_, entry| total += entry.len());
        total
    }

    /// Drop every channel
    pub fn clear(&mut self) {
        self.table.clear();
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;

    fn sub(node_id: u32, connection: u64) -> Subscriber {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000 + node_id as u16);
        Subscriber::new(node_id, connection, addr)
    }

    #[test]
    fn test_subscribe_creates_channel() {
        let mut registry = ChannelRegistry::new();

        assert_eq!(registry.subscribe("temp", sub(1, 1)), SubscribeOutcome::Created);
        assert_eq!(registry.subscribe("temp", sub(2, 2)), SubscribeOutcome::Added);
        assert_eq!(registry.subscribe("temp", sub(1, 3)), SubscribeOutcome::Refreshed);

        let subscribers = registry.subscribers("temp").unwrap();
        assert_eq!(subscribers.len(), 2);
        assert_eq!(subscribers[0].connection, 3);
        assert_eq!(registry.channel_count(), 1);
    }

    #[test]
    fn test_last_unsubscribe_removes_channel() {
        let mut registry = ChannelRegistry::new();
        registry.subscribe("temp", sub(1, 1));
        registry.subscribe("temp", sub(2, 2));

        assert_eq!(registry.unsubscribe("temp", 1), Ok(RemoveOutcome::Removed));
        assert!(registry.contains("temp"));

        assert_eq!(registry.unsubscribe("temp", 2), Ok(RemoveOutcome::ChannelRemoved));
        assert!(!registry.contains("temp"));
        assert!(registry.subscribers("temp").is_none());
        assert_eq!(registry.channel_count(), 0);
    }

    #[test]
    fn test_unsubscribe_unknown() {
        let mut registry = ChannelRegistry::new();
        assert_eq!(registry.unsubscribe("temp", 1), Err(RegistryError::NotFound));

        registry.subscribe("temp", sub(1, 1));
        assert_eq!(registry.unsubscribe("temp", 9), Err(RegistryError::NotFound));
        assert!(registry.contains("temp"));
    }

    #[test]
    fn test_channels_are_independent() {
        let mut registry = ChannelRegistry::with_buckets(1);
        registry.subscribe("temp", sub(1, 1));
        registry.subscribe("light", sub(1, 1));
        registry.subscribe("light", sub(2, 2));

        registry.unsubscribe("temp", 1).unwrap();

        assert!(!registry.contains("temp"));
        assert_eq!(registry.subscribers("light").unwrap().len(), 2);
        assert_eq!(registry.subscription_count(), 2);
    }

    #[test]
    fn test_channel_names_are_exact() {
        let mut registry = ChannelRegistry::new();
        registry.subscribe("temp", sub(1, 1));

        assert!(registry.subscribers("Temp").is_none());
        assert!(registry.subscribers("temp ").is_none());
        assert!(registry.subscribers("").is_none());
    }

    #[test]
    fn test_record_publish() {
        let mut registry = ChannelRegistry::new();
        registry.subscribe("temp", sub(1, 1));
        registry.record_publish("temp");
        registry.record_publish("temp");
        registry.record_publish("missing");

        assert_eq!(registry.channel("temp").unwrap().publish_count, 2);
    }
}
