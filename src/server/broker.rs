//! Broker state machine
//!
//! [`Broker`] owns the channel registry and the connection table and reacts to
//! one event at a time. It is driven by the loop in
//! [`CoreServer`](super::CoreServer) and never awaits, so no event can observe
//! the registry half updated.
//!
//! ```text
//!   AwaitingFrame --src=0--> AwaitingPayload --any frame--> relay --> AwaitingFrame
//!   AwaitingFrame --src=id--> subscribe / unsubscribe --> AwaitingFrame
//! ```

use std::collections::HashMap;
use std::time::Instant;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::task::JoinSet;

use super::connection::ConnectionHandle;
use super::handle::Control;
use crate::protocol::{Direction, FrameCodec, Message};
use crate::queue::QueueError;
use crate::registry::{ChannelRegistry, RemoveOutcome, Subscriber};
use crate::session::ConnectionId;
use crate::stats::BrokerStats;

/// Lifecycle of the broker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerPhase {
    /// Accepting connections and dispatching frames
    Listening,
    /// Stop requested; the loop exits after closing every connection
    ShuttingDown,
}

/// What a decoded frame asks the broker to do
enum Dispatch {
    /// Channel frame of a publish, remembered on the connection
    Pending,
    /// Payload frame completing a publish
    Relay {
        channel: String,
        channel_frame: Bytes,
        payload_frame: Bytes,
    },
    /// Subscribe or unsubscribe frame
    Subscription(Message),
}

pub(crate) struct Broker {
    codec: FrameCodec,
    registry: ChannelRegistry,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    stats: BrokerStats,
    phase: BrokerPhase,
    started_at: Instant,
}

impl Broker {
    pub fn new(codec: FrameCodec, bucket_count: usize) -> Self {
        Self {
            codec,
            registry: ChannelRegistry::with_buckets(bucket_count),
            connections: HashMap::new(),
            stats: BrokerStats::new(),
            phase: BrokerPhase::Listening,
            started_at: Instant::now(),
        }
    }

    pub fn phase(&self) -> BrokerPhase {
        self.phase
    }

    /// Add a freshly accepted connection to the table
    pub fn on_accept(&mut self, connection: ConnectionHandle) {
        self.stats.total_connections += 1;
        tracing::info!(
            connection = connection.state.id,
            peer = %connection.state.peer_addr,
            active = self.connections.len() + 1,
            "Node connected"
        );
        self.connections.insert(connection.state.id, connection);
    }

    /// Count a connection refused by the connection limit
    pub fn on_reject(&mut self) {
        self.stats.rejected_connections += 1;
    }

    /// Handle one complete wire frame from a connection
    pub fn on_frame(&mut self, id: ConnectionId, frame: Bytes) {
        self.stats.frames_received += 1;

        let Some(connection) = self.connections.get_mut(&id) else {
            tracing::trace!(connection = id, "Frame from closed connection ignored");
            return;
        };
        connection.state.frames_received += 1;

        let message = match self.codec.decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                self.stats.rejected_frames += 1;
                if connection.state.take_pending().is_some() {
                    tracing::warn!(connection = id, error = %e, "Bad payload frame, publish dropped");
                } else {
                    tracing::warn!(connection = id, error = %e, "Bad frame dropped");
                }
                return;
            }
        };

        let dispatch = match connection.state.take_pending() {
            Some((channel, channel_frame)) => Dispatch::Relay {
                channel,
                channel_frame,
                payload_frame: frame,
            },
            None if message.source_id().is_publish() => {
                connection.state.await_payload(message.into_payload(), frame);
                Dispatch::Pending
            }
            None => {
                connection.state.node_id = Some(message.source_id().node_id());
                Dispatch::Subscription(message)
            }
        };

        match dispatch {
            Dispatch::Pending => {}
            Dispatch::Relay {
                channel,
                channel_frame,
                payload_frame,
            } => self.relay(&channel, channel_frame, payload_frame),
            Dispatch::Subscription(message) => self.dispatch_subscription(id, message),
        }
    }

    fn dispatch_subscription(&mut self, id: ConnectionId, message: Message) {
        let source = message.source_id();
        let node_id = source.node_id();
        let channel = message.payload();

        if node_id == 0 {
            tracing::warn!(connection = id, raw = source.raw(), "Subscription frame without node id");
            return;
        }

        match source.direction() {
            Direction::Subscribe => {
                let Some(connection) = self.connections.get(&id) else {
                    return;
                };
                let subscriber = Subscriber::new(node_id, id, connection.state.peer_addr);
                let outcome = self.registry.subscribe(channel, subscriber);
                tracing::info!(
                    connection = id,
                    node_id = node_id,
                    channel = %channel,
                    outcome = ?outcome,
                    "Subscribe"
                );
            }
            Direction::Unsubscribe => match self.registry.unsubscribe(channel, node_id) {
                Ok(outcome) => {
                    tracing::info!(
                        connection = id,
                        node_id = node_id,
                        channel = %channel,
                        channel_removed = outcome == RemoveOutcome::ChannelRemoved,
                        "Unsubscribe"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        connection = id,
                        node_id = node_id,
                        channel = %channel,
                        error = %e,
                        "Unsubscribe ignored"
                    );
                }
            },
        }
    }

    /// Forward a publish sequence verbatim to every subscriber of `channel`
    ///
    /// Subscribers whose connection is gone are evicted; the rest still get
    /// the sequence. Both frames go into one outbox item so relays from
    /// different publishers never interleave on a subscriber's socket.
    fn relay(&mut self, channel: &str, channel_frame: Bytes, payload_frame: Bytes) {
        self.stats.publishes += 1;

        let Some(subscribers) = self.registry.subscribers(channel) else {
            self.stats.unrouted_publishes += 1;
            tracing::debug!(channel = %channel, "No subscribers, publish dropped");
            return;
        };

        let mut sequence = BytesMut::with_capacity(channel_frame.len() + payload_frame.len());
        sequence.put_slice(&channel_frame);
        sequence.put_slice(&payload_frame);
        let sequence = sequence.freeze();

        let mut dead = Vec::new();
        for subscriber in subscribers {
            let delivered = match self.connections.get(&subscriber.connection) {
                Some(connection) => connection.outbox.enqueue(sequence.clone()),
                None => Err(QueueError::Closed),
            };

            match delivered {
                Ok(()) => self.stats.relays += 1,
                Err(QueueError::Full) => {
                    self.stats.relay_drops += 1;
                    tracing::warn!(
                        channel = %channel,
                        node_id = subscriber.node_id,
                        "Subscriber outbox full, relay dropped"
                    );
                }
                Err(_) => dead.push(subscriber.node_id),
            }
        }

        tracing::debug!(
            channel = %channel,
            subscribers = subscribers.len(),
            unreachable = dead.len(),
            "Publish relayed"
        );
        self.registry.record_publish(channel);

        for node_id in dead {
            self.evict(channel, node_id);
        }
    }

    fn evict(&mut self, channel: &str, node_id: u32) {
        self.stats.evictions += 1;
        match self.registry.unsubscribe(channel, node_id) {
            Ok(outcome) => {
                tracing::warn!(
                    channel = %channel,
                    node_id = node_id,
                    channel_removed = outcome == RemoveOutcome::ChannelRemoved,
                    "Unreachable subscriber evicted"
                );
            }
            Err(e) => {
                tracing::error!(channel = %channel, node_id = node_id, error = %e, "Eviction failed");
            }
        }
    }

    /// Drop a connection whose reader or writer has stopped
    ///
    /// Its subscriptions stay in the registry until a relay to them fails.
    pub fn on_closed(&mut self, id: ConnectionId) {
        let Some(connection) = self.connections.remove(&id) else {
            return;
        };

        if connection.state.is_awaiting_payload() {
            tracing::warn!(connection = id, "Connection closed mid-publish, channel frame dropped");
        }
        tracing::info!(
            connection = id,
            peer = %connection.state.peer_addr,
            node_id = ?connection.state.node_id,
            frames = connection.state.frames_received,
            duration_ms = connection.state.duration().as_millis() as u64,
            "Node disconnected"
        );

        tokio::spawn(connection.finish());
    }

    /// Apply a control command from a [`CoreHandle`](super::CoreHandle)
    pub fn on_control(&mut self, command: Control) {
        match command {
            Control::Shutdown => {
                tracing::info!("Shutdown requested");
                self.phase = BrokerPhase::ShuttingDown;
            }
            Control::Subscribers { channel, reply } => {
                let _ = reply.send(self.subscribers(&channel));
            }
            Control::ChannelCount { reply } => {
                let _ = reply.send(self.registry.channel_count());
            }
            Control::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Node ids subscribed to `channel`, in relay order
    pub fn subscribers(&self, channel: &str) -> Option<Vec<u32>> {
        self.registry
            .subscribers(channel)
            .map(|subscribers| subscribers.iter().map(|s| s.node_id).collect())
    }

    /// Snapshot of the broker counters
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            active_connections: self.connections.len() as u64,
            channels: self.registry.channel_count() as u64,
            uptime: self.started_at.elapsed(),
            ..self.stats.clone()
        }
    }

    /// Close every connection and forget every channel
    pub async fn shutdown(&mut self) {
        self.phase = BrokerPhase::ShuttingDown;

        let connections: Vec<_> = self.connections.drain().map(|(_, c)| c).collect();
        tracing::info!(
            connections = connections.len(),
            channels = self.registry.channel_count(),
            "Closing all connections"
        );
        let mut closing = JoinSet::new();
        for connection in connections {
            closing.spawn(connection.finish());
        }
        while closing.join_next().await.is_some() {}
        self.registry.clear();
    }
}
