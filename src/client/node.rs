//! Node client
//!
//! A [`NodeClient`] owns one connection to the Core. Publishes and
//! subscription frames are written by the caller's task. Relayed messages are
//! read by a single receive task, spawned by the first [`subscribe`], which
//! looks up the channel's callback and invokes it.
//!
//! [`subscribe`]: NodeClient::subscribe

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use super::config::NodeConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    validate_node_id, validate_payload, CodecConfig, Direction, FrameCodec, FrameReader,
    SharedKey, SourceId,
};

/// Callback invoked with the payload of each message relayed on a channel
pub type Callback = Arc<dyn Fn(&str) + Send + Sync>;

/// State shared between the client and its receive task
struct Session {
    node_id: u32,
    codec: FrameCodec,
    callbacks: Mutex<HashMap<String, Callback>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    closed: AtomicBool,
    peer_closed: AtomicBool,
}

impl Session {
    async fn send(&self, bytes: &[u8]) -> Result<()> {
        if self.peer_closed.load(Ordering::Acquire) {
            return Err(Error::PeerClosed);
        }
        let mut writer = self.writer.lock().await;
        let socket = writer.as_mut().ok_or(Error::NotConnected)?;
        socket.write_all(bytes).await.map_err(Error::from_write)
    }

    async fn send_subscription(&self, channel: &str, direction: Direction) -> Result<()> {
        let source = SourceId::subscription(self.node_id, direction)?;
        let frame = self.codec.encode(source, channel)?;
        self.send(&frame).await
    }
}

/// Connection from a Node to the Core
pub struct NodeClient {
    session: Arc<Session>,
    peer_addr: SocketAddr,
    reader: Mutex<Option<OwnedReadHalf>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl NodeClient {
    /// Connect to the Core
    ///
    /// Fails with `InvalidArgument` for an unusable node id and with
    /// `ConnectionFailed` if the Core cannot be reached.
    pub async fn connect(config: NodeConfig) -> Result<Self> {
        validate_node_id(config.node_id)?;

        let socket = TcpStream::connect(config.core_addr)
            .await
            .map_err(|source| Error::ConnectionFailed {
                addr: config.core_addr.to_string(),
                source,
            })?;
        if config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        let peer_addr = socket.peer_addr()?;
        let (read_half, write_half) = socket.into_split();

        tracing::info!(node_id = config.node_id, core = %peer_addr, "Connected to Core");

        Ok(Self {
            session: Arc::new(Session {
                node_id: config.node_id,
                codec: FrameCodec::new(&config.codec),
                callbacks: Mutex::new(HashMap::new()),
                writer: tokio::sync::Mutex::new(Some(write_half)),
                closed: AtomicBool::new(false),
                peer_closed: AtomicBool::new(false),
            }),
            peer_addr,
            reader: Mutex::new(Some(read_half)),
            receiver: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> u32 {
        self.session.node_id
    }

    /// Address of the Core
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether [`disconnect`](Self::disconnect) has not been called yet
    pub fn is_connected(&self) -> bool {
        !self.session.closed.load(Ordering::Acquire)
    }

    /// Publish `payload` on `channel`
    ///
    /// Both frames are encoded before anything is written, so an oversized
    /// payload never leaves a lone channel frame on the wire.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        validate_payload(channel)?;
        validate_payload(payload)?;

        let codec = &self.session.codec;
        let channel_frame = codec.encode(SourceId::PUBLISH, channel)?;
        let payload_frame = codec.encode(SourceId::PUBLISH, payload)?;

        let mut sequence = BytesMut::with_capacity(2 * codec.wire_len());
        sequence.put_slice(&channel_frame);
        sequence.put_slice(&payload_frame);

        self.session.send(&sequence).await?;
        tracing::debug!(channel = %channel, len = payload.len(), "Published");
        Ok(())
    }

    /// Subscribe to `channel`, invoking `callback` with every relayed payload
    ///
    /// Subscribing again to the same channel replaces its callback. The first
    /// subscription starts the receive task.
    pub async fn subscribe<F>(&self, channel: &str, callback: F) -> Result<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        validate_payload(channel)?;
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let callback: Callback = Arc::new(callback);
        self.session
            .callbacks
            .lock()
            .insert(channel.to_owned(), callback);
        self.ensure_receiver();

        if let Err(e) = self
            .session
            .send_subscription(channel, Direction::Subscribe)
            .await
        {
            self.session.callbacks.lock().remove(channel);
            return Err(e);
        }

        tracing::info!(node_id = self.node_id(), channel = %channel, "Subscribed");
        Ok(())
    }

    /// Drop the callback for `channel` and tell the Core to stop relaying it
    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        validate_payload(channel)?;

        self.session.callbacks.lock().remove(channel);
        self.session
            .send_subscription(channel, Direction::Unsubscribe)
            .await?;

        tracing::info!(node_id = self.node_id(), channel = %channel, "Unsubscribed");
        Ok(())
    }

    /// Channels with a registered callback
    pub fn subscriptions(&self) -> Vec<String> {
        self.session.callbacks.lock().keys().cloned().collect()
    }

    /// Close the connection and stop the receive task
    ///
    /// Safe to call more than once.
    pub async fn disconnect(&self) {
        if self.session.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(receiver) = self.receiver.lock().take() {
            receiver.abort();
        }
        self.reader.lock().take();

        if let Some(mut writer) = self.session.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.session.callbacks.lock().clear();

        tracing::info!(node_id = self.node_id(), core = %self.peer_addr, "Disconnected");
    }

    fn ensure_receiver(&self) {
        let mut receiver = self.receiver.lock();
        if receiver.is_some() {
            return;
        }
        let Some(read_half) = self.reader.lock().take() else {
            return;
        };

        let reader = FrameReader::new(read_half, self.session.codec.wire_len());
        *receiver = Some(tokio::spawn(receive_loop(Arc::clone(&self.session), reader)));
    }
}

impl Drop for NodeClient {
    fn drop(&mut self) {
        if let Some(receiver) = self.receiver.get_mut().take() {
            receiver.abort();
        }
    }
}

impl std::fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeClient")
            .field("node_id", &self.session.node_id)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn receive_loop(session: Arc<Session>, mut reader: FrameReader<OwnedReadHalf>) {
    loop {
        let Some(channel_frame) = next_frame(&session, &mut reader).await else {
            break;
        };
        let Some(payload_frame) = next_frame(&session, &mut reader).await else {
            break;
        };

        let (channel, payload) = match decode_relay(&session.codec, &channel_frame, &payload_frame) {
            Ok(relay) => relay,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable relay dropped");
                continue;
            }
        };

        let delivered = {
            let callbacks = session.callbacks.lock();
            match callbacks.get(&channel) {
                Some(callback) => {
                    callback(&payload);
                    true
                }
                None => false,
            }
        };

        if !delivered {
            tracing::debug!(channel = %channel, "No callback for channel, unsubscribing");
            if let Err(e) = session
                .send_subscription(&channel, Direction::Unsubscribe)
                .await
            {
                tracing::warn!(channel = %channel, error = %e, "Automatic unsubscribe failed");
            }
        }
    }

    tracing::debug!(node_id = session.node_id, "Receive task stopped");
}

async fn next_frame(session: &Session, reader: &mut FrameReader<OwnedReadHalf>) -> Option<Bytes> {
    match reader.next_frame().await {
        Ok(Some(frame)) => Some(frame),
        Ok(None) => {
            tracing::info!(node_id = session.node_id, "Core closed the connection");
            session.peer_closed.store(true, Ordering::Release);
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Read from Core failed");
            None
        }
    }
}

fn decode_relay(codec: &FrameCodec, channel_frame: &[u8], payload_frame: &[u8]) -> Result<(String, String)> {
    let channel = codec.decode(channel_frame)?.into_payload();
    let payload = codec.decode(payload_frame)?.into_payload();
    Ok((channel, payload))
}

/// Connect a Node to the Core at `ip:port` with the baseline codec
pub async fn connect_node(node_id: u32, ip: &str, port: u16, shared_key: SharedKey) -> Result<NodeClient> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| Error::InvalidArgument(format!("invalid Core address: {}", ip)))?;
    let config = NodeConfig::new(node_id, SocketAddr::new(ip, port), CodecConfig::new(shared_key));

    NodeClient::connect(config).await
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::protocol::constants::{FRAME_LEN, IV_LEN, KEY_LEN, UNSUBSCRIBE_FLAG};

    fn key() -> SharedKey {
        SharedKey::new([3; KEY_LEN], [4; IV_LEN])
    }

    fn codec() -> FrameCodec {
        FrameCodec::new(&CodecConfig::new(key()))
    }

    /// A fake Core: accepts one Node and hands back the raw socket
    async fn fake_core(node_id: u32) -> (NodeClient, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) = tokio::join!(
            NodeClient::connect(NodeConfig::new(node_id, addr, CodecConfig::new(key()))),
            listener.accept()
        );
        (client.unwrap(), accepted.unwrap().0)
    }

    async fn read_frame(core: &mut TcpStream) -> crate::protocol::Message {
        let mut buf = [0u8; FRAME_LEN];
        tokio::time::timeout(Duration::from_secs(2), core.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        codec().decode(&buf).unwrap()
    }

    #[tokio::test]
    async fn test_connect_rejects_reserved_node_id() {
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        for node_id in [0, UNSUBSCRIBE_FLAG | 1] {
            let result = NodeClient::connect(NodeConfig::new(node_id, addr, CodecConfig::new(key()))).await;
            assert!(matches!(result, Err(Error::InvalidArgument(_))));
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = NodeClient::connect(NodeConfig::new(1, addr, CodecConfig::new(key()))).await;
        assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_connect_node_bad_ip() {
        let result = connect_node(1, "not-an-ip", 10112, key()).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_publish_writes_two_frames() {
        let (client, mut core) = fake_core(9).await;
        client.publish("temp", "72").await.unwrap();

        let channel = read_frame(&mut core).await;
        let payload = read_frame(&mut core).await;
        assert!(channel.source_id().is_publish());
        assert_eq!(channel.payload(), "temp");
        assert!(payload.source_id().is_publish());
        assert_eq!(payload.payload(), "72");
    }

    #[tokio::test]
    async fn test_publish_validates_before_writing() {
        let (client, _core) = fake_core(9).await;

        let result = client.publish("temp", &"x".repeat(300)).await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));

        let result = client.publish(&"c".repeat(250), "72").await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe_frames() {
        let (client, mut core) = fake_core(0x741).await;

        client.subscribe("chat1", |_| {}).await.unwrap();
        let frame = read_frame(&mut core).await;
        assert_eq!(frame.source_id().raw(), 0x741);
        assert_eq!(frame.payload(), "chat1");

        client.unsubscribe("chat1").await.unwrap();
        let frame = read_frame(&mut core).await;
        assert_eq!(frame.source_id().raw(), 0x741 | UNSUBSCRIBE_FLAG);
        assert_eq!(frame.payload(), "chat1");
        assert!(client.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_relay_invokes_callback() {
        let (client, mut core) = fake_core(5).await;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        client
            .subscribe("temp", move |payload| {
                let _ = tx.send(payload.to_owned());
            })
            .await
            .unwrap();
        read_frame(&mut core).await;

        let codec = codec();
        core.write_all(&codec.encode(SourceId::PUBLISH, "temp").unwrap())
            .await
            .unwrap();
        core.write_all(&codec.encode(SourceId::PUBLISH, "72").unwrap())
            .await
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, "72");
    }

    #[tokio::test]
    async fn test_relay_without_callback_unsubscribes() {
        let (client, mut core) = fake_core(5).await;
        client.subscribe("temp", |_| {}).await.unwrap();
        read_frame(&mut core).await;

        let codec = codec();
        core.write_all(&codec.encode(SourceId::PUBLISH, "stale").unwrap())
            .await
            .unwrap();
        core.write_all(&codec.encode(SourceId::PUBLISH, "1").unwrap())
            .await
            .unwrap();

        let frame = read_frame(&mut core).await;
        assert_eq!(frame.source_id().direction(), Direction::Unsubscribe);
        assert_eq!(frame.source_id().node_id(), 5);
        assert_eq!(frame.payload(), "stale");
    }

    #[tokio::test]
    async fn test_publish_after_core_closes() {
        let (client, mut core) = fake_core(5).await;
        client.subscribe("temp", |_| {}).await.unwrap();
        read_frame(&mut core).await;
        drop(core);

        let mut result = client.publish("temp", "1").await;
        for _ in 0..100 {
            if matches!(result, Err(Error::PeerClosed)) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            result = client.publish("temp", "1").await;
        }
        assert!(matches!(result, Err(Error::PeerClosed)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (client, mut core) = fake_core(5).await;
        client.subscribe("temp", |_| {}).await.unwrap();
        read_frame(&mut core).await;

        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());

        assert!(matches!(client.publish("temp", "1").await, Err(Error::NotConnected)));
        assert!(matches!(
            client.subscribe("temp", |_| {}).await,
            Err(Error::NotConnected)
        ));

        // Core sees end of stream
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(2), core.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
