//! Core listener and broker loop
//!
//! A single task accepts connections and drives the [`Broker`]. Its only
//! suspension point is the `select!` over accept, inbound frames and control
//! commands; socket reads and writes happen in per-connection tasks.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, Semaphore};

use crate::error::{Error, Result};
use crate::protocol::constants::LISTEN_BACKLOG;
use crate::protocol::{CodecConfig, FrameCodec, SharedKey};
use crate::server::broker::{Broker, BrokerPhase};
use crate::server::config::CoreConfig;
use crate::server::connection::{ConnectionHandle, ConnectionSettings, InboundEvent};
use crate::server::handle::{Control, CoreHandle};
use crate::session::ConnectionId;

const EVENT_QUEUE_CAPACITY: usize = 1024;
const CONTROL_QUEUE_CAPACITY: usize = 32;

/// The Core: accepts Nodes and relays their publishes
pub struct CoreServer {
    config: CoreConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    broker: Broker,
    events_tx: mpsc::Sender<InboundEvent>,
    events_rx: mpsc::Receiver<InboundEvent>,
    // Held so the control channel stays open while no handle exists
    control_tx: mpsc::Sender<Control>,
    control_rx: mpsc::Receiver<Control>,
    connection_semaphore: Option<Arc<Semaphore>>,
    settings: ConnectionSettings,
    next_connection_id: ConnectionId,
}

impl CoreServer {
    /// Bind and listen on the configured address
    ///
    /// Fails with `ConnectionFailed` if the address cannot be bound.
    pub async fn bind(config: CoreConfig) -> Result<Self> {
        let addr = config.bind_addr;
        let listener = listen(addr).map_err(|source| {
            tracing::error!(addr = %addr, error = %source, "Failed to bind Core listener");
            Error::ConnectionFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        let local_addr = listener.local_addr()?;

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        let codec = FrameCodec::new(&config.codec);
        let settings = ConnectionSettings {
            wire_len: codec.wire_len(),
            outbox_capacity: config.outbox_capacity,
            read_timeout: config.read_timeout,
        };

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);

        Ok(Self {
            broker: Broker::new(codec, config.bucket_count),
            config,
            listener,
            local_addr,
            events_tx,
            events_rx,
            control_tx,
            control_rx,
            connection_semaphore,
            settings,
            next_connection_id: 1,
        })
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for querying or stopping the Core once it runs
    pub fn handle(&self) -> CoreHandle {
        CoreHandle::new(self.control_tx.clone())
    }

    /// Run until a [`CoreHandle::shutdown`] request
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until `shutdown` completes or a shutdown request arrives
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            addr = %self.local_addr,
            integrity = self.config.codec.integrity,
            max_connections = self.config.max_connections,
            "Core listening"
        );

        tokio::pin!(shutdown);

        while self.broker.phase() == BrokerPhase::Listening {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => self.handle_connection(socket, peer_addr),
                    Err(e) => tracing::error!(error = %e, "Failed to accept connection"),
                },
                Some(event) = self.events_rx.recv() => match event {
                    InboundEvent::Frame { id, frame } => self.broker.on_frame(id, frame),
                    InboundEvent::Closed { id } => self.broker.on_closed(id),
                },
                Some(command) = self.control_rx.recv() => self.broker.on_control(command),
            }
        }

        self.broker.shutdown().await;
        tracing::info!(addr = %self.local_addr, "Core stopped");
        Ok(())
    }

    fn handle_connection(&mut self, socket: TcpStream, peer_addr: SocketAddr) {
        let permit = match &self.connection_semaphore {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    self.broker.on_reject();
                    return;
                }
            },
            None => None,
        };

        let id = self.next_connection_id;
        self.next_connection_id += 1;

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(connection = id, error = %e, "Failed to configure socket");
            return;
        }

        let connection = ConnectionHandle::spawn(
            id,
            socket,
            peer_addr,
            self.settings,
            self.events_tx.clone(),
            permit,
        );
        self.broker.on_accept(connection);
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

fn listen(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Start a Core on every interface at `port` and run it until it fails
///
/// Only returns on a bind failure, or if the loop is stopped through a handle.
pub async fn start_core_server(port: u16, shared_key: SharedKey) -> Result<()> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    let config = CoreConfig::new(CodecConfig::new(shared_key)).bind(addr);

    CoreServer::bind(config).await?.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::{IV_LEN, KEY_LEN};

    fn config() -> CoreConfig {
        CoreConfig::new(CodecConfig::new(SharedKey::new([1; KEY_LEN], [2; IV_LEN])))
            .bind("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = CoreServer::bind(config()).await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_connection_failed() {
        let first = CoreServer::bind(config()).await.unwrap();
        let taken = first.local_addr();

        // SO_REUSEADDR does not let two sockets listen on one port
        let result = CoreServer::bind(config().bind(taken)).await;
        assert!(matches!(result, Err(Error::ConnectionFailed { .. })));
    }

    #[tokio::test]
    async fn test_handle_shutdown_stops_loop() {
        let server = CoreServer::bind(config()).await.unwrap();
        let handle = server.handle();
        let task = tokio::spawn(server.run());

        assert_eq!(handle.channel_count().await.unwrap(), 0);
        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        assert!(handle.is_closed());
        assert!(matches!(handle.stats().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_run_until_future() {
        let server = CoreServer::bind(config()).await.unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let server = CoreServer::bind(config().max_connections(1)).await.unwrap();
        let addr = server.local_addr();
        let handle = server.handle();
        let task = tokio::spawn(server.run());

        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();

        let mut stats = handle.stats().await.unwrap();
        for _ in 0..50 {
            if stats.total_connections + stats.rejected_connections == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            stats = handle.stats().await.unwrap();
        }
        assert_eq!(stats.total_connections, 1);
        assert_eq!(stats.rejected_connections, 1);
        assert_eq!(stats.active_connections, 1);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }
}
