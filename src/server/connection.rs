//! Accepted Node connections
//!
//! Each connection gets two tasks. The reader reassembles frames and forwards
//! them to the broker loop; the writer drains the connection's outbox onto the
//! socket. The broker loop itself never touches a socket.
//!
//! ```text
//!   socket --> reader task --InboundEvent--> broker loop
//!   broker loop --enqueue--> outbox --> writer task --> socket
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::protocol::FrameReader;
use crate::queue::BoundedQueue;
use crate::session::{ConnectionId, ConnectionState};

/// Events sent from connection readers to the broker loop
#[derive(Debug)]
pub(crate) enum InboundEvent {
    /// One complete wire frame
    Frame { id: ConnectionId, frame: Bytes },
    /// The connection is unusable: clean close, read or write error, timeout
    Closed { id: ConnectionId },
}

/// Broker-side handle to a connection and its tasks
pub(crate) struct ConnectionHandle {
    pub state: ConnectionState,
    pub outbox: Arc<BoundedQueue<Bytes>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    _permit: Option<OwnedSemaphorePermit>,
}

/// Per-connection settings taken from the Core config
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionSettings {
    pub wire_len: usize,
    pub outbox_capacity: usize,
    pub read_timeout: Option<Duration>,
}

/// How long a closing connection may spend flushing its outbox
pub(crate) const FLUSH_GRACE: Duration = Duration::from_millis(500);

impl ConnectionHandle {
    /// Split the socket and spawn its reader and writer tasks
    pub fn spawn(
        id: ConnectionId,
        socket: TcpStream,
        peer_addr: SocketAddr,
        settings: ConnectionSettings,
        events: mpsc::Sender<InboundEvent>,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Self {
        let (read_half, write_half) = socket.into_split();
        let outbox = Arc::new(BoundedQueue::new(settings.outbox_capacity));

        let reader = tokio::spawn(read_loop(
            id,
            FrameReader::new(read_half, settings.wire_len),
            settings.read_timeout,
            events.clone(),
        ));
        let writer = tokio::spawn(write_loop(id, write_half, Arc::clone(&outbox), events));

        Self {
            state: ConnectionState::new(id, peer_addr),
            outbox,
            reader,
            writer,
            _permit: permit,
        }
    }

    /// Stop both tasks
    ///
    /// The writer exits once it observes the closed outbox, which drops its
    /// half of the socket; aborting the reader drops the other half.
    pub fn close(&self) {
        self.outbox.close();
        self.reader.abort();
    }

    /// Close and wait until the writer has shut its half of the socket
    ///
    /// A writer blocked on a peer that stopped reading is aborted after
    /// [`FLUSH_GRACE`].
    pub async fn finish(self) {
        self.close();

        let mut writer = self.writer;
        if tokio::time::timeout(FLUSH_GRACE, &mut writer).await.is_err() {
            tracing::warn!(
                connection = self.state.id,
                unsent = self.outbox.len(),
                "Writer stalled, aborting"
            );
            writer.abort();
        }
    }
}

async fn read_loop(
    id: ConnectionId,
    mut reader: FrameReader<OwnedReadHalf>,
    read_timeout: Option<Duration>,
    events: mpsc::Sender<InboundEvent>,
) {
    loop {
        let next = match read_timeout {
            Some(limit) => match tokio::time::timeout(limit, reader.next_frame()).await {
                Ok(next) => next,
                Err(_) => {
                    tracing::warn!(
                        connection = id,
                        buffered = reader.pending(),
                        timeout_ms = limit.as_millis() as u64,
                        "Read timed out, closing connection"
                    );
                    break;
                }
            },
            None => reader.next_frame().await,
        };

        match next {
            Ok(Some(frame)) => {
                if events.send(InboundEvent::Frame { id, frame }).await.is_err() {
                    // Broker loop is gone
                    return;
                }
            }
            Ok(None) => {
                tracing::debug!(connection = id, "Peer closed connection");
                break;
            }
            Err(e) => {
                tracing::debug!(connection = id, error = %e, "Read failed");
                break;
            }
        }
    }

    let _ = events.send(InboundEvent::Closed { id }).await;
}

async fn write_loop(
    id: ConnectionId,
    mut socket: OwnedWriteHalf,
    outbox: Arc<BoundedQueue<Bytes>>,
    events: mpsc::Sender<InboundEvent>,
) {
    while let Ok(sequence) = outbox.dequeue_blocking().await {
        if let Err(e) = socket.write_all(&sequence).await {
            let e = Error::from_write(e);
            tracing::warn!(connection = id, error = %e, "Relay write failed, closing connection");
            outbox.close();
            let _ = events.send(InboundEvent::Closed { id }).await;
            return;
        }
    }

    let _ = socket.shutdown().await;
}
