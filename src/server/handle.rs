//! Remote control of a running Core

use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};
use crate::stats::BrokerStats;

/// Commands accepted by the broker loop
#[derive(Debug)]
pub(crate) enum Control {
    Shutdown,
    Subscribers {
        channel: String,
        reply: oneshot::Sender<Option<Vec<u32>>>,
    },
    ChannelCount {
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<BrokerStats>,
    },
}

/// Cloneable handle to a running [`CoreServer`](super::CoreServer)
///
/// Queries are answered by the broker loop between events, so they always see
/// a consistent registry. Every method fails with `NotConnected` once the
/// loop has exited.
#[derive(Debug, Clone)]
pub struct CoreHandle {
    control: mpsc::Sender<Control>,
}

impl CoreHandle {
    pub(crate) fn new(control: mpsc::Sender<Control>) -> Self {
        Self { control }
    }

    /// Ask the broker loop to close every connection and exit
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Control::Shutdown).await
    }

    /// Node ids subscribed to `channel`, or `None` if the channel does not exist
    pub async fn subscribers(&self, channel: &str) -> Result<Option<Vec<u32>>> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Subscribers {
            channel: channel.to_owned(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::NotConnected)
    }

    /// Number of channels with at least one subscriber
    pub async fn channel_count(&self) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::ChannelCount { reply }).await?;
        rx.await.map_err(|_| Error::NotConnected)
    }

    /// Snapshot of the broker counters
    pub async fn stats(&self) -> Result<BrokerStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Control::Stats { reply }).await?;
        rx.await.map_err(|_| Error::NotConnected)
    }

    /// Whether the broker loop has exited
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    async fn send(&self, command: Control) -> Result<()> {
        self.control
            .send(command)
            .await
            .map_err(|_| Error::NotConnected)
    }
}
