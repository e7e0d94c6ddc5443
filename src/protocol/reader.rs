//! Frame reassembly
//!
//! TCP may split a frame across several reads. [`FrameReader`] accumulates bytes
//! in a per-connection buffer and only yields complete frames.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;

/// Reads fixed-width frames from an async byte stream
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    buffer: BytesMut,
    frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader yielding frames of `frame_len` bytes
    pub fn new(inner: R, frame_len: usize) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(frame_len * 2),
            frame_len,
        }
    }

    /// Read the next complete frame
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. A partial frame
    /// left in the buffer at that point is discarded.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if self.buffer.len() >= self.frame_len {
                return Ok(Some(self.buffer.split_to(self.frame_len).freeze()));
            }

            if self.buffer.capacity() - self.buffer.len() < self.frame_len {
                self.buffer.reserve(self.frame_len);
            }

            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::warn!(
                        buffered = self.buffer.len(),
                        expected = self.frame_len,
                        "Peer closed mid-frame, discarding partial frame"
                    );
                    self.buffer.clear();
                }
                return Ok(None);
            }
        }
    }

    /// Bytes of an incomplete frame currently buffered
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
