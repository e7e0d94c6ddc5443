//! Error types
//!
//! Every fallible operation in the crate returns [`Result`]. Registry and queue
//! operations have their own narrower error enums which convert into [`Error`].

use std::io;

use thiserror::Error;

use crate::queue::QueueError;
use crate::registry::RegistryError;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Bad parameters: oversized channel/payload, reserved node id bits, ...
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Bind, listen or connect failure
    #[error("connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The peer closed the connection cleanly (zero-byte read)
    #[error("peer closed the connection")]
    PeerClosed,

    /// A write to the peer failed (broken pipe, reset, ...)
    #[error("peer unreachable: {0}")]
    PeerUnreachable(#[source] io::Error),

    /// Operation on a Node connection that has been disconnected
    #[error("not connected")]
    NotConnected,

    /// Integrity tag did not match the frame contents
    #[error("frame integrity tag mismatch")]
    Unauthenticated,

    /// Block cipher failure (buffer not block aligned)
    #[error("cipher error: {0}")]
    Cipher(&'static str),

    /// Registry lookup/insert failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Non-blocking queue saturation or closed queue
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Any other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Classify a socket write error.
    ///
    /// Broken pipes and resets mean the peer is gone; everything else stays an
    /// ordinary I/O error.
    pub fn from_write(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => Error::PeerUnreachable(err),
            _ => Error::Io(err),
        }
    }
}
