//! Link error types

use std::io;

/// Errors raised by a request-reply link
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// Could not reach the peer
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        /// Endpoint that was dialed
        endpoint: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// I/O failure on an established channel
    #[error("link i/o error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed the channel
    #[error("link closed by peer")]
    Closed,

    /// A frame was not valid JSON
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A frame exceeded the configured bound
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Configured limit
        limit: usize,
    },

    /// Request-reply ordering was violated
    #[error("request-reply discipline violated: {0}")]
    Corrupted(&'static str),

    /// Deadline elapsed before the exchange completed
    #[error("deadline exceeded")]
    Timeout,
}

impl LinkError {
    /// Whether the peer could not be reached at all
    #[inline]
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }

    /// Whether the exchange ran out of time
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
