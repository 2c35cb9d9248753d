//! Serving side of a request-reply link

use crate::error::LinkError;
use crate::frame::{read_frame, write_frame};
use serde_json::Value;
use std::net::SocketAddr;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Reply socket for one client connection
///
/// Every received request, including one that fails to parse, must be
/// answered with exactly one reply before the next request is read.
#[derive(Debug)]
pub struct ReplySocket {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    peer: Option<SocketAddr>,
    pending: bool,
    max_frame_bytes: usize,
}

impl ReplySocket {
    /// Wrap an accepted stream
    #[must_use]
    pub fn new(stream: TcpStream, max_frame_bytes: usize) -> Self {
        let peer = stream.peer_addr().ok();
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            peer,
            pending: false,
            max_frame_bytes,
        }
    }

    /// Address of the connected client
    #[inline]
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether a reply is owed
    #[inline]
    #[must_use]
    pub fn reply_pending(&self) -> bool {
        self.pending
    }

    /// Read the next request
    ///
    /// A malformed or oversize frame still counts as a received request
    /// and must be answered.
    ///
    /// # Errors
    /// - `LinkError::Corrupted` if the previous request was not answered
    /// - `LinkError::Closed`/`LinkError::Io` when the client is gone
    /// - `LinkError::Malformed`/`LinkError::FrameTooLarge` for bad frames
    pub async fn recv_request(&mut self) -> Result<Value, LinkError> {
        if self.pending {
            return Err(LinkError::Corrupted("request read before previous reply was sent"));
        }
        let result = read_frame(&mut self.reader, self.max_frame_bytes).await;
        if !matches!(result, Err(LinkError::Closed | LinkError::Io(_))) {
            self.pending = true;
        }
        result
    }

    /// Answer the outstanding request
    ///
    /// # Errors
    /// - `LinkError::Corrupted` if no request is outstanding
    /// - `LinkError::Io` if the write fails
    pub async fn send_reply(&mut self, reply: &Value) -> Result<(), LinkError> {
        if !self.pending {
            return Err(LinkError::Corrupted("reply sent with no request outstanding"));
        }
        write_frame(&mut self.writer, reply).await?;
        self.pending = false;
        Ok(())
    }
}
