//! Connectors and channels
//!
//! A [`Connector`] dials a backend; the [`Channel`] it returns carries one
//! request at a time and refuses out-of-order use instead of silently
//! pairing a reply with the wrong request.

use crate::error::LinkError;
use crate::frame::{read_frame, write_frame, DEFAULT_MAX_FRAME_BYTES};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Position of a channel in the request-reply cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Ready to send a request
    Idle,
    /// A request is outstanding
    AwaitingReply,
}

/// One established request-reply channel
#[async_trait]
pub trait Channel: Send + fmt::Debug {
    /// Send a request
    async fn send(&mut self, request: &Value) -> Result<(), LinkError>;

    /// Receive the reply to the outstanding request
    async fn recv(&mut self) -> Result<Value, LinkError>;

    /// Current position in the cycle
    fn state(&self) -> ChannelState;

    /// Send, then wait for exactly one reply
    async fn round_trip(&mut self, request: &Value) -> Result<Value, LinkError> {
        self.send(request).await?;
        self.recv().await
    }
}

/// Opens channels to one endpoint
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Establish a fresh channel
    async fn connect(&self) -> Result<Box<dyn Channel>, LinkError>;

    /// Endpoint this connector dials
    fn endpoint(&self) -> &str;
}

/// TCP connector
///
/// Accepts `host:port` or the `tcp://host:port` form.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: String,
    max_frame_bytes: usize,
}

impl TcpConnector {
    /// Create a connector for `endpoint`
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let endpoint = endpoint
            .strip_prefix("tcp://")
            .map(str::to_string)
            .unwrap_or(endpoint);
        Self {
            endpoint,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// With a custom frame bound
    #[inline]
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Channel>, LinkError> {
        let stream = TcpStream::connect(&self.endpoint)
            .await
            .map_err(|source| LinkError::Connect {
                endpoint: self.endpoint.clone(),
                source,
            })?;
        stream.set_nodelay(true)?;
        tracing::debug!(endpoint = %self.endpoint, "channel established");
        Ok(Box::new(TcpChannel::new(stream, self.max_frame_bytes)))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Channel over a TCP stream
#[derive(Debug)]
pub struct TcpChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    state: ChannelState,
    max_frame_bytes: usize,
}

impl TcpChannel {
    /// Wrap an established stream
    #[must_use]
    pub fn new(stream: TcpStream, max_frame_bytes: usize) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            state: ChannelState::Idle,
            max_frame_bytes,
        }
    }
}

#[async_trait]
impl Channel for TcpChannel {
    async fn send(&mut self, request: &Value) -> Result<(), LinkError> {
        if self.state == ChannelState::AwaitingReply {
            return Err(LinkError::Corrupted("request sent while a reply is outstanding"));
        }
        write_frame(&mut self.writer, request).await?;
        self.state = ChannelState::AwaitingReply;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Value, LinkError> {
        if self.state == ChannelState::Idle {
            return Err(LinkError::Corrupted("reply read with no request outstanding"));
        }
        let reply = read_frame(&mut self.reader, self.max_frame_bytes).await?;
        self.state = ChannelState::Idle;
        Ok(reply)
    }

    fn state(&self) -> ChannelState {
        self.state
    }
}
