//! Request-reply link with a checked-out channel
//!
//! The link owns at most one channel. Each exchange checks it out (lazily
//! connecting), performs one round trip and returns it. A lease that is
//! dropped without being released, because the exchange failed, timed out
//! or was cancelled, tears the channel down so that a late reply can never
//! be read by the next exchange.

use crate::error::LinkError;
use crate::transport::{Channel, ChannelState, Connector};
use parking_lot::Mutex as StatsMutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{timeout_at, Instant};

/// Link statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Endpoint of the backend
    pub endpoint: String,
    /// Exchanges attempted
    pub exchanges: u64,
    /// Exchanges that did not complete
    pub failures: u64,
    /// Channels torn down after an incomplete exchange
    pub resets: u64,
    /// Whether a channel is currently held open
    pub connected: bool,
    /// Outcome of the most recent exchange
    pub last_ok: Option<bool>,
}

type Slot = Option<Box<dyn Channel>>;

/// Single-channel request-reply link
///
/// Concurrent callers are serialized by the slot mutex; only one request is
/// ever outstanding on the channel.
#[derive(Debug)]
pub struct RequestReplyLink {
    connector: Arc<dyn Connector>,
    slot: Arc<Mutex<Slot>>,
    stats: Arc<StatsMutex<LinkStats>>,
}

impl RequestReplyLink {
    /// Create a link; no connection is made until the first exchange
    #[must_use]
    pub fn new<C: Connector + 'static>(connector: C) -> Self {
        Self::from_arc(Arc::new(connector))
    }

    /// Create a link from a shared connector
    #[must_use]
    pub fn from_arc(connector: Arc<dyn Connector>) -> Self {
        let stats = LinkStats {
            endpoint: connector.endpoint().to_string(),
            ..LinkStats::default()
        };
        Self {
            connector,
            slot: Arc::new(Mutex::new(None)),
            stats: Arc::new(StatsMutex::new(stats)),
        }
    }

    /// Endpoint of the backend
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    /// Send one request and wait for its reply, bounded by `deadline`
    ///
    /// Waiting for the channel (another exchange in progress) and connecting
    /// both count against the deadline.
    ///
    /// # Errors
    /// - `LinkError::Timeout` if the deadline elapses
    /// - `LinkError::Connect` if the backend cannot be reached
    /// - any channel error from the round trip
    pub async fn exchange(&self, request: &Value, deadline: Instant) -> Result<Value, LinkError> {
        let outcome = self.exchange_inner(request, deadline).await;

        let mut stats = self.stats.lock();
        stats.exchanges += 1;
        stats.last_ok = Some(outcome.is_ok());
        if outcome.is_err() {
            stats.failures += 1;
        }

        outcome
    }

    async fn exchange_inner(&self, request: &Value, deadline: Instant) -> Result<Value, LinkError> {
        let mut lease = timeout_at(deadline, self.checkout())
            .await
            .map_err(|_| LinkError::Timeout)??;

        let reply = timeout_at(deadline, lease.round_trip(request))
            .await
            .map_err(|_| LinkError::Timeout)??;

        lease.release();
        Ok(reply)
    }

    /// Tear down the current channel, if any
    pub async fn reset(&self) {
        let mut slot = self.slot.lock().await;
        if slot.take().is_some() {
            let mut stats = self.stats.lock();
            stats.resets += 1;
            stats.connected = false;
        }
    }

    /// Snapshot of link statistics
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.stats.lock().clone()
    }

    async fn checkout(&self) -> Result<Lease, LinkError> {
        let mut guard = Arc::clone(&self.slot).lock_owned().await;

        if guard.as_deref().is_some_and(|c| c.state() != ChannelState::Idle) {
            tracing::warn!(endpoint = %self.endpoint(), "discarding channel left mid-exchange");
            guard.take();
            self.stats.lock().resets += 1;
        }

        if guard.is_none() {
            let channel = self.connector.connect().await?;
            *guard = Some(channel);
            self.stats.lock().connected = true;
        }

        Ok(Lease {
            guard,
            stats: Arc::clone(&self.stats),
            released: false,
        })
    }
}

/// Exclusive use of the link's channel for one exchange
struct Lease {
    guard: OwnedMutexGuard<Slot>,
    stats: Arc<StatsMutex<LinkStats>>,
    released: bool,
}

impl Lease {
    async fn round_trip(&mut self, request: &Value) -> Result<Value, LinkError> {
        let channel = self.guard.as_deref_mut().ok_or(LinkError::Closed)?;
        channel.round_trip(request).await
    }

    /// Return the channel for reuse
    fn release(mut self) {
        self.released = true;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released && self.guard.take().is_some() {
            let mut stats = self.stats.lock();
            stats.resets += 1;
            stats.connected = false;
            tracing::debug!(endpoint = %stats.endpoint, "channel torn down after incomplete exchange");
        }
    }
}
