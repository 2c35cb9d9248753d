//! Backend Adapters
//!
//! One adapter per backend kind. Each owns exactly one request-reply link
//! and turns every call into a `BackendResult`:
//! - well-formed reply: `Completed` (or whatever the backend reports)
//! - deadline expiry: `TimedOut`, link torn down by the link itself
//! - link error, malformed reply, backend error: the kind's fallback producer
//! - target rejected before any network call: `Failed`
//!
//! The wire shape of each backend lives in [`pattern`], [`crawl`] and
//! [`scan`]; [`Adapter`] drives the shared call sequence.

pub mod crawl;
pub mod pattern;
pub mod scan;

use crate::config::OrchestraConfig;
use crate::error::BackendFailure;
use crate::hasher::{IdentityHasher, TargetHandle};
use crate::types::{BackendKind, BackendResult, OperationId};
use orchestra_link::{LinkStats, RequestReplyLink, TcpConnector};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub use crawl::{CrawlPage, CrawlProtocol, CrawlReply};
pub use pattern::{PatternProtocol, PatternReply};
pub use scan::{ScanProtocol, ScanReply, TargetType};

/// Longest target accepted by any adapter, in bytes
pub const MAX_TARGET_BYTES: usize = 256;

/// Capability surface of one backend adapter
///
/// `submit` never fails in the hard sense: every outcome is a `BackendResult`.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Backend this adapter talks to
    fn kind(&self) -> BackendKind;

    /// Per-call deadline budget
    fn timeout(&self) -> Duration;

    /// Run one call against the backend
    async fn submit(
        &self,
        target: &str,
        operation_id: &OperationId,
        deadline: Instant,
    ) -> BackendResult;

    /// Link health, if this adapter has a link
    fn link_stats(&self) -> Option<LinkStats>;
}

/// Wire contract of one backend kind
pub trait BackendProtocol: Send + Sync + 'static {
    /// Backend kind
    const KIND: BackendKind;

    /// Kind-specific target check, run before any network call
    ///
    /// # Errors
    /// Returns a short reason when the target cannot be submitted
    fn check_target(&self, _target: &str) -> Result<(), &'static str> {
        Ok(())
    }

    /// Request payload for one call
    fn build_request(&self, target: &str, handle: &TargetHandle, operation_id: &OperationId)
        -> Value;

    /// Parse a reply that is not a backend error
    ///
    /// # Errors
    /// Returns `BackendFailure::Protocol` when the reply has the wrong shape
    fn parse_reply(&self, reply: Value) -> Result<BackendReply, BackendFailure>;

    /// Synthetic result used when the backend cannot be reached or understood
    fn fallback(&self, failure: &BackendFailure) -> BackendResult;
}

/// Backend reply, one variant per backend kind
#[derive(Debug, Clone, PartialEq)]
pub enum BackendReply {
    /// Pattern/threat classification
    Pattern(PatternReply),
    /// Crawled pages
    Crawl(CrawlReply),
    /// External scan summary
    ExternalScan(ScanReply),
}

impl BackendReply {
    /// Normalize into the uniform result shape
    #[must_use]
    pub fn into_result(self) -> BackendResult {
        match self {
            Self::Pattern(reply) => reply.into_result(),
            Self::Crawl(reply) => reply.into_result(),
            Self::ExternalScan(reply) => reply.into_result(),
        }
    }
}

/// Adapter driving one `BackendProtocol` over one link
pub struct Adapter<P> {
    protocol: P,
    link: RequestReplyLink,
    timeout: Duration,
    fallback: bool,
    hasher: Arc<IdentityHasher>,
}

impl<P: BackendProtocol> Adapter<P> {
    /// Create an adapter
    pub fn new(protocol: P, link: RequestReplyLink, hasher: Arc<IdentityHasher>) -> Self {
        Self {
            protocol,
            link,
            timeout: P::KIND.default_timeout(),
            fallback: true,
            hasher,
        }
    }

    /// Set the per-call deadline budget
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enable or disable the fallback producer
    #[must_use]
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback = enabled;
        self
    }

    async fn call(
        &self,
        target: &str,
        handle: &TargetHandle,
        operation_id: &OperationId,
        deadline: Instant,
    ) -> Result<BackendResult, BackendFailure> {
        let request = self.protocol.build_request(target, handle, operation_id);
        let reply = self.link.exchange(&request, deadline).await?;
        if let Some(error) = reply.get("error").filter(|error| !error.is_null()) {
            return Err(BackendFailure::Rejected(error_message(error)));
        }
        Ok(self.protocol.parse_reply(reply)?.into_result())
    }

    fn recover(&self, failure: &BackendFailure) -> BackendResult {
        match failure {
            BackendFailure::Timeout => BackendResult::timed_out(P::KIND, self.timeout),
            _ if self.fallback => self.protocol.fallback(failure),
            _ => BackendResult::failed(P::KIND, failure.reason()),
        }
    }
}

#[async_trait::async_trait]
impl<P: BackendProtocol> BackendAdapter for Adapter<P> {
    fn kind(&self) -> BackendKind {
        P::KIND
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn submit(
        &self,
        target: &str,
        operation_id: &OperationId,
        deadline: Instant,
    ) -> BackendResult {
        let started = Instant::now();
        let handle = self.hasher.hash(target);

        if let Err(reason) = check_target(target).and_then(|()| self.protocol.check_target(target)) {
            tracing::warn!(
                backend = %P::KIND,
                handle = %handle,
                operation_id = %operation_id,
                reason,
                "target rejected before dispatch"
            );
            return BackendResult::failed(P::KIND, reason).with_elapsed(started.elapsed());
        }

        let result = match self.call(target, &handle, operation_id, deadline).await {
            Ok(result) => {
                tracing::debug!(
                    backend = %P::KIND,
                    handle = %handle,
                    operation_id = %operation_id,
                    status = result.status().as_str(),
                    findings = result.findings_count(),
                    "backend replied"
                );
                result
            }
            Err(failure) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(
                    handle = %handle,
                    operation_id = %operation_id,
                    error = %failure.clone().into_error(P::KIND, timeout_ms),
                    reason = failure.reason(),
                    fallback = self.fallback,
                    "backend call failed"
                );
                self.recover(&failure)
            }
        };
        result.with_elapsed(started.elapsed())
    }

    fn link_stats(&self) -> Option<LinkStats> {
        Some(self.link.stats())
    }
}

impl<P> std::fmt::Debug for Adapter<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("endpoint", &self.link.endpoint())
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

/// Checks shared by every adapter
fn check_target(target: &str) -> Result<(), &'static str> {
    if target.trim().is_empty() {
        return Err("empty target");
    }
    if target.len() > MAX_TARGET_BYTES {
        return Err("target too long");
    }
    if target.chars().any(char::is_control) {
        return Err("target contains control characters");
    }
    Ok(())
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Backend fields kept as raw metadata
///
/// Echoed identifiers are dropped so a raw target never rides along into a
/// report built from derived data.
pub(crate) fn raw_fields(extra: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    extra
        .into_iter()
        .filter(|(key, _)| !matches!(key.as_str(), "target" | "operation_id" | "error"))
        .collect()
}

pub(crate) fn fallback_raw(failure: &BackendFailure) -> BTreeMap<String, Value> {
    BTreeMap::from([
        ("note".to_string(), Value::from("backend unavailable")),
        ("reason".to_string(), Value::from(failure.reason())),
    ])
}

pub(crate) fn protocol_error(message: impl std::fmt::Display) -> BackendFailure {
    BackendFailure::Protocol(message.to_string())
}

pub(crate) fn expect_object(reply: Value) -> Result<Map<String, Value>, BackendFailure> {
    match reply {
        Value::Object(map) => Ok(map),
        _ => Err(protocol_error("reply is not an object")),
    }
}

/// Build every enabled adapter from configuration
#[must_use]
pub fn build_adapters(
    config: &OrchestraConfig,
    hasher: Arc<IdentityHasher>,
) -> Vec<Arc<dyn BackendAdapter>> {
    let max_frame = config.gateway.max_frame_bytes;
    let mut adapters: Vec<Arc<dyn BackendAdapter>> = Vec::new();

    for kind in BackendKind::ALL {
        let backend = config.backends.get(kind);
        if !backend.enabled {
            tracing::info!(backend = %kind, "backend disabled");
            continue;
        }
        let connector = TcpConnector::new(backend.address_for(kind)).with_max_frame_bytes(max_frame);
        let link = RequestReplyLink::new(connector);
        let timeout = backend.timeout_for(kind);

        let adapter: Arc<dyn BackendAdapter> = match kind {
            BackendKind::Pattern => Arc::new(
                Adapter::new(
                    PatternProtocol::new(backend.action.unwrap_or_default()),
                    link,
                    Arc::clone(&hasher),
                )
                .with_timeout(timeout)
                .with_fallback(backend.fallback),
            ),
            BackendKind::Crawl => Arc::new(
                Adapter::new(CrawlProtocol, link, Arc::clone(&hasher))
                    .with_timeout(timeout)
                    .with_fallback(backend.fallback),
            ),
            BackendKind::ExternalScan => Arc::new(
                Adapter::new(ScanProtocol::new(), link, Arc::clone(&hasher))
                    .with_timeout(timeout)
                    .with_fallback(backend.fallback),
            ),
        };
        adapters.push(adapter);
    }
    adapters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_target_checks() {
        assert!(check_target("alice").is_ok());
        assert_eq!(check_target("  "), Err("empty target"));
        assert_eq!(check_target(&"a".repeat(MAX_TARGET_BYTES + 1)), Err("target too long"));
        assert_eq!(check_target("ali\nce"), Err("target contains control characters"));
    }

    #[test]
    fn raw_fields_drop_echoed_identifiers() {
        let extra = BTreeMap::from([
            ("target".to_string(), Value::from("alice")),
            ("operation_id".to_string(), Value::from("op_1")),
            ("model".to_string(), Value::from("v2")),
        ]);
        let raw = raw_fields(extra);
        assert_eq!(raw.len(), 1);
        assert!(raw.contains_key("model"));
    }

    #[test]
    fn build_adapters_skips_disabled() {
        let mut config = OrchestraConfig::default();
        config.backends.crawl.enabled = false;

        let adapters = build_adapters(&config, Arc::new(IdentityHasher::new()));
        let kinds: Vec<_> = adapters.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec![BackendKind::Pattern, BackendKind::ExternalScan]);
        assert_eq!(adapters[1].timeout(), Duration::from_secs(30));
    }
}
