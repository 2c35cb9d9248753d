//! Request Gateway
//!
//! Accepts inbound requests, drives each investigation through its
//! lifecycle and always produces exactly one reply:
//! - a `CorrelatedReport` (plus `status: "success"`)
//! - a batch summary
//! - a health report
//! - an `ErrorPayload` for validation failures and internal errors
//!
//! Panics inside dispatch or correlation are caught here and reported as
//! `internal_error`; they never leave a caller without a reply.

pub mod request;
pub mod server;

pub use request::{BatchItem, InvestigateRequest, Request};
pub use server::GatewayServer;

use crate::adapter::build_adapters;
use crate::config::OrchestraConfig;
use crate::correlation::CorrelationEngine;
use crate::dispatch::DispatchCoordinator;
use crate::error::{ErrorPayload, OrchestraError};
use crate::hasher::IdentityHasher;
use crate::types::{BackendKind, CorrelatedReport, Investigation, InvestigationState, OperationId};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use orchestra_link::LinkStats;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Overall link health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No link failed its most recent exchange
    Healthy,
    /// At least one link failed its most recent exchange
    Degraded,
}

/// Reply to the `health` action
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Crate version
    pub version: &'static str,
    /// Seconds since the gateway was created
    pub uptime_secs: u64,
    /// Per-backend link statistics
    pub backends: BTreeMap<BackendKind, LinkStats>,
    /// When the report was taken
    pub timestamp: DateTime<Utc>,
}

/// Investigation front door
pub struct Gateway {
    hasher: Arc<IdentityHasher>,
    coordinator: DispatchCoordinator,
    engine: CorrelationEngine,
    max_batch: usize,
    started: Instant,
}

impl Gateway {
    /// Assemble a gateway from its parts
    #[must_use]
    pub fn new(
        hasher: Arc<IdentityHasher>,
        coordinator: DispatchCoordinator,
        engine: CorrelationEngine,
    ) -> Self {
        Self {
            hasher,
            coordinator,
            engine,
            max_batch: 100,
            started: Instant::now(),
        }
    }

    /// Build a gateway with one TCP-backed adapter per enabled backend
    ///
    /// # Errors
    /// Returns a configuration error if no adapter can be built
    pub fn from_config(config: &OrchestraConfig) -> Result<Self, OrchestraError> {
        let hasher = Arc::new(IdentityHasher::with_salt(&config.opsec.salt));
        let coordinator = DispatchCoordinator::new(build_adapters(config, Arc::clone(&hasher)))?;
        let engine = CorrelationEngine::new(config.scoring.clone());
        Ok(Self::new(hasher, coordinator, engine).with_max_batch(config.gateway.max_batch))
    }

    /// Set the largest accepted batch
    #[must_use]
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Largest accepted batch
    #[inline]
    #[must_use]
    pub fn max_batch(&self) -> usize {
        self.max_batch
    }

    /// Answer one request
    ///
    /// Never fails: every outcome, including a panic below, is a reply.
    pub async fn handle(&self, message: Value) -> Value {
        let parsed = match request::parse(&message, self.max_batch) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::info!(error = %err, "request rejected");
                return error_reply(&err, operation_id_hint(&message));
            }
        };

        match parsed {
            Request::Investigate(request) => {
                let hint = request.operation_id.as_ref().map(ToString::to_string);
                match self.investigate(request).await {
                    Ok(report) => report_reply(&report),
                    Err((err, operation_id)) => {
                        error_reply(&err, operation_id.map(|id| id.to_string()).or(hint))
                    }
                }
            }
            Request::InvestigateBatch(items) => self.investigate_batch(items).await,
            Request::Health => to_reply(&self.health()),
        }
    }

    /// Run one investigation end to end
    ///
    /// # Errors
    /// Returns the internal error that stopped the investigation, together
    /// with its operation id
    pub async fn investigate(
        &self,
        request: InvestigateRequest,
    ) -> Result<CorrelatedReport, (OrchestraError, Option<OperationId>)> {
        let operation_id = request.operation_id.unwrap_or_else(OperationId::generate);
        let handle = self.hasher.hash(&request.target);
        let mut investigation =
            Investigation::new(operation_id, request.target, handle, request.priority);

        tracing::info!(
            operation_id = %investigation.operation_id(),
            handle = %investigation.target_handle(),
            priority = ?investigation.priority(),
            "investigation received"
        );

        match self.run(&mut investigation).await {
            Ok(report) => {
                tracing::info!(
                    operation_id = %report.operation_id,
                    handle = %report.target_handle,
                    risk_score = report.risk_score,
                    confidence = report.confidence,
                    degraded = report.degraded,
                    "investigation responded"
                );
                Ok(report)
            }
            Err(err) => {
                investigation.fail();
                tracing::error!(
                    operation_id = %investigation.operation_id(),
                    handle = %investigation.target_handle(),
                    error = %err,
                    "investigation errored"
                );
                Err((err, Some(investigation.operation_id().clone())))
            }
        }
    }

    async fn run(&self, investigation: &mut Investigation) -> Result<CorrelatedReport, OrchestraError> {
        investigation.transition(InvestigationState::Dispatching)?;
        let results = AssertUnwindSafe(self.coordinator.dispatch(investigation))
            .catch_unwind()
            .await
            .map_err(|_| OrchestraError::Internal("dispatch panicked".into()))?;

        investigation.transition(InvestigationState::Correlating)?;
        let report = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.engine.correlate(investigation, results)
        }))
        .map_err(|_| OrchestraError::Internal("correlation panicked".into()))??;

        investigation.transition(InvestigationState::Responded)?;
        Ok(report)
    }

    async fn investigate_batch(&self, items: Vec<BatchItem>) -> Value {
        let batch_id = format!(
            "batch_{}",
            OperationId::generate().as_str().trim_start_matches("op_")
        );
        let total = items.len();
        let mut successful = 0usize;
        let mut operations = Vec::with_capacity(total);

        tracing::info!(batch_id = %batch_id, total, "batch received");
        for item in items {
            let reply = match item {
                Ok(request) => {
                    let hint = request.operation_id.as_ref().map(ToString::to_string);
                    match self.investigate(request).await {
                        Ok(report) => {
                            successful += 1;
                            report_reply(&report)
                        }
                        Err((err, operation_id)) => {
                            error_reply(&err, operation_id.map(|id| id.to_string()).or(hint))
                        }
                    }
                }
                Err(message) => error_reply(&OrchestraError::validation(message), None),
            };
            operations.push(reply);
        }

        json!({
            "batch_id": batch_id,
            "total": total,
            "successful": successful,
            "failed": total - successful,
            "operations": operations,
            "timestamp": Utc::now(),
        })
    }

    /// Link health of every configured backend
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let backends: BTreeMap<BackendKind, LinkStats> = self
            .coordinator
            .adapters()
            .iter()
            .filter_map(|adapter| adapter.link_stats().map(|stats| (adapter.kind(), stats)))
            .collect();
        let status = if backends.values().any(|stats| stats.last_ok == Some(false)) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthReport {
            status,
            version: crate::VERSION,
            uptime_secs: self.started.elapsed().as_secs(),
            backends,
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("coordinator", &self.coordinator)
            .field("max_batch", &self.max_batch)
            .finish_non_exhaustive()
    }
}

fn operation_id_hint(request: &Value) -> Option<String> {
    request
        .get("operation_id")
        .and_then(Value::as_str)
        .and_then(|id| OperationId::parse(id).ok())
        .map(|id| id.to_string())
}

fn report_reply(report: &CorrelatedReport) -> Value {
    let mut reply = to_reply(report);
    if let Value::Object(map) = &mut reply {
        map.insert("status".to_string(), json!("success"));
    }
    reply
}

/// Reply carrying an error; non-validation errors get a generic message
#[must_use]
pub fn error_reply(error: &OrchestraError, operation_id: Option<String>) -> Value {
    let payload = ErrorPayload::from_error(error, operation_id);
    serde_json::to_value(&payload).unwrap_or_else(|_| {
        json!({"status": "error", "kind": "internal_error", "error": "internal error"})
    })
}

fn to_reply<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|err| {
        error_reply(&OrchestraError::Internal(err.to_string()), None)
    })
}
