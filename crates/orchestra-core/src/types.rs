//! Core types for Orchestra
//!
//! Defines the data model:
//! - Investigations and their lifecycle state
//! - Backend results, one per configured adapter
//! - The correlated report returned to callers

use crate::error::OrchestraError;
use crate::hasher::TargetHandle;
use crate::state_machine::validate_transition;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Maximum length of a caller-supplied operation id
pub const MAX_OPERATION_ID_LEN: usize = 128;

/// Unique identifier of one investigation request
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// Generate `op_<unix seconds>_<6 lowercase letters>`
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let suffix: String = (0..6)
            .map(|_| char::from(rng.random_range(b'a'..=b'z')))
            .collect();
        Self(format!("op_{}_{}", Utc::now().timestamp(), suffix))
    }

    /// Accept a caller-supplied id
    ///
    /// # Errors
    /// Returns a validation error unless the id is 1..=128 characters of
    /// `[A-Za-z0-9_.-]`
    pub fn parse(id: &str) -> Result<Self, OrchestraError> {
        if id.is_empty() || id.len() > MAX_OPERATION_ID_LEN {
            return Err(OrchestraError::validation(format!(
                "field 'operation_id' must be 1 to {MAX_OPERATION_ID_LEN} characters"
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        {
            return Err(OrchestraError::validation(
                "field 'operation_id' may only contain letters, digits, '_', '.' and '-'",
            ));
        }
        Ok(Self(id.to_string()))
    }

    /// String form
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Analysis backend kinds
///
/// Ordering is the order sources appear in a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Pattern/threat classification
    Pattern,
    /// Web crawling
    Crawl,
    /// External intelligence scanning
    ExternalScan,
}

impl BackendKind {
    /// All kinds in report order
    pub const ALL: [Self; 3] = [Self::Pattern, Self::Crawl, Self::ExternalScan];

    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pattern => "pattern",
            Self::Crawl => "crawl",
            Self::ExternalScan => "external_scan",
        }
    }

    /// Default backend address
    #[must_use]
    pub const fn default_address(&self) -> &'static str {
        match self {
            Self::Pattern => "127.0.0.1:5555",
            Self::Crawl => "127.0.0.1:5557",
            Self::ExternalScan => "127.0.0.1:5556",
        }
    }

    /// Default deadline; external scanning is inherently slower
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        match self {
            Self::Pattern => Duration::from_secs(10),
            Self::Crawl => Duration::from_secs(15),
            Self::ExternalScan => Duration::from_secs(30),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one adapter call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Backend answered with a well-formed reply
    Completed,
    /// Synthetic data from the fallback producer
    Fallback,
    /// No result could be produced
    Failed,
    /// Deadline elapsed
    TimedOut,
}

impl ResultStatus {
    /// Whether the backend completed normally
    #[inline]
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Fallback => "fallback",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Result of one adapter call
///
/// Created once per adapter per investigation and never mutated after it
/// leaves the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResult {
    source: BackendKind,
    status: ResultStatus,
    findings: Vec<Value>,
    findings_count: u64,
    raw: BTreeMap<String, Value>,
    elapsed_ms: u64,
    completed_at: DateTime<Utc>,
}

impl BackendResult {
    fn new(
        source: BackendKind,
        status: ResultStatus,
        findings: Vec<Value>,
        findings_count: u64,
        raw: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            source,
            status,
            findings,
            findings_count,
            raw,
            elapsed_ms: 0,
            completed_at: Utc::now(),
        }
    }

    /// Normal completion
    #[must_use]
    pub fn completed(
        source: BackendKind,
        findings: Vec<Value>,
        findings_count: u64,
        raw: BTreeMap<String, Value>,
    ) -> Self {
        Self::new(source, ResultStatus::Completed, findings, findings_count, raw)
    }

    /// Synthetic result from a fallback producer
    #[must_use]
    pub fn fallback(
        source: BackendKind,
        findings: Vec<Value>,
        mut raw: BTreeMap<String, Value>,
    ) -> Self {
        raw.entry("note".to_string())
            .or_insert_with(|| json!("backend unavailable"));
        let count = findings.len() as u64;
        Self::new(source, ResultStatus::Fallback, findings, count, raw)
    }

    /// No result could be produced
    #[must_use]
    pub fn failed(source: BackendKind, reason: &str) -> Self {
        let raw = BTreeMap::from([
            ("note".to_string(), json!("no result produced")),
            ("reason".to_string(), json!(reason)),
        ]);
        Self::new(source, ResultStatus::Failed, Vec::new(), 0, raw)
    }

    /// Deadline elapsed
    #[must_use]
    pub fn timed_out(source: BackendKind, timeout: Duration) -> Self {
        let raw = BTreeMap::from([
            ("note".to_string(), json!("deadline exceeded")),
            (
                "timeout_ms".to_string(),
                json!(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
            ),
        ]);
        Self::new(source, ResultStatus::TimedOut, Vec::new(), 0, raw)
    }

    /// Record how long the call took
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the completion time
    #[must_use]
    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = at;
        self
    }

    /// Backend that produced this result
    #[inline]
    #[must_use]
    pub fn source(&self) -> BackendKind {
        self.source
    }

    /// Outcome
    #[inline]
    #[must_use]
    pub fn status(&self) -> ResultStatus {
        self.status
    }

    /// Findings in backend order
    #[inline]
    #[must_use]
    pub fn findings(&self) -> &[Value] {
        &self.findings
    }

    /// Number of findings the backend reported
    #[inline]
    #[must_use]
    pub fn findings_count(&self) -> u64 {
        self.findings_count
    }

    /// Backend-specific metadata
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &BTreeMap<String, Value> {
        &self.raw
    }

    /// Call duration in milliseconds
    #[inline]
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// When the result was produced
    #[inline]
    #[must_use]
    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }
}

/// Investigation priority, echoed in the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low
    Low,
    /// Medium
    #[default]
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl FromStr for Priority {
    type Err = OrchestraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(OrchestraError::validation(
                "field 'priority' must be one of low, medium, high, critical",
            )),
        }
    }
}

/// Investigation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationState {
    /// Request accepted and validated
    Received,
    /// Adapters running
    Dispatching,
    /// Results being merged
    Correlating,
    /// Report returned
    Responded,
    /// Terminated with an error
    Errored,
}

impl InvestigationState {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Responded | Self::Errored)
    }
}

/// One investigation, owned by the Gateway for the lifetime of a request
///
/// `Debug` prints the handle, never the target.
#[derive(Clone)]
pub struct Investigation {
    operation_id: OperationId,
    target: String,
    target_handle: TargetHandle,
    priority: Priority,
    started_at: DateTime<Utc>,
    state: InvestigationState,
}

impl Investigation {
    /// Start a new investigation in `Received`
    #[must_use]
    pub fn new(
        operation_id: OperationId,
        target: impl Into<String>,
        target_handle: TargetHandle,
        priority: Priority,
    ) -> Self {
        Self {
            operation_id,
            target: target.into(),
            target_handle,
            priority,
            started_at: Utc::now(),
            state: InvestigationState::Received,
        }
    }

    /// Override the start time
    #[must_use]
    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = at;
        self
    }

    /// Move to the next lifecycle state
    ///
    /// # Errors
    /// Returns `OrchestraError::IllegalTransition` for transitions the
    /// lifecycle does not allow
    pub fn transition(&mut self, to: InvestigationState) -> Result<(), OrchestraError> {
        validate_transition(self.state, to)?;
        tracing::debug!(
            operation_id = %self.operation_id,
            handle = %self.target_handle,
            from = ?self.state,
            to = ?to,
            "investigation state change"
        );
        self.state = to;
        Ok(())
    }

    /// Move to `Errored` unless already terminal
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = InvestigationState::Errored;
        }
    }

    /// Operation id
    #[inline]
    #[must_use]
    pub fn operation_id(&self) -> &OperationId {
        &self.operation_id
    }

    /// Raw target; keep inside the trust boundary
    #[inline]
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Hashed target
    #[inline]
    #[must_use]
    pub fn target_handle(&self) -> &TargetHandle {
        &self.target_handle
    }

    /// Priority
    #[inline]
    #[must_use]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Start time
    #[inline]
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> InvestigationState {
        self.state
    }
}

impl fmt::Debug for Investigation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Investigation")
            .field("operation_id", &self.operation_id)
            .field("target_handle", &self.target_handle)
            .field("priority", &self.priority)
            .field("started_at", &self.started_at)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Coarse risk band
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// score < 0.25
    Low,
    /// score < 0.5
    Medium,
    /// score < 0.75
    High,
    /// everything above
    Critical,
}

impl RiskLevel {
    /// Band for a score in [0, 1]
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score < 0.25 {
            Self::Low
        } else if score < 0.5 {
            Self::Medium
        } else if score < 0.75 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

/// Per-source view of a [`BackendResult`] inside a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    /// Outcome
    pub status: ResultStatus,
    /// Reported finding count
    pub findings_count: u64,
    /// Findings, verbatim
    pub findings: Vec<Value>,
    /// Backend metadata
    pub raw: BTreeMap<String, Value>,
    /// Call duration
    pub elapsed_ms: u64,
}

impl From<BackendResult> for SourceSummary {
    fn from(result: BackendResult) -> Self {
        Self {
            status: result.status,
            findings_count: result.findings_count,
            findings: result.findings,
            raw: result.raw,
            elapsed_ms: result.elapsed_ms,
        }
    }
}

/// The single correlated output of an investigation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedReport {
    /// Operation id
    pub operation_id: OperationId,
    /// Target as supplied by the caller
    pub target: String,
    /// Hashed target
    pub target_handle: TargetHandle,
    /// Requested priority
    pub priority: Priority,
    /// One entry per configured adapter
    pub per_source: BTreeMap<BackendKind, SourceSummary>,
    /// Unified risk in [0, 1]
    pub risk_score: f64,
    /// Band of `risk_score`
    pub risk_level: RiskLevel,
    /// Confidence in [0, 1], penalized by degradation
    pub confidence: f64,
    /// Whether any source did not complete
    pub degraded: bool,
    /// Sum of per-source finding counts
    pub total_findings: u64,
    /// Contributing factors
    pub factors: Vec<String>,
    /// When the investigation started
    pub started_at: DateTime<Utc>,
    /// When the last source settled
    pub timestamp: DateTime<Utc>,
    /// `timestamp - started_at`
    pub duration_ms: u64,
}

impl CorrelatedReport {
    /// Status of one source, if configured
    #[must_use]
    pub fn status_of(&self, source: BackendKind) -> Option<ResultStatus> {
        self.per_source.get(&source).map(|s| s.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash;

    #[test]
    fn generated_operation_ids_have_expected_shape() {
        let id = OperationId::generate();
        let parts: Vec<_> = id.as_str().split('_').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "op");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 6);
        assert!(parts[2].chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn operation_id_validation() {
        assert!(OperationId::parse("op_123_abc").is_ok());
        assert!(OperationId::parse("").is_err());
        assert!(OperationId::parse("has space").is_err());
        assert!(OperationId::parse(&"x".repeat(129)).is_err());
    }

    #[test]
    fn backend_kind_wire_names() {
        assert_eq!(serde_json::to_value(BackendKind::ExternalScan).unwrap(), "external_scan");
        assert_eq!(BackendKind::ALL.len(), 3);
        assert!(BackendKind::ExternalScan.default_timeout() > BackendKind::Pattern.default_timeout());
    }

    #[test]
    fn fallback_result_counts_its_findings() {
        let result = BackendResult::fallback(BackendKind::Crawl, vec![], BTreeMap::new());

        assert_eq!(result.status(), ResultStatus::Fallback);
        assert_eq!(result.findings_count(), 0);
        assert_eq!(result.raw()["note"], "backend unavailable");
    }

    #[test]
    fn investigation_debug_hides_target() {
        let inv = Investigation::new(
            OperationId::generate(),
            "alice@example.com",
            hash("alice@example.com"),
            Priority::High,
        );
        let debug = format!("{inv:?}");

        assert!(!debug.contains("alice"));
        assert!(debug.contains(hash("alice@example.com").as_str()));
    }

    #[test]
    fn investigation_lifecycle() {
        let mut inv = Investigation::new(OperationId::generate(), "t", hash("t"), Priority::Low);

        assert!(inv.transition(InvestigationState::Correlating).is_err());
        inv.transition(InvestigationState::Dispatching).unwrap();
        inv.transition(InvestigationState::Correlating).unwrap();
        inv.transition(InvestigationState::Responded).unwrap();

        inv.fail();
        assert_eq!(inv.state(), InvestigationState::Responded);
    }

    #[test]
    fn risk_bands() {
        assert_eq!(RiskLevel::from_score(0.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(0.3), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(0.6), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(1.0), RiskLevel::Critical);
    }

    #[test]
    fn priority_parsing() {
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert!("urgent".parse::<Priority>().is_err());
        assert_eq!(Priority::default(), Priority::Medium);
    }
}
