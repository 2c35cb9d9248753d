//! Correlation Engine
//!
//! Merges the per-adapter results of one investigation into a single
//! scored report. `correlate` is a pure function of the investigation and
//! its results: no clock reads, no randomness.
//!
//! Scoring:
//! - per-source signal in [0, 1]: pattern risk, crawl and scan volume
//!   (`n / (n + k)`, saturating)
//! - `risk_score`: weighted mean of the signals of completed sources
//! - `confidence`: baseline times one penalty factor per degraded source,
//!   capped at the floor when nothing completed

use crate::adapter::pattern::risk_signal;
use crate::config::ScoringPolicy;
use crate::error::OrchestraError;
use crate::types::{
    BackendKind, BackendResult, CorrelatedReport, Investigation, ResultStatus, RiskLevel,
    SourceSummary,
};
use std::collections::BTreeMap;

/// Report scoring and assembly
#[derive(Debug, Clone, Default)]
pub struct CorrelationEngine {
    policy: ScoringPolicy,
}

impl CorrelationEngine {
    /// Engine using `policy`
    #[must_use]
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    /// Scoring policy in use
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Build the report for one investigation
    ///
    /// # Errors
    /// Returns `OrchestraError::Internal` if two results share a source
    pub fn correlate(
        &self,
        investigation: &Investigation,
        results: Vec<BackendResult>,
    ) -> Result<CorrelatedReport, OrchestraError> {
        let started_at = investigation.started_at();
        let timestamp = results
            .iter()
            .map(BackendResult::completed_at)
            .max()
            .map_or(started_at, |latest| latest.max(started_at));

        let mut factors = Vec::new();
        let mut weighted = 0.0;
        let mut weight_sum = 0.0;
        let mut confidence = self.policy.baseline_confidence;
        let mut completed = 0usize;
        let mut total_findings = 0u64;
        let mut per_source = BTreeMap::new();

        for result in results {
            let kind = result.source();
            if per_source.contains_key(&kind) {
                return Err(OrchestraError::Internal(format!(
                    "duplicate result for backend {kind}"
                )));
            }

            let status = result.status();
            total_findings = total_findings.saturating_add(result.findings_count());
            confidence *= self.policy.penalty(status);

            if status.is_completed() {
                completed += 1;
                if let Some(signal) = self.signal(&result) {
                    let weight = self.policy.weight(kind);
                    weighted += weight * signal;
                    weight_sum += weight;
                    factors.push(describe(&result, signal));
                }
            } else {
                factors.push(format!("{kind}: {} ({})", status.as_str(), reason(&result)));
            }
            per_source.insert(kind, SourceSummary::from(result));
        }

        let risk_score = if weight_sum > 0.0 {
            round4((weighted / weight_sum).clamp(0.0, 1.0))
        } else {
            factors.push("no risk signal available".to_string());
            0.0
        };

        if completed == 0 {
            confidence = confidence.min(self.policy.confidence_floor);
        }
        let confidence = round4(confidence.clamp(0.0, 1.0));

        let degraded = per_source
            .values()
            .any(|summary: &SourceSummary| !summary.status.is_completed());
        let duration_ms = u64::try_from((timestamp - started_at).num_milliseconds()).unwrap_or(0);

        Ok(CorrelatedReport {
            operation_id: investigation.operation_id().clone(),
            target: investigation.target().to_string(),
            target_handle: investigation.target_handle().clone(),
            priority: investigation.priority(),
            per_source,
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            confidence,
            degraded,
            total_findings,
            factors,
            started_at,
            timestamp,
            duration_ms,
        })
    }

    /// Signal of one completed source, if it carries one
    #[must_use]
    pub fn signal(&self, result: &BackendResult) -> Option<f64> {
        let n = result.findings_count() as f64;
        let signal = match result.source() {
            BackendKind::Pattern => risk_signal(result.raw())?,
            BackendKind::Crawl => saturate(n, self.policy.crawl_saturation),
            BackendKind::ExternalScan => saturate(n, self.policy.scan_saturation),
        };
        Some(signal.clamp(0.0, 1.0))
    }
}

fn saturate(n: f64, k: f64) -> f64 {
    n / (n + k)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn describe(result: &BackendResult, signal: f64) -> String {
    let kind = result.source();
    match kind {
        BackendKind::Pattern => {
            let label = result
                .raw()
                .get("threat_level")
                .or_else(|| result.raw().get("pattern_type"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("scored");
            format!("{kind}: {label} (signal {signal:.4})")
        }
        BackendKind::Crawl => {
            format!("{kind}: {} pages (signal {signal:.4})", result.findings_count())
        }
        BackendKind::ExternalScan => {
            format!("{kind}: {} findings (signal {signal:.4})", result.findings_count())
        }
    }
}

fn reason(result: &BackendResult) -> &str {
    result
        .raw()
        .get("reason")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(match result.status() {
            ResultStatus::TimedOut => "deadline exceeded",
            _ => "degraded",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash;
    use crate::types::{OperationId, Priority};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn investigation() -> Investigation {
        Investigation::new(
            OperationId::parse("op_1_abcdef").unwrap(),
            "alice",
            hash("alice"),
            Priority::High,
        )
        .with_started_at(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
    }

    fn at(secs: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn completed(kind: BackendKind, n: usize) -> BackendResult {
        let mut raw = BTreeMap::new();
        if kind == BackendKind::Pattern {
            raw.insert("threat_level".to_string(), json!("medium"));
        }
        BackendResult::completed(kind, vec![json!({}); n], n as u64, raw).with_completed_at(at(2))
    }

    fn all_completed() -> Vec<BackendResult> {
        vec![
            completed(BackendKind::Pattern, 5),
            completed(BackendKind::Crawl, 10),
            completed(BackendKind::ExternalScan, 3),
        ]
    }

    #[test]
    fn all_completed_is_not_degraded() {
        let report = CorrelationEngine::default()
            .correlate(&investigation(), all_completed())
            .unwrap();

        assert!(!report.degraded);
        assert_eq!(report.per_source.len(), 3);
        assert_eq!(report.total_findings, 18);
        assert_eq!(report.confidence, 0.85);
        // (0.5*0.5 + 0.2*0.5 + 0.3*3/23) / 1.0
        assert_eq!(report.risk_score, 0.3891);
        assert_eq!(report.risk_level, RiskLevel::Medium);
        assert_eq!(report.timestamp, at(2));
        assert_eq!(report.duration_ms, 2000);
        assert_eq!(report.priority, Priority::High);
    }

    #[test]
    fn one_degraded_source_lowers_confidence() {
        let engine = CorrelationEngine::default();
        let baseline = engine.correlate(&investigation(), all_completed()).unwrap();

        let mut results = all_completed();
        results[1] = BackendResult::timed_out(BackendKind::Crawl, Duration::from_secs(15))
            .with_completed_at(at(15));
        let report = engine.correlate(&investigation(), results).unwrap();

        assert!(report.degraded);
        assert_eq!(report.status_of(BackendKind::Crawl), Some(ResultStatus::TimedOut));
        assert!(report.confidence < baseline.confidence);
        assert_eq!(report.confidence, 0.425);
        assert!(report.factors.iter().any(|f| f.starts_with("crawl: timed_out")));
    }

    #[test]
    fn nothing_completed_sits_at_floor() {
        let results = BackendKind::ALL
            .iter()
            .map(|kind| BackendResult::failed(*kind, "unavailable").with_completed_at(at(1)))
            .collect();
        let report = CorrelationEngine::default()
            .correlate(&investigation(), results)
            .unwrap();

        assert!(report.degraded);
        assert!(report.confidence <= 0.05);
        assert_eq!(report.risk_score, 0.0);
        assert_eq!(report.risk_level, RiskLevel::Low);
    }

    #[test]
    fn correlate_is_idempotent() {
        let engine = CorrelationEngine::default();
        let first = engine.correlate(&investigation(), all_completed()).unwrap();
        let second = engine.correlate(&investigation(), all_completed()).unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn duplicate_sources_are_internal_errors() {
        let results = vec![completed(BackendKind::Crawl, 1), completed(BackendKind::Crawl, 2)];
        let err = CorrelationEngine::default()
            .correlate(&investigation(), results)
            .unwrap_err();
        assert!(matches!(err, OrchestraError::Internal(_)));
    }

    #[test]
    fn fallback_findings_are_preserved_but_unscored() {
        let mut raw = BTreeMap::new();
        raw.insert("note".to_string(), json!("scanner reported fallback mode"));
        let results = vec![
            completed(BackendKind::Pattern, 0),
            BackendResult::fallback(BackendKind::ExternalScan, vec![json!({"simulated": true})], raw)
                .with_completed_at(at(1)),
        ];
        let report = CorrelationEngine::default()
            .correlate(&investigation(), results)
            .unwrap();

        assert_eq!(report.risk_score, 0.5);
        assert_eq!(report.per_source[&BackendKind::ExternalScan].findings.len(), 1);
        assert_eq!(report.confidence, 0.51);
    }
}
