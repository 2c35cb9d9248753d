//! Pattern/threat backend
//!
//! Local trusted backend: it receives the raw target for feature analysis
//! when asked to `analyze_pattern`. `assess_threat` sends the handle only.

use super::{expect_object, fallback_raw, protocol_error, raw_fields, BackendProtocol, BackendReply};
use crate::config::PatternAction;
use crate::error::BackendFailure;
use crate::hasher::TargetHandle;
use crate::types::{BackendKind, BackendResult, OperationId};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Pattern backend wire contract
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternProtocol {
    action: PatternAction,
}

impl PatternProtocol {
    /// Protocol issuing `action`
    #[must_use]
    pub fn new(action: PatternAction) -> Self {
        Self { action }
    }
}

impl BackendProtocol for PatternProtocol {
    const KIND: BackendKind = BackendKind::Pattern;

    fn build_request(
        &self,
        target: &str,
        handle: &TargetHandle,
        operation_id: &OperationId,
    ) -> Value {
        match self.action {
            PatternAction::AnalyzePattern => json!({
                "action": self.action.as_str(),
                "target": target,
                "target_handle": handle,
                "operation_id": operation_id,
            }),
            PatternAction::AssessThreat => json!({
                "action": self.action.as_str(),
                "target_handle": handle,
                "operation_id": operation_id,
                "intelligence_data": { "target_handle": handle },
            }),
        }
    }

    fn parse_reply(&self, reply: Value) -> Result<BackendReply, BackendFailure> {
        let map = expect_object(reply)?;
        let reply: PatternReply =
            serde_json::from_value(Value::Object(map)).map_err(protocol_error)?;
        reply.check()?;
        Ok(BackendReply::Pattern(reply))
    }

    fn fallback(&self, failure: &BackendFailure) -> BackendResult {
        let mut raw = fallback_raw(failure);
        raw.insert("pattern_type".to_string(), json!("unknown"));
        BackendResult::fallback(Self::KIND, Vec::new(), raw)
    }
}

/// Pattern backend reply
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PatternReply {
    /// Classified identifier pattern
    #[serde(default)]
    pub pattern_type: Option<String>,
    /// Threat level: low, medium, high or critical
    #[serde(default)]
    pub threat_level: Option<String>,
    /// Backend's own confidence
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Backend's own risk estimate in [0, 1]
    #[serde(default)]
    pub risk_score: Option<f64>,
    /// Individual indicators
    #[serde(default)]
    pub findings: Vec<Value>,
    /// Everything else
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl PatternReply {
    fn check(&self) -> Result<(), BackendFailure> {
        if self.pattern_type.is_none() && self.threat_level.is_none() {
            return Err(protocol_error("reply carries neither pattern_type nor threat_level"));
        }
        if let Some(level) = &self.threat_level {
            if threat_signal(level).is_none() {
                return Err(protocol_error("unknown threat_level"));
            }
        }
        for value in [self.confidence, self.risk_score].into_iter().flatten() {
            if !(0.0..=1.0).contains(&value) {
                return Err(protocol_error("score out of range"));
            }
        }
        Ok(())
    }

    pub(crate) fn into_result(self) -> BackendResult {
        let mut raw = raw_fields(self.extra);
        if let Some(pattern_type) = self.pattern_type {
            raw.insert("pattern_type".to_string(), json!(pattern_type));
        }
        if let Some(level) = self.threat_level {
            raw.insert("threat_level".to_string(), json!(level));
        }
        if let Some(confidence) = self.confidence {
            raw.insert("confidence".to_string(), json!(confidence));
        }
        if let Some(score) = self.risk_score {
            raw.insert("risk_score".to_string(), json!(score));
        }
        let count = self.findings.len() as u64;
        BackendResult::completed(BackendKind::Pattern, self.findings, count, raw)
    }
}

/// Numeric signal of a threat level
#[must_use]
pub fn threat_signal(level: &str) -> Option<f64> {
    match level.to_ascii_lowercase().as_str() {
        "low" => Some(0.25),
        "medium" => Some(0.5),
        "high" => Some(0.75),
        "critical" => Some(1.0),
        _ => None,
    }
}

/// Risk signal carried by a pattern result
///
/// `risk_score` wins over `threat_level`; a result with neither has no signal.
#[must_use]
pub fn risk_signal(raw: &BTreeMap<String, Value>) -> Option<f64> {
    raw.get("risk_score")
        .and_then(Value::as_f64)
        .or_else(|| raw.get("threat_level").and_then(Value::as_str).and_then(threat_signal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash;
    use crate::types::ResultStatus;

    fn op() -> OperationId {
        OperationId::parse("op_1_abcdef").unwrap()
    }

    #[test]
    fn analyze_request_carries_target_and_handle() {
        let protocol = PatternProtocol::default();
        let request = protocol.build_request("alice", &hash("alice"), &op());
        assert_eq!(request["action"], "analyze_pattern");
        assert_eq!(request["target"], "alice");
        assert_eq!(request["target_handle"], "2bd806c97f0e00af");
    }

    #[test]
    fn assess_request_omits_raw_target() {
        let protocol = PatternProtocol::new(PatternAction::AssessThreat);
        let request = protocol.build_request("alice", &hash("alice"), &op());
        assert_eq!(request["action"], "assess_threat");
        assert!(!request.to_string().contains("alice"));
    }

    #[test]
    fn parses_reply() {
        let reply = json!({
            "pattern_type": "username",
            "threat_level": "high",
            "confidence": 0.9,
            "findings": [{"indicator": "reuse"}],
            "target": "alice",
            "model": "v2",
        });
        let result = PatternProtocol::default()
            .parse_reply(reply)
            .unwrap()
            .into_result();

        assert_eq!(result.status(), ResultStatus::Completed);
        assert_eq!(result.findings_count(), 1);
        assert_eq!(result.raw()["model"], "v2");
        assert!(!result.raw().contains_key("target"));
        assert_eq!(risk_signal(result.raw()), Some(0.75));
    }

    #[test]
    fn rejects_reply_without_classification() {
        let err = PatternProtocol::default()
            .parse_reply(json!({"confidence": 0.4}))
            .unwrap_err();
        assert_eq!(err.reason(), "protocol_error");

        let err = PatternProtocol::default()
            .parse_reply(json!({"threat_level": "apocalyptic"}))
            .unwrap_err();
        assert_eq!(err.reason(), "protocol_error");
    }

    #[test]
    fn risk_score_wins_over_threat_level() {
        let raw = BTreeMap::from([
            ("risk_score".to_string(), json!(0.1)),
            ("threat_level".to_string(), json!("critical")),
        ]);
        assert_eq!(risk_signal(&raw), Some(0.1));
    }

    #[test]
    fn fallback_is_unknown_pattern() {
        let result = PatternProtocol::default().fallback(&BackendFailure::Unavailable("down".into()));
        assert_eq!(result.status(), ResultStatus::Fallback);
        assert_eq!(result.raw()["pattern_type"], "unknown");
        assert_eq!(result.raw()["reason"], "unavailable");
        assert_eq!(risk_signal(result.raw()), None);
    }
}
