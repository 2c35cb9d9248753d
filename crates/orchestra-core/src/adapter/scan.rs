//! External-scan backend

use super::{fallback_raw, expect_object, protocol_error, raw_fields, BackendProtocol, BackendReply};
use crate::error::BackendFailure;
use crate::hasher::TargetHandle;
use crate::types::{BackendKind, BackendResult, OperationId};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::LazyLock;

/// Modules requested from the scanner
pub const SCAN_MODULES: [&str; 3] = ["sfp_dns", "sfp_whois", "sfp_social"];

/// Modules reported by the fallback producer
pub const SIMULATED_MODULES: [&str; 3] = ["simulated_dns", "simulated_whois", "simulated_social"];

/// Target shape as the scanner understands it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    /// `EMAILADDR`
    #[serde(rename = "EMAILADDR")]
    EmailAddr,
    /// `IP_ADDRESS`
    IpAddress,
    /// `USERNAME`
    Username,
}

static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$").ok()
});

/// External-scan wire contract
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanProtocol;

impl ScanProtocol {
    /// Create the protocol
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Infer the scanner target type
    ///
    /// # Errors
    /// Returns a reason when the target contains `@` but is not an e-mail
    pub fn target_type(&self, target: &str) -> Result<TargetType, &'static str> {
        if target.contains('@') {
            let is_email = EMAIL.as_ref().is_some_and(|re| re.is_match(target));
            return if is_email {
                Ok(TargetType::EmailAddr)
            } else {
                Err("malformed e-mail address")
            };
        }
        if target.parse::<IpAddr>().is_ok() {
            return Ok(TargetType::IpAddress);
        }
        Ok(TargetType::Username)
    }
}

impl BackendProtocol for ScanProtocol {
    const KIND: BackendKind = BackendKind::ExternalScan;

    fn check_target(&self, target: &str) -> Result<(), &'static str> {
        self.target_type(target).map(|_| ())
    }

    fn build_request(
        &self,
        target: &str,
        _handle: &TargetHandle,
        operation_id: &OperationId,
    ) -> Value {
        let target_type = self.target_type(target).unwrap_or(TargetType::Username);
        json!({
            "action": "scan",
            "target": target,
            "target_type": target_type,
            "operation_id": operation_id,
            "modules": SCAN_MODULES,
        })
    }

    fn parse_reply(&self, reply: Value) -> Result<BackendReply, BackendFailure> {
        let map = expect_object(reply)?;
        let reply: ScanReply = serde_json::from_value(Value::Object(map)).map_err(protocol_error)?;
        match reply.state() {
            ScanState::Completed if reply.scan_id.is_none() => {
                Err(protocol_error("completed scan without scan_id"))
            }
            ScanState::Completed | ScanState::Fallback => Ok(BackendReply::ExternalScan(reply)),
            ScanState::Unexpected => Err(protocol_error("unexpected scan status")),
        }
    }

    fn fallback(&self, failure: &BackendFailure) -> BackendResult {
        let mut raw = fallback_raw(failure);
        raw.insert("modules_run".to_string(), json!(SIMULATED_MODULES));
        raw.insert("findings_count".to_string(), json!(0));
        BackendResult::fallback(Self::KIND, Vec::new(), raw)
    }
}

enum ScanState {
    Completed,
    Fallback,
    Unexpected,
}

/// External-scan reply
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScanReply {
    /// Scanner-side identifier
    #[serde(default)]
    pub scan_id: Option<String>,
    /// `completed`, `finished` or `fallback_mode`
    pub status: String,
    /// Modules that ran
    #[serde(default)]
    pub modules_run: Vec<String>,
    /// Finding count; may be a placeholder such as `"unknown"`
    #[serde(default)]
    pub findings_count: Option<Value>,
    /// Individual findings, when the scanner returns them
    #[serde(default)]
    pub findings: Vec<Value>,
    /// Everything else
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ScanReply {
    fn state(&self) -> ScanState {
        match self.status.as_str() {
            "completed" | "finished" => ScanState::Completed,
            "fallback_mode" => ScanState::Fallback,
            _ => ScanState::Unexpected,
        }
    }

    pub(crate) fn into_result(self) -> BackendResult {
        let state = self.state();
        let count = self
            .findings_count
            .as_ref()
            .and_then(Value::as_u64)
            .unwrap_or(self.findings.len() as u64);

        let mut raw = raw_fields(self.extra);
        if let Some(scan_id) = self.scan_id {
            raw.insert("scan_id".to_string(), json!(scan_id));
        }
        raw.insert("scan_status".to_string(), json!(self.status));
        raw.insert("modules_run".to_string(), json!(self.modules_run));
        if let Some(reported) = self.findings_count {
            raw.insert("findings_count".to_string(), reported);
        }

        match state {
            ScanState::Fallback => {
                raw.entry("note".to_string())
                    .or_insert_with(|| json!("scanner reported fallback mode"));
                BackendResult::fallback(BackendKind::ExternalScan, self.findings, raw)
            }
            ScanState::Completed => {
                BackendResult::completed(BackendKind::ExternalScan, self.findings, count, raw)
            }
            ScanState::Unexpected => BackendResult::failed(
                BackendKind::ExternalScan,
                &format!("unexpected scan status {:?}", self.status),
            ),
        }
    }
}
