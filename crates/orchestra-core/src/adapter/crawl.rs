//! Crawl backend
//!
//! Only the handle leaves the process. The search URLs handed to the
//! crawler are built from the handle, never from the target.

use super::{fallback_raw, protocol_error, raw_fields, BackendProtocol, BackendReply};
use crate::error::BackendFailure;
use crate::hasher::TargetHandle;
use crate::types::{BackendKind, BackendResult, OperationId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Crawl backend wire contract
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlProtocol;

/// Search URLs for a handle
#[must_use]
pub fn opsec_queries(handle: &TargetHandle) -> Vec<String> {
    vec![
        format!("https://www.google.com/search?q=%22{handle}%22"),
        format!("https://github.com/search?q={handle}"),
        format!("https://twitter.com/search?q={handle}"),
    ]
}

impl BackendProtocol for CrawlProtocol {
    const KIND: BackendKind = BackendKind::Crawl;

    fn build_request(
        &self,
        _target: &str,
        handle: &TargetHandle,
        operation_id: &OperationId,
    ) -> Value {
        json!({
            "action": "crawl",
            "target_handle": handle,
            "operation_id": operation_id,
            "queries": opsec_queries(handle),
        })
    }

    fn parse_reply(&self, reply: Value) -> Result<BackendReply, BackendFailure> {
        let reply: CrawlReply = serde_json::from_value(reply).map_err(protocol_error)?;
        Ok(BackendReply::Crawl(reply))
    }

    fn fallback(&self, failure: &BackendFailure) -> BackendResult {
        let mut raw = fallback_raw(failure);
        raw.insert("pages".to_string(), json!(0));
        BackendResult::fallback(Self::KIND, Vec::new(), raw)
    }
}

/// Page-level record collected by the crawler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlPage {
    /// Digest of the page URL
    pub url_hash: String,
    /// HTTP status as reported by the crawler
    pub status: Value,
    /// Response content type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// When the page was fetched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Everything else
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Crawl backend reply: either a bare page list or `{pages: [...], ...}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CrawlReply {
    /// Bare array of pages
    Pages(Vec<CrawlPage>),
    /// Object with a `pages` field and optional metadata
    Wrapped {
        /// Collected pages
        pages: Vec<CrawlPage>,
        /// Everything else
        #[serde(flatten)]
        extra: BTreeMap<String, Value>,
    },
}

impl CrawlReply {
    pub(crate) fn into_result(self) -> BackendResult {
        let (pages, extra) = match self {
            Self::Pages(pages) => (pages, BTreeMap::new()),
            Self::Wrapped { pages, extra } => (pages, extra),
        };
        let mut raw = raw_fields(extra);
        raw.insert("pages".to_string(), json!(pages.len()));

        let findings: Vec<Value> = pages
            .into_iter()
            .map(|mut page| {
                page.extra.remove("operation_id");
                page.extra.remove("target");
                serde_json::to_value(page).unwrap_or(Value::Null)
            })
            .collect();
        let count = findings.len() as u64;
        BackendResult::completed(BackendKind::Crawl, findings, count, raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash;
    use crate::types::ResultStatus;

    #[test]
    fn request_never_contains_target() {
        let handle = hash("alice@example.com");
        let op = OperationId::parse("op_1_abcdef").unwrap();
        let request = CrawlProtocol.build_request("alice@example.com", &handle, &op);

        let text = request.to_string();
        assert!(!text.contains("alice"));
        assert_eq!(request["queries"].as_array().unwrap().len(), 3);
        assert!(request["queries"][0]
            .as_str()
            .unwrap()
            .ends_with(&format!("%22{handle}%22")));
    }

    #[test]
    fn parses_bare_page_list() {
        let reply = json!([
            {"url_hash": "a1", "status": 200, "content_type": "text/html"},
            {"url_hash": "b2", "status": 404, "operation_id": "op_1_abcdef"},
        ]);
        let result = CrawlProtocol.parse_reply(reply).unwrap().into_result();
        assert_eq!(result.status(), ResultStatus::Completed);
        assert_eq!(result.findings_count(), 2);
        assert!(result.findings()[1].get("operation_id").is_none());
    }

    #[test]
    fn parses_wrapped_pages() {
        let reply = json!({"pages": [{"url_hash": "a1", "status": 200}], "crawler": "opsec"});
        let result = CrawlProtocol.parse_reply(reply).unwrap().into_result();
        assert_eq!(result.findings_count(), 1);
        assert_eq!(result.raw()["crawler"], "opsec");
    }

    #[test]
    fn rejects_pages_without_url_hash() {
        let err = CrawlProtocol
            .parse_reply(json!({"pages": [{"status": 200}]}))
            .unwrap_err();
        assert!(matches!(err, BackendFailure::Protocol(_)));
    }

    #[test]
    fn fallback_has_no_pages() {
        let result = CrawlProtocol.fallback(&BackendFailure::Protocol("bad".into()));
        assert_eq!(result.status(), ResultStatus::Fallback);
        assert_eq!(result.findings_count(), 0);
        assert_eq!(result.raw()["reason"], "protocol_error");
    }
}
