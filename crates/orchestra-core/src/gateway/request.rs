//! Inbound request parsing
//!
//! Requests are parsed by hand from a JSON value so that every rejection
//! carries a precise validation message.

use crate::error::OrchestraError;
use crate::types::{OperationId, Priority};
use serde_json::{Map, Value};

/// A validated inbound request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Investigate one target
    Investigate(InvestigateRequest),
    /// Investigate several targets in sequence
    InvestigateBatch(Vec<BatchItem>),
    /// Report backend link health
    Health,
}

/// One batch entry: a request, or the validation message that rejected it
pub type BatchItem = Result<InvestigateRequest, String>;

/// One investigation as requested by a caller
#[derive(Clone, PartialEq)]
pub struct InvestigateRequest {
    /// Raw target
    pub target: String,
    /// Caller-supplied id, if any
    pub operation_id: Option<OperationId>,
    /// Priority, echoed in the report
    pub priority: Priority,
}

impl InvestigateRequest {
    /// Request for `target` with defaults
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            operation_id: None,
            priority: Priority::default(),
        }
    }

    /// Use a caller-supplied operation id
    #[must_use]
    pub fn with_operation_id(mut self, operation_id: OperationId) -> Self {
        self.operation_id = Some(operation_id);
        self
    }

    /// Set the priority
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for InvestigateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvestigateRequest")
            .field("operation_id", &self.operation_id)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Parse and validate a request
///
/// # Errors
/// Returns `OrchestraError::Validation` describing the first problem found
pub fn parse(request: &Value, max_batch: usize) -> Result<Request, OrchestraError> {
    let map = request
        .as_object()
        .ok_or_else(|| OrchestraError::validation("request must be a JSON object"))?;

    let action = match map.get("action") {
        Some(Value::String(action)) => action.as_str(),
        Some(_) => return Err(OrchestraError::validation("field 'action' must be a string")),
        None => return Err(OrchestraError::validation("missing field 'action'")),
    };

    match action {
        "investigate" => parse_investigation(map).map(Request::Investigate),
        "investigate_batch" => parse_batch(map, max_batch).map(Request::InvestigateBatch),
        "health" => Ok(Request::Health),
        other => Err(OrchestraError::validation(format!("unknown action '{other}'"))),
    }
}

fn parse_investigation(map: &Map<String, Value>) -> Result<InvestigateRequest, OrchestraError> {
    let target = match map.get("target") {
        Some(Value::String(target)) if !target.trim().is_empty() => target.clone(),
        Some(Value::String(_)) => {
            return Err(OrchestraError::validation("field 'target' must not be empty"))
        }
        Some(_) => return Err(OrchestraError::validation("field 'target' must be a string")),
        None => return Err(OrchestraError::validation("missing field 'target'")),
    };

    let operation_id = match map.get("operation_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(id)) => Some(OperationId::parse(id)?),
        Some(_) => {
            return Err(OrchestraError::validation("field 'operation_id' must be a string"))
        }
    };

    let priority = match map.get("priority") {
        None | Some(Value::Null) => Priority::default(),
        Some(Value::String(priority)) => priority.parse()?,
        Some(_) => return Err(OrchestraError::validation("field 'priority' must be a string")),
    };

    Ok(InvestigateRequest {
        target,
        operation_id,
        priority,
    })
}

fn parse_batch(
    map: &Map<String, Value>,
    max_batch: usize,
) -> Result<Vec<BatchItem>, OrchestraError> {
    let items = match map.get("requests") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(OrchestraError::validation("field 'requests' must be an array")),
        None => return Err(OrchestraError::validation("missing field 'requests'")),
    };
    if items.is_empty() {
        return Err(OrchestraError::validation("field 'requests' must not be empty"));
    }
    if items.len() > max_batch {
        return Err(OrchestraError::validation(format!(
            "batch exceeds maximum of {max_batch} requests"
        )));
    }

    Ok(items
        .iter()
        .map(|item| match item.as_object() {
            Some(map) => parse_investigation(map).map_err(|err| err.to_string()),
            None => Err("batch entry must be an object".to_string()),
        })
        .collect())
}
