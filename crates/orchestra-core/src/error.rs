//! Error types for Orchestra Core
//!
//! Two layers:
//! - [`OrchestraError`]: the taxonomy surfaced at component boundaries
//! - [`BackendFailure`]: adapter-local failures, always absorbed into
//!   degraded data before they reach the Coordinator
//!
//! Only validation and internal errors ever reach a caller, as an
//! [`ErrorPayload`].

use crate::types::{BackendKind, InvestigationState};
use chrono::{DateTime, Utc};
use orchestra_link::LinkError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main orchestration error type
#[derive(Debug, thiserror::Error)]
pub enum OrchestraError {
    /// Malformed inbound request
    #[error("{0}")]
    Validation(String),

    /// Backend did not answer within its deadline
    #[error("backend {backend} timed out after {timeout_ms}ms")]
    BackendTimeout {
        /// Backend that timed out
        backend: BackendKind,
        /// Configured deadline
        timeout_ms: u64,
    },

    /// Backend reply had an unexpected shape
    #[error("backend {backend} protocol error: {reason}")]
    BackendProtocol {
        /// Backend at fault
        backend: BackendKind,
        /// Failure category
        reason: &'static str,
    },

    /// Backend link could not be established
    #[error("backend {backend} unavailable")]
    BackendUnavailable {
        /// Backend at fault
        backend: BackendKind,
    },

    /// Investigation lifecycle violated
    #[error("illegal state transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// State before
        from: InvestigationState,
        /// Requested state
        to: InvestigationState,
    },

    /// Unexpected failure inside coordination or correlation
    #[error("internal error: {0}")]
    Internal(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestraError {
    /// Create a validation error
    #[inline]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wire-level kind of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::BackendTimeout { .. } => ErrorKind::BackendTimeout,
            Self::BackendProtocol { .. } => ErrorKind::BackendProtocolError,
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::IllegalTransition { .. } | Self::Internal(_) => ErrorKind::InternalError,
            Self::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Whether this error may be reported to a caller as-is
    ///
    /// Backend errors are absorbed below the Coordinator and never surface.
    #[inline]
    #[must_use]
    pub fn is_surfaced(&self) -> bool {
        matches!(self.kind(), ErrorKind::ValidationError | ErrorKind::InternalError)
    }
}

/// Error kinds as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed inbound request
    ValidationError,
    /// Backend deadline elapsed
    BackendTimeout,
    /// Backend reply malformed
    BackendProtocolError,
    /// Backend unreachable
    BackendUnavailable,
    /// Unexpected internal failure
    InternalError,
    /// Invalid configuration
    ConfigError,
}

/// Structured error reply
///
/// Never carries a stack trace or an unhashed target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Always `"error"`
    pub status: String,
    /// Error kind
    pub kind: ErrorKind,
    /// Human-readable message
    pub error: String,
    /// Operation the error belongs to, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    /// When the error was produced
    pub timestamp: DateTime<Utc>,
}

impl ErrorPayload {
    /// Build the payload for an error
    ///
    /// Internal errors are reported with a generic message; details stay in
    /// the logs.
    #[must_use]
    pub fn from_error(error: &OrchestraError, operation_id: Option<String>) -> Self {
        let kind = if error.is_surfaced() {
            error.kind()
        } else {
            ErrorKind::InternalError
        };
        let message = match kind {
            ErrorKind::ValidationError => error.to_string(),
            _ => "internal error while processing investigation".to_string(),
        };
        Self {
            status: "error".to_string(),
            kind,
            error: message,
            operation_id,
            timestamp: Utc::now(),
        }
    }
}

/// Adapter-local failure of one backend call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendFailure {
    /// Deadline elapsed
    #[error("deadline exceeded")]
    Timeout,

    /// Reply malformed or unexpected
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Link could not be established or dropped mid-exchange
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend answered with an error
    #[error("backend signalled an error")]
    Rejected(String),
}

impl BackendFailure {
    /// Short category, safe to log and to embed in results
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Protocol(_) => "protocol_error",
            Self::Unavailable(_) => "unavailable",
            Self::Rejected(_) => "backend_error",
        }
    }

    /// Map into the orchestration taxonomy
    #[must_use]
    pub fn into_error(self, backend: BackendKind, timeout_ms: u64) -> OrchestraError {
        match self {
            Self::Timeout => OrchestraError::BackendTimeout { backend, timeout_ms },
            Self::Unavailable(_) => OrchestraError::BackendUnavailable { backend },
            Self::Protocol(_) => OrchestraError::BackendProtocol {
                backend,
                reason: "malformed reply",
            },
            Self::Rejected(_) => OrchestraError::BackendProtocol {
                backend,
                reason: "backend signalled an error",
            },
        }
    }
}

impl From<LinkError> for BackendFailure {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Timeout => Self::Timeout,
            LinkError::Connect { .. } | LinkError::Io(_) | LinkError::Closed => {
                Self::Unavailable(err.to_string())
            }
            LinkError::Malformed(_) | LinkError::FrameTooLarge { .. } | LinkError::Corrupted(_) => {
                Self::Protocol(err.to_string())
            }
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}
