//! Orchestra Core - investigation orchestration and correlation
//!
//! Accepts an investigation request, fans it out to the analysis backends,
//! tolerates partial backend failure and merges the results into one scored
//! report:
//! - Identity Hasher: opaque handles for targets in logs and outbound queries
//! - Backend Adapters: pattern/threat, crawl and external-scan links
//! - Dispatch Coordinator: concurrent fan-out with a full barrier
//! - Correlation Engine: risk score, confidence, degradation
//! - Request Gateway: lifecycle state machine, exactly one reply per request
//!
//! # Example
//!
//! ```rust,ignore
//! use orchestra_core::{Gateway, OrchestraConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = OrchestraConfig::load(None)?;
//! let gateway = Gateway::from_config(&config)?;
//!
//! let reply = gateway
//!     .handle(serde_json::json!({"action": "investigate", "target": "alice"}))
//!     .await;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod adapter;
pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod hasher;
pub mod state_machine;
pub mod types;

pub use adapter::{build_adapters, Adapter, BackendAdapter, BackendProtocol, BackendReply};
pub use config::{OrchestraConfig, PatternAction, ScoringPolicy};
pub use correlation::CorrelationEngine;
pub use dispatch::DispatchCoordinator;
pub use error::{BackendFailure, ConfigError, ErrorKind, ErrorPayload, OrchestraError};
pub use gateway::{Gateway, GatewayServer, HealthReport, HealthStatus, InvestigateRequest};
pub use hasher::{IdentityHasher, TargetHandle};
pub use types::{
    BackendKind, BackendResult, CorrelatedReport, Investigation, InvestigationState, OperationId,
    Priority, ResultStatus, RiskLevel, SourceSummary,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Orchestra Core
    pub use crate::{
        BackendAdapter, BackendKind, BackendResult, CorrelatedReport, CorrelationEngine,
        DispatchCoordinator, Gateway, IdentityHasher, Investigation, OperationId,
        OrchestraConfig, OrchestraError, ResultStatus,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
