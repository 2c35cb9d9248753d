//! Configuration
//!
//! Loaded from an optional TOML file, then overridden from `ORCHESTRA_*`
//! environment variables, then validated. Every field has a default.

use crate::error::ConfigError;
use crate::types::{BackendKind, ResultStatus};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestraConfig {
    /// Inbound request socket
    pub gateway: GatewayConfig,
    /// Backend links
    pub backends: BackendsConfig,
    /// Target hashing
    pub opsec: OpsecConfig,
    /// Risk and confidence policy
    pub scoring: ScoringPolicy,
}

impl OrchestraConfig {
    /// Load configuration
    ///
    /// # Errors
    /// - `ConfigError::Io` if `path` cannot be read
    /// - `ConfigError::Parse` if it is not valid TOML for this schema
    /// - `ConfigError::Invalid` if validation fails
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without environment overrides or validation
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` on invalid input
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `ORCHESTRA_*` overrides from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("ORCHESTRA_GATEWAY_BIND") {
            self.gateway.bind = bind;
        }
        if let Some(addr) = lookup("ORCHESTRA_PATTERN_ADDR") {
            self.backends.pattern.address = Some(addr);
        }
        if let Some(addr) = lookup("ORCHESTRA_CRAWL_ADDR") {
            self.backends.crawl.address = Some(addr);
        }
        if let Some(addr) = lookup("ORCHESTRA_SCAN_ADDR") {
            self.backends.external_scan.address = Some(addr);
        }
        if let Some(salt) = lookup("ORCHESTRA_HASH_SALT") {
            self.opsec.salt = salt;
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.max_frame_bytes == 0 {
            return Err(invalid("gateway.max_frame_bytes must be positive"));
        }
        if self.gateway.max_batch == 0 {
            return Err(invalid("gateway.max_batch must be positive"));
        }

        let mut enabled = 0;
        for kind in BackendKind::ALL {
            let backend = self.backends.get(kind);
            if backend.timeout_ms == Some(0) {
                return Err(invalid(format!("backends.{kind}.timeout_ms must be positive")));
            }
            if backend.address.as_deref().is_some_and(str::is_empty) {
                return Err(invalid(format!("backends.{kind}.address must not be empty")));
            }
            if backend.action.is_some() && kind != BackendKind::Pattern {
                return Err(invalid(format!("backends.{kind}.action is only valid for pattern")));
            }
            if backend.enabled {
                enabled += 1;
            }
        }
        if enabled == 0 {
            return Err(invalid("at least one backend must be enabled"));
        }

        self.scoring.validate()
    }
}

/// Smallest confidence drop a degraded source may cause; reports carry four decimals
const MIN_CONFIDENCE_STEP: f64 = 2e-4;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Inbound request socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address
    pub bind: String,
    /// Largest accepted request frame
    pub max_frame_bytes: usize,
    /// Largest accepted batch
    pub max_batch: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5558".to_string(),
            max_frame_bytes: orchestra_link::DEFAULT_MAX_FRAME_BYTES,
            max_batch: 100,
        }
    }
}

/// Per-backend settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    /// Pattern/threat backend
    pub pattern: BackendConfig,
    /// Crawl backend
    pub crawl: BackendConfig,
    /// External-scan backend
    pub external_scan: BackendConfig,
}

impl BackendsConfig {
    /// Settings for one backend
    #[must_use]
    pub fn get(&self, kind: BackendKind) -> &BackendConfig {
        match kind {
            BackendKind::Pattern => &self.pattern,
            BackendKind::Crawl => &self.crawl,
            BackendKind::ExternalScan => &self.external_scan,
        }
    }

    /// Mutable settings for one backend
    pub fn get_mut(&mut self, kind: BackendKind) -> &mut BackendConfig {
        match kind {
            BackendKind::Pattern => &mut self.pattern,
            BackendKind::Crawl => &mut self.crawl,
            BackendKind::ExternalScan => &mut self.external_scan,
        }
    }
}

/// One backend link
///
/// `address` and `timeout_ms` fall back to per-kind defaults when unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Whether the adapter is configured at all
    pub enabled: bool,
    /// `host:port` or `tcp://host:port`
    pub address: Option<String>,
    /// Per-call deadline
    pub timeout_ms: Option<u64>,
    /// Whether failures produce fallback data
    pub fallback: bool,
    /// Pattern backend verb
    pub action: Option<PatternAction>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: None,
            timeout_ms: None,
            fallback: true,
            action: None,
        }
    }
}

impl BackendConfig {
    /// Effective address
    #[must_use]
    pub fn address_for(&self, kind: BackendKind) -> String {
        self.address
            .clone()
            .unwrap_or_else(|| kind.default_address().to_string())
    }

    /// Effective deadline
    #[must_use]
    pub fn timeout_for(&self, kind: BackendKind) -> Duration {
        self.timeout_ms
            .map_or_else(|| kind.default_timeout(), Duration::from_millis)
    }
}

/// Verb sent to the pattern/threat backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternAction {
    /// Classify the identifier pattern
    #[default]
    AnalyzePattern,
    /// Assess threat from gathered intelligence
    AssessThreat,
}

impl PatternAction {
    /// Wire name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AnalyzePattern => "analyze_pattern",
            Self::AssessThreat => "assess_threat",
        }
    }
}

/// Target hashing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsecConfig {
    /// Deployment salt; empty means unsalted
    pub salt: String,
}

/// Risk and confidence policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    /// Weight of the pattern signal
    pub pattern_weight: f64,
    /// Weight of the crawl volume signal
    pub crawl_weight: f64,
    /// Weight of the external-scan volume signal
    pub external_scan_weight: f64,
    /// Confidence before degradation penalties
    pub baseline_confidence: f64,
    /// Multiplier per `Fallback` source
    pub fallback_penalty: f64,
    /// Multiplier per `TimedOut` source
    pub timed_out_penalty: f64,
    /// Multiplier per `Failed` source
    pub failed_penalty: f64,
    /// Ceiling applied when no source completed
    pub confidence_floor: f64,
    /// Pages at which the crawl signal reaches 0.5
    pub crawl_saturation: f64,
    /// Findings at which the scan signal reaches 0.5
    pub scan_saturation: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            pattern_weight: 0.5,
            crawl_weight: 0.2,
            external_scan_weight: 0.3,
            baseline_confidence: 0.85,
            fallback_penalty: 0.6,
            timed_out_penalty: 0.5,
            failed_penalty: 0.4,
            confidence_floor: 0.05,
            crawl_saturation: 10.0,
            scan_saturation: 20.0,
        }
    }
}

impl ScoringPolicy {
    /// Weight of one source
    #[must_use]
    pub fn weight(&self, kind: BackendKind) -> f64 {
        match kind {
            BackendKind::Pattern => self.pattern_weight,
            BackendKind::Crawl => self.crawl_weight,
            BackendKind::ExternalScan => self.external_scan_weight,
        }
    }

    /// Confidence multiplier for one status
    #[must_use]
    pub fn penalty(&self, status: ResultStatus) -> f64 {
        match status {
            ResultStatus::Completed => 1.0,
            ResultStatus::Fallback => self.fallback_penalty,
            ResultStatus::TimedOut => self.timed_out_penalty,
            ResultStatus::Failed => self.failed_penalty,
        }
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` describing the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [self.pattern_weight, self.crawl_weight, self.external_scan_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid("scoring weights must be finite and non-negative"));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(invalid("scoring weights must not all be zero"));
        }
        for (name, factor) in [
            ("fallback_penalty", self.fallback_penalty),
            ("timed_out_penalty", self.timed_out_penalty),
            ("failed_penalty", self.failed_penalty),
        ] {
            if !(factor > 0.0 && factor < 1.0) {
                return Err(invalid(format!("scoring.{name} must be in (0, 1)")));
            }
        }
        if !(self.baseline_confidence > 0.0 && self.baseline_confidence <= 1.0) {
            return Err(invalid("scoring.baseline_confidence must be in (0, 1]"));
        }
        let penalties = [self.fallback_penalty, self.timed_out_penalty, self.failed_penalty];
        let weakest = penalties.iter().copied().fold(0.0, f64::max);
        let strongest = penalties.iter().copied().fold(1.0, f64::min);
        let mut confidence = self.baseline_confidence;
        for _ in BackendKind::ALL {
            if confidence * (1.0 - weakest) < MIN_CONFIDENCE_STEP {
                return Err(invalid(
                    "scoring penalties and baseline_confidence leave degraded reports \
                     indistinguishable at four decimals",
                ));
            }
            confidence *= strongest;
        }
        if !(self.confidence_floor >= 0.0 && self.confidence_floor < self.baseline_confidence) {
            return Err(invalid("scoring.confidence_floor must be in [0, baseline_confidence)"));
        }
        if !(self.crawl_saturation > 0.0 && self.scan_saturation > 0.0) {
            return Err(invalid("scoring saturation constants must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = OrchestraConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.backends.external_scan.timeout_for(BackendKind::ExternalScan),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn partial_backend_section_keeps_kind_defaults() {
        let config = OrchestraConfig::from_toml(
            r#"
            [backends.crawl]
            timeout_ms = 1500

            [backends.pattern]
            action = "assess_threat"
            "#,
        )
        .unwrap();

        let crawl = config.backends.get(BackendKind::Crawl);
        assert_eq!(crawl.timeout_for(BackendKind::Crawl), Duration::from_millis(1500));
        assert_eq!(crawl.address_for(BackendKind::Crawl), "127.0.0.1:5557");
        assert!(crawl.fallback);
        assert_eq!(config.backends.pattern.action, Some(PatternAction::AssessThreat));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ORCHESTRA_SCAN_ADDR", "10.0.0.5:7000"),
            ("ORCHESTRA_HASH_SALT", "pepper"),
        ]);
        let mut config = OrchestraConfig::default();
        config.apply_env(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.backends.external_scan.address.as_deref(), Some("10.0.0.5:7000"));
        assert_eq!(config.opsec.salt, "pepper");
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = OrchestraConfig::default();
        config.backends.crawl.timeout_ms = Some(0);
        assert!(config.validate().is_err());

        let mut config = OrchestraConfig::default();
        config.scoring.failed_penalty = 1.0;
        assert!(config.validate().is_err());

        let mut config = OrchestraConfig::default();
        for kind in BackendKind::ALL {
            config.backends.get_mut(kind).enabled = false;
        }
        assert!(config.validate().is_err());

        let mut config = OrchestraConfig::default();
        config.backends.crawl.action = Some(PatternAction::AnalyzePattern);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_penalties_lost_to_rounding() {
        let mut config = OrchestraConfig::default();
        config.scoring.fallback_penalty = 0.99999;
        assert!(config.validate().is_err());

        let mut config = OrchestraConfig::default();
        config.scoring.baseline_confidence = 0.0001;
        config.scoring.confidence_floor = 0.0;
        assert!(config.validate().is_err());

        let mut config = OrchestraConfig::default();
        config.scoring.failed_penalty = 0.01;
        assert!(config.validate().is_err());

        let mut config = OrchestraConfig::default();
        config.scoring.fallback_penalty = 0.9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nbind = \"0.0.0.0:6000\"\nmax_batch = 10").unwrap();

        let config = OrchestraConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.gateway.max_batch, 10);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = OrchestraConfig::load(Some(Path::new("/nonexistent/orchestra.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
