//! Property tests: hashing and scoring invariants

use chrono::{TimeZone, Utc};
use orchestra_core::hasher::{IdentityHasher, HANDLE_LEN};
use orchestra_core::{
    BackendKind, BackendResult, CorrelationEngine, Investigation, OperationId, Priority,
    ResultStatus, ScoringPolicy,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

fn investigation() -> Investigation {
    Investigation::new(
        OperationId::parse("op_1_props").unwrap(),
        "target",
        orchestra_core::hasher::hash("target"),
        Priority::Medium,
    )
    .with_started_at(Utc.timestamp_opt(1_700_000_000, 0).unwrap())
}

fn result(kind: BackendKind, status: ResultStatus, n: u64, threat: f64) -> BackendResult {
    let at = Utc.timestamp_opt(1_700_000_001, 0).unwrap();
    let result = match status {
        ResultStatus::Completed => {
            let mut raw = BTreeMap::new();
            if kind == BackendKind::Pattern {
                raw.insert("risk_score".to_string(), json!(threat));
            }
            BackendResult::completed(kind, Vec::new(), n, raw)
        }
        ResultStatus::Fallback => BackendResult::fallback(kind, Vec::new(), BTreeMap::new()),
        ResultStatus::Failed => BackendResult::failed(kind, "unavailable"),
        ResultStatus::TimedOut => BackendResult::timed_out(kind, Duration::from_secs(1)),
    };
    result.with_completed_at(at)
}

fn any_status() -> impl Strategy<Value = ResultStatus> {
    prop_oneof![
        Just(ResultStatus::Completed),
        Just(ResultStatus::Fallback),
        Just(ResultStatus::Failed),
        Just(ResultStatus::TimedOut),
    ]
}

fn any_policy() -> impl Strategy<Value = ScoringPolicy> {
    (0.001..=1.0f64, 0.01..0.999f64, 0.01..0.999f64, 0.01..0.999f64, 0.0..1.0f64).prop_map(
        |(baseline, fallback, timed_out, failed, floor_share)| ScoringPolicy {
            baseline_confidence: baseline,
            fallback_penalty: fallback,
            timed_out_penalty: timed_out,
            failed_penalty: failed,
            confidence_floor: baseline * floor_share,
            ..ScoringPolicy::default()
        },
    )
}

proptest! {
    #[test]
    fn prop_hash_is_stable_and_fixed_length(target in ".{0,300}", salt in "[a-z]{0,8}") {
        let hasher = IdentityHasher::with_salt(&salt);
        let first = hasher.hash(&target);
        prop_assert_eq!(first.as_str().len(), HANDLE_LEN);
        prop_assert_eq!(&first, &hasher.hash(&target));
        prop_assert!(first.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn prop_scores_are_bounded(
        statuses in proptest::collection::vec(any_status(), 3),
        counts in proptest::collection::vec(0..10_000u64, 3),
        threat in 0.0..=1.0f64,
    ) {
        let results = BackendKind::ALL
            .iter()
            .zip(statuses.iter().zip(&counts))
            .map(|(kind, (status, n))| result(*kind, *status, *n, threat))
            .collect();
        let report = CorrelationEngine::default().correlate(&investigation(), results).unwrap();

        prop_assert!((0.0..=1.0).contains(&report.risk_score));
        prop_assert!((0.0..=1.0).contains(&report.confidence));
        prop_assert_eq!(report.per_source.len(), 3);
        prop_assert_eq!(
            report.degraded,
            statuses.iter().any(|s| *s != ResultStatus::Completed)
        );
        if statuses.iter().all(|s| *s != ResultStatus::Completed) {
            prop_assert!(report.confidence <= 0.05);
        }
    }

    #[test]
    fn prop_risk_is_monotonic_in_each_source(
        base in proptest::collection::vec(0..500u64, 3),
        bump in 1..500u64,
        threat in 0.0..0.9f64,
        which in 0..3usize,
    ) {
        let engine = CorrelationEngine::default();
        let build = |counts: &[u64], threat: f64| {
            BackendKind::ALL
                .iter()
                .zip(counts)
                .map(|(kind, n)| result(*kind, ResultStatus::Completed, *n, threat))
                .collect::<Vec<_>>()
        };

        let before = engine.correlate(&investigation(), build(&base, threat)).unwrap();
        let mut bumped = base.clone();
        bumped[which] += bump;
        let threat_after = if which == 0 { threat + 0.1 } else { threat };
        let after = engine.correlate(&investigation(), build(&bumped, threat_after)).unwrap();

        prop_assert!(after.risk_score >= before.risk_score);
    }

    #[test]
    fn prop_each_degraded_source_lowers_confidence(degraded in 1..=3usize, status in any_status()) {
        prop_assume!(status != ResultStatus::Completed);
        let engine = CorrelationEngine::default();
        let build = |bad: usize| {
            BackendKind::ALL
                .iter()
                .enumerate()
                .map(|(i, kind)| {
                    let s = if i < bad { status } else { ResultStatus::Completed };
                    result(*kind, s, 1, 0.5)
                })
                .collect::<Vec<_>>()
        };

        let fewer = engine.correlate(&investigation(), build(degraded - 1)).unwrap();
        let more = engine.correlate(&investigation(), build(degraded)).unwrap();
        prop_assert!(more.confidence < fewer.confidence);
    }

    #[test]
    fn prop_valid_policies_penalize_every_degraded_source(
        policy in any_policy(),
        statuses in proptest::collection::vec(any_status(), 3),
    ) {
        prop_assume!(policy.validate().is_ok());
        let engine = CorrelationEngine::new(policy);
        let build = |bad: usize| {
            BackendKind::ALL
                .iter()
                .zip(&statuses)
                .enumerate()
                .map(|(i, (kind, status))| {
                    let s = if i < bad { *status } else { ResultStatus::Completed };
                    result(*kind, s, 1, 0.5)
                })
                .collect::<Vec<_>>()
        };

        for bad in 1..=3 {
            if statuses[bad - 1] == ResultStatus::Completed {
                continue;
            }
            let fewer = engine.correlate(&investigation(), build(bad - 1)).unwrap();
            let more = engine.correlate(&investigation(), build(bad)).unwrap();
            prop_assert!(more.degraded);
            prop_assert!(
                more.confidence < fewer.confidence,
                "{} !< {} with {} degraded",
                more.confidence,
                fewer.confidence,
                bad
            );
        }
    }
}
