//! Dispatch Coordinator
//!
//! Fans an investigation out to every configured adapter and waits for all
//! of them (full barrier). Each adapter runs on its own task under its own
//! deadline; the Coordinator adds a grace period on top as a safety net for
//! adapters that do not honour their deadline.
//!
//! Guarantees:
//! - exactly one `BackendResult` per adapter, ordered by `BackendKind`
//! - one `submit` per adapter per investigation, no retries
//! - a panicking or cancelled adapter task yields `Failed`, never an error

use crate::adapter::BackendAdapter;
use crate::error::{ConfigError, OrchestraError};
use crate::types::{BackendKind, BackendResult, Investigation};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError};
use tokio::time::Instant;
use tracing::Instrument;

/// Extra time granted past an adapter's own deadline before it is abandoned
pub const DEFAULT_GRACE: Duration = Duration::from_millis(250);

/// Concurrent fan-out over a fixed set of adapters
#[derive(Clone)]
pub struct DispatchCoordinator {
    adapters: Vec<Arc<dyn BackendAdapter>>,
    grace: Duration,
}

impl DispatchCoordinator {
    /// Create a coordinator
    ///
    /// # Errors
    /// Returns a configuration error if no adapters are given or two adapters
    /// share a backend kind
    pub fn new(mut adapters: Vec<Arc<dyn BackendAdapter>>) -> Result<Self, OrchestraError> {
        if adapters.is_empty() {
            return Err(ConfigError::Invalid("no backend adapters configured".into()).into());
        }
        let mut seen = BTreeSet::new();
        for adapter in &adapters {
            if !seen.insert(adapter.kind()) {
                return Err(ConfigError::Invalid(format!(
                    "more than one adapter for backend {}",
                    adapter.kind()
                ))
                .into());
            }
        }
        adapters.sort_by_key(|adapter| adapter.kind());
        Ok(Self {
            adapters,
            grace: DEFAULT_GRACE,
        })
    }

    /// Override the grace period
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Configured adapters, ordered by kind
    #[inline]
    #[must_use]
    pub fn adapters(&self) -> &[Arc<dyn BackendAdapter>] {
        &self.adapters
    }

    /// Configured backend kinds
    #[must_use]
    pub fn kinds(&self) -> Vec<BackendKind> {
        self.adapters.iter().map(|adapter| adapter.kind()).collect()
    }

    /// Run one call per adapter and wait for all of them
    ///
    /// Dropping the returned future aborts every in-flight adapter task.
    pub async fn dispatch(&self, investigation: &Investigation) -> Vec<BackendResult> {
        let span = tracing::info_span!(
            "dispatch",
            handle = %investigation.target_handle(),
            operation_id = %investigation.operation_id(),
        );
        self.fan_out(investigation).instrument(span).await
    }

    async fn fan_out(&self, investigation: &Investigation) -> Vec<BackendResult> {
        let started = Instant::now();
        let mut guard = TaskGuard::default();
        let mut pending = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            let kind = adapter.kind();
            let timeout = adapter.timeout();
            let deadline = started + timeout;
            let hard_deadline = deadline + self.grace;

            let adapter = Arc::clone(adapter);
            let target = investigation.target().to_string();
            let operation_id = investigation.operation_id().clone();
            let task = tokio::spawn(
                async move {
                    tokio::time::timeout_at(
                        hard_deadline,
                        adapter.submit(&target, &operation_id, deadline),
                    )
                    .await
                }
                .in_current_span(),
            );
            guard.track(task.abort_handle());
            pending.push(async move { (kind, timeout, task.await) });
        }

        let mut results: Vec<BackendResult> = join_all(pending)
            .await
            .into_iter()
            .map(|(kind, timeout, joined)| settle(kind, timeout, started, joined))
            .collect();
        guard.disarm();

        results.sort_by_key(BackendResult::source);
        tracing::debug!(
            sources = results.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "dispatch settled"
        );
        results
    }
}

impl std::fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("kinds", &self.kinds())
            .field("grace", &self.grace)
            .finish()
    }
}

type Joined = Result<Result<BackendResult, tokio::time::error::Elapsed>, JoinError>;

fn settle(kind: BackendKind, timeout: Duration, started: Instant, joined: Joined) -> BackendResult {
    match joined {
        Ok(Ok(result)) if result.source() == kind => result,
        Ok(Ok(_)) => {
            tracing::error!(backend = %kind, "adapter reported a different source");
            BackendResult::failed(kind, "adapter reported a different source")
                .with_elapsed(started.elapsed())
        }
        Ok(Err(_)) => {
            tracing::warn!(backend = %kind, "adapter ignored its deadline, abandoned");
            BackendResult::timed_out(kind, timeout).with_elapsed(started.elapsed())
        }
        Err(err) if err.is_panic() => {
            tracing::error!(backend = %kind, "adapter task panicked");
            BackendResult::failed(kind, "adapter panicked").with_elapsed(started.elapsed())
        }
        Err(_) => {
            tracing::warn!(backend = %kind, "adapter task cancelled");
            BackendResult::failed(kind, "adapter cancelled").with_elapsed(started.elapsed())
        }
    }
}

/// Aborts tracked tasks on drop unless disarmed
#[derive(Default)]
struct TaskGuard {
    handles: Vec<AbortHandle>,
}

impl TaskGuard {
    fn track(&mut self, handle: AbortHandle) {
        self.handles.push(handle);
    }

    fn disarm(&mut self) {
        self.handles.clear();
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockBackendAdapter;
    use crate::hasher::hash;
    use crate::types::{OperationId, Priority, ResultStatus};
    use orchestra_link::LinkStats;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn investigation() -> Investigation {
        Investigation::new(
            OperationId::parse("op_1_abcdef").unwrap(),
            "alice",
            hash("alice"),
            Priority::Medium,
        )
    }

    fn completing(kind: BackendKind, findings: usize) -> Arc<dyn BackendAdapter> {
        let mut mock = MockBackendAdapter::new();
        mock.expect_kind().return_const(kind);
        mock.expect_timeout().return_const(Duration::from_secs(5));
        mock.expect_link_stats().return_const(None::<LinkStats>);
        mock.expect_submit()
            .times(1)
            .returning(move |target, _, _| {
                assert_eq!(target, "alice");
                let items = vec![json!({"n": 1}); findings];
                BackendResult::completed(kind, items, findings as u64, BTreeMap::new())
            });
        Arc::new(mock)
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl BackendAdapter for Panicking {
        fn kind(&self) -> BackendKind {
            BackendKind::Crawl
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
        async fn submit(&self, _: &str, _: &OperationId, _: Instant) -> BackendResult {
            panic!("adapter bug")
        }
        fn link_stats(&self) -> Option<LinkStats> {
            None
        }
    }

    struct Stuck {
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl BackendAdapter for Stuck {
        fn kind(&self) -> BackendKind {
            BackendKind::ExternalScan
        }
        fn timeout(&self) -> Duration {
            Duration::from_secs(2)
        }
        async fn submit(&self, _: &str, _: &OperationId, _: Instant) -> BackendResult {
            let _flag = SetOnDrop(Arc::clone(&self.dropped));
            std::future::pending::<()>().await;
            unreachable!()
        }
        fn link_stats(&self) -> Option<LinkStats> {
            None
        }
    }

    #[tokio::test]
    async fn one_call_per_adapter_ordered_by_kind() {
        let coordinator = DispatchCoordinator::new(vec![
            completing(BackendKind::ExternalScan, 3),
            completing(BackendKind::Pattern, 5),
            completing(BackendKind::Crawl, 10),
        ])
        .unwrap();

        let results = coordinator.dispatch(&investigation()).await;
        let kinds: Vec<_> = results.iter().map(BackendResult::source).collect();
        assert_eq!(kinds, BackendKind::ALL.to_vec());
        assert!(results.iter().all(|r| r.status().is_completed()));
        assert_eq!(results[1].findings_count(), 10);
    }

    #[tokio::test]
    async fn panicking_adapter_becomes_failed() {
        let coordinator = DispatchCoordinator::new(vec![
            completing(BackendKind::Pattern, 1),
            Arc::new(Panicking),
        ])
        .unwrap();

        let results = coordinator.dispatch(&investigation()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status(), ResultStatus::Completed);
        assert_eq!(results[1].status(), ResultStatus::Failed);
        assert_eq!(results[1].raw()["reason"], "adapter panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_ignoring_deadline_is_abandoned() {
        let dropped = Arc::new(AtomicBool::new(false));
        let coordinator = DispatchCoordinator::new(vec![
            completing(BackendKind::Pattern, 1),
            Arc::new(Stuck {
                dropped: Arc::clone(&dropped),
            }),
        ])
        .unwrap()
        .with_grace(Duration::from_millis(100));

        let results = coordinator.dispatch(&investigation()).await;
        assert_eq!(results[1].status(), ResultStatus::TimedOut);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_dispatch_aborts_tasks() {
        let dropped = Arc::new(AtomicBool::new(false));
        let coordinator = DispatchCoordinator::new(vec![Arc::new(Stuck {
            dropped: Arc::clone(&dropped),
        }) as Arc<dyn BackendAdapter>])
        .unwrap();

        let inv = investigation();
        let outcome =
            tokio::time::timeout(Duration::from_millis(50), coordinator.dispatch(&inv)).await;
        assert!(outcome.is_err());
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn rejects_duplicate_kinds() {
        let err = DispatchCoordinator::new(vec![
            Arc::new(Panicking) as Arc<dyn BackendAdapter>,
            Arc::new(Panicking),
        ])
        .unwrap_err();
        assert!(matches!(err, OrchestraError::Config(_)));
        assert!(DispatchCoordinator::new(Vec::new()).is_err());
    }
}
