//! Per-metric fetch orchestration
//!
//! One [`FetchOrchestrator`] is created per [`Metric`]. It keeps a
//! [`FetchState`] for every selected repository and drives each one through
//! its lifecycle:
//!
//! ```text
//! Idle ──reconcile──▶ Loading ──ok──────────▶ Ready(series)
//!                        │  └──hard error───▶ Failed(message)
//!                        └──202──▶ Computing ──poll interval──▶ fetch again
//! ```
//!
//! Every repository has at most one driver task. Removing the repository
//! from the selection aborts that task (including a pending poll timer or an
//! in-flight request) before its state is deleted, and every state write
//! checks an epoch so late results for removed or re-added repositories are
//! dropped.

use crate::github::StatsSource;
use crate::repo::{RepoKey, RepoRef};
use crate::series::{Metric, Series};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fetch state of one repository for one metric
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Loading,
    /// GitHub is still materializing the statistics; a retry is scheduled
    Computing,
    Ready(Series),
    Failed(String),
}

impl FetchState {
    /// Still waiting on GitHub
    pub fn is_pending(&self) -> bool {
        matches!(self, FetchState::Loading | FetchState::Computing)
    }

    pub fn series(&self) -> Option<&Series> {
        match self {
            FetchState::Ready(series) => Some(series),
            _ => None,
        }
    }

    // Idle and Failed entries are fetched again on the next reconcile
    fn needs_fetch(&self) -> bool {
        matches!(self, FetchState::Idle | FetchState::Failed(_))
    }
}

/// A spawned driver task, aborted when cancelled or dropped
struct TaskHandle(JoinHandle<()>);

impl TaskHandle {
    fn cancel(&self) {
        self.0.abort();
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Entry {
    repo: RepoRef,
    state: FetchState,
    epoch: u64,
    task: Option<TaskHandle>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<RepoKey, Entry>,
    order: Vec<RepoKey>,
    next_epoch: u64,
    shut_down: bool,
}

struct Shared {
    registry: Mutex<Registry>,
    changes: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Write `state` if the entry still belongs to the task that produced it
    fn apply(&self, key: &RepoKey, epoch: u64, state: FetchState) -> bool {
        {
            let mut registry = self.lock();
            if registry.shut_down {
                return false;
            }
            match registry.entries.get_mut(key) {
                Some(entry) if entry.epoch == epoch => entry.state = state,
                _ => return false,
            }
        }
        self.notify();
        true
    }
}

/// Drives fetches for one metric across the selected repositories
pub struct FetchOrchestrator {
    metric: Metric,
    source: Arc<dyn StatsSource>,
    poll_interval: Duration,
    shared: Arc<Shared>,
}

impl FetchOrchestrator {
    pub fn new(metric: Metric, source: Arc<dyn StatsSource>, poll_interval: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            metric,
            source,
            poll_interval,
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                changes,
            }),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Bring tracked state in line with `selection`.
    ///
    /// Repositories no longer selected are cancelled and forgotten. New
    /// repositories, and selected ones that are `Idle` or `Failed`, start a
    /// fetch. `Loading`, `Computing` and `Ready` entries are left alone.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn reconcile(&self, selection: &[RepoRef]) {
        let mut registry = self.shared.lock();
        if registry.shut_down {
            warn!("Ignoring reconcile on shut down {} orchestrator", self.metric);
            return;
        }

        let wanted: HashSet<RepoKey> = selection.iter().map(RepoRef::key).collect();
        let removed: Vec<RepoKey> = registry
            .entries
            .keys()
            .filter(|key| !wanted.contains(*key))
            .cloned()
            .collect();

        for key in removed {
            if let Some(task) = registry.entries.get_mut(&key).and_then(|e| e.task.take()) {
                task.cancel();
            }
            registry.entries.remove(&key);
            debug!("{}: stopped tracking {}", self.metric, key);
        }

        let mut order = Vec::with_capacity(selection.len());
        for repo in selection {
            let key = repo.key();
            if order.contains(&key) {
                continue;
            }
            order.push(key.clone());

            let needs_fetch = registry
                .entries
                .get(&key)
                .map_or(true, |entry| entry.state.needs_fetch());
            if needs_fetch {
                self.start(&mut registry, key, repo.clone());
            }
        }
        registry.order = order;
        drop(registry);

        self.shared.notify();
    }

    fn start(&self, registry: &mut Registry, key: RepoKey, repo: RepoRef) {
        registry.next_epoch += 1;
        let epoch = registry.next_epoch;

        info!("{}: fetching {}", self.metric, repo);
        let task = tokio::spawn(drive(
            self.metric,
            repo.clone(),
            key.clone(),
            epoch,
            Arc::clone(&self.source),
            Arc::clone(&self.shared),
            self.poll_interval,
        ));

        // Replacing an entry drops (and aborts) its previous task
        registry.entries.insert(
            key,
            Entry {
                repo,
                state: FetchState::Loading,
                epoch,
                task: Some(TaskHandle(task)),
            },
        );
    }

    /// Current state per repository, in selection order
    pub fn snapshot(&self) -> Vec<(RepoRef, FetchState)> {
        let registry = self.shared.lock();
        registry
            .order
            .iter()
            .filter_map(|key| registry.entries.get(key))
            .map(|entry| (entry.repo.clone(), entry.state.clone()))
            .collect()
    }

    /// State of a single repository, if tracked
    pub fn state(&self, repo: &RepoRef) -> Option<FetchState> {
        self.shared
            .lock()
            .entries
            .get(&repo.key())
            .map(|entry| entry.state.clone())
    }

    /// Number of repositories currently tracked
    pub fn tracked(&self) -> usize {
        self.shared.lock().entries.len()
    }

    /// Receiver that changes whenever any state changes
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Wait until `done` holds for the current snapshot
    pub async fn wait_until<F>(&self, mut done: F)
    where
        F: FnMut(&[(RepoRef, FetchState)]) -> bool,
    {
        let mut changes = self.subscribe();
        loop {
            if done(&self.snapshot()) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait until no repository is loading or computing
    pub async fn wait_settled(&self) {
        self.wait_until(|snapshot| snapshot.iter().all(|(_, state)| !state.is_pending()))
            .await
    }

    /// Cancel every task and forget all state; later reconciles are ignored
    pub fn shutdown(&self) {
        let mut registry = self.shared.lock();
        if registry.shut_down {
            return;
        }
        registry.shut_down = true;
        for entry in registry.entries.values_mut() {
            if let Some(task) = entry.task.take() {
                task.cancel();
            }
        }
        registry.entries.clear();
        registry.order.clear();
        drop(registry);

        debug!("{}: orchestrator shut down", self.metric);
        self.shared.notify();
    }
}

impl Drop for FetchOrchestrator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn drive(
    metric: Metric,
    repo: RepoRef,
    key: RepoKey,
    epoch: u64,
    source: Arc<dyn StatsSource>,
    shared: Arc<Shared>,
    poll_interval: Duration,
) {
    loop {
        let next = match source.fetch(metric, &repo).await {
            Ok(series) => {
                debug!("{}: {} ready with {} weeks", metric, repo, series.len());
                FetchState::Ready(series)
            }
            Err(e) if e.is_retryable() => {
                debug!(
                    "{}: {} still computing, retrying in {:?}",
                    metric, repo, poll_interval
                );
                FetchState::Computing
            }
            Err(e) => {
                warn!("{}: failed to fetch {}: {}", metric, repo, e);
                FetchState::Failed(e.to_string())
            }
        };

        let computing = next == FetchState::Computing;
        if !shared.apply(&key, epoch, next) {
            debug!("{}: discarding stale result for {}", metric, repo);
            return;
        }
        if !computing {
            return;
        }

        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::series::WeeklyPoint;
    use async_trait::async_trait;
    use chrono::{Duration as WeekDuration, TimeZone, Utc};
    use std::collections::VecDeque;
    use tokio::time::Instant;

    const POLL: Duration = Duration::from_secs(3);

    #[derive(Clone)]
    enum Reply {
        Data(Series),
        Computing,
        Fail(&'static str),
        Slow(Duration, Series),
    }

    /// Replies per repository in order; the last reply repeats forever
    #[derive(Default)]
    struct ScriptedSource {
        script: Mutex<HashMap<RepoKey, VecDeque<Reply>>>,
        calls: Mutex<HashMap<RepoKey, usize>>,
    }

    impl ScriptedSource {
        fn with(self, repo: &RepoRef, replies: Vec<Reply>) -> Self {
            self.script.lock().unwrap().insert(repo.key(), replies.into());
            self
        }

        fn calls(&self, repo: &RepoRef) -> usize {
            self.calls.lock().unwrap().get(&repo.key()).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl StatsSource for ScriptedSource {
        async fn fetch(&self, _metric: Metric, repo: &RepoRef) -> Result<Series> {
            *self.calls.lock().unwrap().entry(repo.key()).or_default() += 1;
            let reply = {
                let mut script = self.script.lock().unwrap();
                let queue = script.get_mut(&repo.key()).expect("unscripted repository");
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue.front().cloned().unwrap()
                }
            };

            match reply {
                Reply::Data(series) => Ok(series),
                Reply::Computing => Err(Error::StatsComputing),
                Reply::Fail(message) => Err(Error::GitHubError(message.to_string())),
                Reply::Slow(delay, series) => {
                    tokio::time::sleep(delay).await;
                    Ok(series)
                }
            }
        }
    }

    fn repo(s: &str) -> RepoRef {
        RepoRef::parse(s).unwrap()
    }

    fn series(values: &[u64]) -> Series {
        let start = Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap();
        Series::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| WeeklyPoint::new(start + WeekDuration::weeks(i as i64), *v))
                .collect(),
        )
    }

    fn orchestrator(source: &Arc<ScriptedSource>) -> FetchOrchestrator {
        let source: Arc<dyn StatsSource> = source.clone();
        FetchOrchestrator::new(Metric::CommitActivity, source, POLL)
    }

    async fn wait_for(orch: &FetchOrchestrator, repo: &RepoRef, want: fn(&FetchState) -> bool) {
        let key = repo.key();
        orch.wait_until(|snapshot| {
            snapshot
                .iter()
                .any(|(r, state)| r.key() == key && want(state))
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_becomes_ready() {
        let a = repo("a/one");
        let source = Arc::new(ScriptedSource::default().with(&a, vec![Reply::Data(series(&[1, 2]))]));
        let orch = orchestrator(&source);

        orch.reconcile(&[a.clone()]);
        assert_eq!(orch.state(&a), Some(FetchState::Loading));

        orch.wait_settled().await;
        assert_eq!(orch.state(&a), Some(FetchState::Ready(series(&[1, 2]))));
        assert_eq!(source.calls(&a), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_computing_retries_after_one_poll_interval() {
        let a = repo("vercel/next.js");
        let source = Arc::new(
            ScriptedSource::default().with(&a, vec![Reply::Computing, Reply::Data(series(&[5]))]),
        );
        let orch = orchestrator(&source);

        orch.reconcile(&[a.clone()]);
        wait_for(&orch, &a, |s| *s == FetchState::Computing).await;
        let computing_at = Instant::now();

        wait_for(&orch, &a, |s| matches!(s, FetchState::Ready(_))).await;
        let waited = computing_at.elapsed();
        assert!(waited >= POLL && waited < POLL * 2, "waited {:?}", waited);
        assert_eq!(source.calls(&a), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_computing_polls_indefinitely() {
        let a = repo("a/slow");
        let source = Arc::new(ScriptedSource::default().with(&a, vec![Reply::Computing]));
        let orch = orchestrator(&source);

        orch.reconcile(&[a.clone()]);
        tokio::time::sleep(POLL * 5 + POLL / 2).await;

        assert_eq!(orch.state(&a), Some(FetchState::Computing));
        assert_eq!(source.calls(&a), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_while_computing_cancels_retry() {
        let a = repo("a/slow");
        let b = repo("b/fast");
        let source = Arc::new(
            ScriptedSource::default()
                .with(&a, vec![Reply::Computing])
                .with(&b, vec![Reply::Data(series(&[1]))]),
        );
        let orch = orchestrator(&source);

        orch.reconcile(&[a.clone(), b.clone()]);
        wait_for(&orch, &a, |s| *s == FetchState::Computing).await;

        orch.reconcile(&[b.clone()]);
        assert_eq!(orch.state(&a), None);
        assert_eq!(orch.tracked(), 1);

        tokio::time::sleep(POLL * 5).await;
        assert_eq!(source.calls(&a), 1);
        assert_eq!(orch.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_result_for_removed_repo_is_discarded() {
        let a = repo("a/one");
        let source = Arc::new(ScriptedSource::default().with(
            &a,
            vec![
                Reply::Slow(Duration::from_secs(10), series(&[1])),
                Reply::Data(series(&[2])),
            ],
        ));
        let orch = orchestrator(&source);

        orch.reconcile(&[a.clone()]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        orch.reconcile(&[]);
        orch.reconcile(&[a.clone()]);

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(orch.state(&a), Some(FetchState::Ready(series(&[2]))));
        assert_eq!(source.calls(&a), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redundant_reconcile_does_not_refetch() {
        let a = repo("a/one");
        let b = repo("b/two");
        let source = Arc::new(
            ScriptedSource::default()
                .with(&a, vec![Reply::Slow(Duration::from_secs(1), series(&[1]))])
                .with(&b, vec![Reply::Data(series(&[2]))]),
        );
        let orch = orchestrator(&source);

        orch.reconcile(&[a.clone()]);
        orch.reconcile(&[a.clone(), b.clone()]);
        orch.reconcile(&[repo("A/ONE"), b.clone()]);
        orch.wait_settled().await;
        orch.reconcile(&[a.clone(), b.clone()]);
        orch.wait_settled().await;

        assert_eq!(source.calls(&a), 1);
        assert_eq!(source.calls(&b), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_not_retried_until_next_reconcile() {
        let a = repo("a/one");
        let source = Arc::new(
            ScriptedSource::default().with(&a, vec![Reply::Fail("boom"), Reply::Data(series(&[3]))]),
        );
        let orch = orchestrator(&source);

        orch.reconcile(&[a.clone()]);
        orch.wait_settled().await;
        match orch.state(&a) {
            Some(FetchState::Failed(message)) => assert!(message.contains("boom")),
            other => panic!("expected failure, got {:?}", other),
        }

        tokio::time::sleep(POLL * 10).await;
        assert_eq!(source.calls(&a), 1);

        orch.reconcile(&[a.clone()]);
        orch.wait_settled().await;
        assert_eq!(orch.state(&a), Some(FetchState::Ready(series(&[3]))));
        assert_eq!(source.calls(&a), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_isolated_per_repository() {
        let a = repo("a/broken");
        let b = repo("b/fine");
        let source = Arc::new(
            ScriptedSource::default()
                .with(&a, vec![Reply::Fail("network down")])
                .with(&b, vec![Reply::Data(series(&[7]))]),
        );
        let orch = orchestrator(&source);

        orch.reconcile(&[a.clone(), b.clone()]);
        orch.wait_settled().await;

        let snapshot = orch.snapshot();
        assert!(matches!(snapshot[0].1, FetchState::Failed(_)));
        assert_eq!(snapshot[1].1, FetchState::Ready(series(&[7])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_follows_selection_order() {
        let a = repo("a/one");
        let b = repo("b/two");
        let source = Arc::new(
            ScriptedSource::default()
                .with(&a, vec![Reply::Data(series(&[1]))])
                .with(&b, vec![Reply::Data(series(&[2]))]),
        );
        let orch = orchestrator(&source);

        orch.reconcile(&[b.clone(), a.clone()]);
        orch.wait_settled().await;
        let names: Vec<String> = orch.snapshot().iter().map(|(r, _)| r.full_name()).collect();
        assert_eq!(names, vec!["b/two", "a/one"]);

        orch.reconcile(&[a.clone(), b.clone()]);
        let names: Vec<String> = orch.snapshot().iter().map(|(r, _)| r.full_name()).collect();
        assert_eq!(names, vec!["a/one", "b/two"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_all_timers() {
        let a = repo("a/one");
        let b = repo("b/two");
        let source = Arc::new(
            ScriptedSource::default()
                .with(&a, vec![Reply::Computing])
                .with(&b, vec![Reply::Computing]),
        );
        let orch = orchestrator(&source);

        orch.reconcile(&[a.clone(), b.clone()]);
        orch.wait_until(|s| s.iter().all(|(_, state)| *state == FetchState::Computing))
            .await;

        drop(orch);
        tokio::time::sleep(POLL * 5).await;
        assert_eq!(source.calls(&a), 1);
        assert_eq!(source.calls(&b), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_after_shutdown_is_ignored() {
        let a = repo("a/one");
        let source = Arc::new(ScriptedSource::default().with(&a, vec![Reply::Data(series(&[1]))]));
        let orch = orchestrator(&source);

        orch.shutdown();
        orch.reconcile(&[a.clone()]);
        tokio::time::sleep(POLL).await;

        assert_eq!(orch.tracked(), 0);
        assert_eq!(source.calls(&a), 0);
    }
}
