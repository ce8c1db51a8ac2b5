//! # tabmux-workflow — parallel multi-worker workflow engine
//!
//! Initializes N parallel workers for one orchestration job, tracks their
//! progress, and aggregates completion through a single authoritative
//! in-memory counter guarded by one completion lock. The persisted
//! scratchpad mirror ([`tabmux_scratchpad`]) is a write-behind snapshot
//! only; correctness lives in [`InMemoryWorkflowState`].

#![deny(missing_docs)]

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tabmux_core::{CoreConfig, DurationMs, OrchestrationId, SessionId, TabId, WorkerId};
use tabmux_scratchpad::{
    OrchestrationState, OrchestrationStatus, OrchestrationWorkerSummary, ProgressResult,
    ScratchpadStore, WorkerState, WorkerStatus,
};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Errors raised by the workflow engine.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// No orchestration exists with the given id.
    #[error("orchestration not found: {0}")]
    OrchestrationNotFound(OrchestrationId),

    /// No worker with that id belongs to the orchestration.
    #[error("worker not found: {0}")]
    WorkerNotFound(WorkerId),

    /// A session-manager or page-pool collaborator call failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

/// Creates a worker's tab and, best-effort, bridges auth state and
/// navigates it. Implemented by whatever owns real session/tab creation
/// (outside this crate's scope); failures to navigate are expected to be
/// swallowed by the implementation, since init must not fail just because
/// a page didn't load.
#[async_trait]
pub trait SessionManager: Send + Sync {
    /// Materialize a worker's tab inside `session`, optionally sharing
    /// cookies from the session and navigating to `target_url`.
    async fn create_worker(
        &self,
        session: &SessionId,
        worker_id: &WorkerId,
        worker_name: &str,
        share_cookies: bool,
        target_url: Option<&str>,
        tab: TabId,
    ) -> Result<(), WorkflowError>;

    /// Tear down a worker's tab.
    async fn delete_worker(&self, session: &SessionId, worker_id: &WorkerId) -> Result<(), WorkflowError>;
}

/// Batch page acquisition, so bulk workflow init doesn't create pages one
/// at a time.
#[async_trait]
pub trait PagePool: Send + Sync {
    /// Acquire `n` fresh tabs in a single call.
    async fn acquire_batch(&self, n: usize) -> Result<Vec<TabId>, WorkflowError>;
}

/// One step of a workflow definition: a worker to spin up.
#[derive(Debug, Clone)]
pub struct WorkerDef {
    /// The worker's id.
    pub worker_id: WorkerId,
    /// The worker's name (also its scratchpad file-name component).
    pub worker_name: String,
    /// URL to navigate the worker's tab to, if any.
    pub url: Option<String>,
    /// The task description assigned to this worker.
    pub task: String,
    /// A human-readable description of what counts as success.
    pub success_criteria: Option<String>,
    /// Whether to bridge the session's cookies into this worker's tab.
    pub share_cookies: bool,
}

/// A workflow definition: N parallel workers plus timeout policy.
#[derive(Debug, Clone)]
pub struct WorkflowDef {
    /// Caller-supplied orchestration id; generated if `None`.
    pub id: Option<OrchestrationId>,
    /// A human-readable workflow name.
    pub name: String,
    /// The workers to create.
    pub steps: Vec<WorkerDef>,
    /// Per-worker absolute timeout. Defaults to `CoreConfig::worker_timeout_ms`.
    pub timeout: Option<DurationMs>,
    /// Consecutive no-change iterations before the stale-data circuit
    /// breaker fires. Defaults to `CoreConfig::max_stale_iterations`.
    pub max_stale_iterations: Option<u32>,
    /// Whole-workflow timeout. Defaults to `CoreConfig::global_timeout_ms`.
    pub global_timeout_ms: Option<DurationMs>,
}

struct WorkerRuntime {
    worker_id: WorkerId,
    worker_name: String,
    status: WorkerStatus,
    result_summary: Option<String>,
    last_data_hash: Option<u64>,
    stale_count: u32,
    timeout_handle: Option<JoinHandle<()>>,
}

/// The authoritative in-memory twin of one orchestration's state. The
/// scratchpad file is a snapshot of this, never the other way around.
struct InMemoryWorkflowState {
    orchestration_id: OrchestrationId,
    session: SessionId,
    task: String,
    created_at: u64,
    workers: HashMap<WorkerId, WorkerRuntime>,
    completed: u32,
    failed: u32,
    global_timeout_handle: Option<JoinHandle<()>>,
}

#[derive(PartialEq, Eq)]
enum Category {
    Pending,
    Completed,
    Fail,
}

fn category(status: WorkerStatus) -> Category {
    match status {
        WorkerStatus::Fail => Category::Fail,
        WorkerStatus::Success | WorkerStatus::Partial => Category::Completed,
        WorkerStatus::Init | WorkerStatus::InProgress => Category::Pending,
    }
}

/// Applies one worker's completion to the counters. The single place that
/// implements the idempotent / transition-adjusting counter rules: calling
/// this twice with the same terminal status never double-counts, and
/// flipping a worker's category (e.g. SUCCESS -> FAIL) moves it between
/// counters rather than double-booking it.
fn apply_completion(wf: &mut InMemoryWorkflowState, worker_id: &WorkerId, new_status: WorkerStatus, summary: Option<String>) {
    let Some(worker) = wf.workers.get_mut(worker_id) else {
        return;
    };
    let previous = worker.status;
    let was_already_completed = previous.is_terminal();
    worker.status = new_status;
    worker.result_summary = summary;

    if !was_already_completed {
        match category(new_status) {
            Category::Completed => wf.completed += 1,
            Category::Fail => wf.failed += 1,
            Category::Pending => {}
        }
    } else {
        match (category(previous), category(new_status)) {
            (Category::Completed, Category::Fail) => {
                wf.completed -= 1;
                wf.failed += 1;
            }
            (Category::Fail, Category::Completed) => {
                wf.failed -= 1;
                wf.completed += 1;
            }
            _ => {}
        }
    }
}

fn overall_status(wf: &InMemoryWorkflowState) -> OrchestrationStatus {
    let total = wf.workers.len() as u32;
    let done = wf.completed + wf.failed;
    if total == 0 {
        return OrchestrationStatus::Init;
    }
    if done == 0 {
        let any_started = wf
            .workers
            .values()
            .any(|w| !matches!(w.status, WorkerStatus::Init));
        return if any_started { OrchestrationStatus::Running } else { OrchestrationStatus::Init };
    }
    if done < total {
        return OrchestrationStatus::Running;
    }
    if wf.failed == total {
        OrchestrationStatus::Failed
    } else if wf.completed == total {
        OrchestrationStatus::Completed
    } else {
        OrchestrationStatus::Partial
    }
}

fn snapshot(wf: &InMemoryWorkflowState, now_ms: u64) -> OrchestrationState {
    OrchestrationState {
        orchestration_id: wf.orchestration_id.as_str().to_owned(),
        task: wf.task.clone(),
        status: overall_status(wf),
        created_at: wf.created_at,
        updated_at: now_ms,
        workers: wf
            .workers
            .values()
            .map(|w| OrchestrationWorkerSummary {
                worker_id: w.worker_id.as_str().to_owned(),
                worker_name: w.worker_name.clone(),
                status: w.status,
                result_summary: w.result_summary.clone(),
            })
            .collect(),
        completed_workers: wf.completed,
        failed_workers: wf.failed,
    }
}

fn hash_extracted_data(data: &serde_json::Value) -> u64 {
    let rendered = data.to_string();
    let mut hasher = DefaultHasher::new();
    rendered.len().hash(&mut hasher);
    rendered.chars().take(64).collect::<String>().hash(&mut hasher);
    hasher.finish()
}

struct Shared {
    state: Mutex<HashMap<OrchestrationId, InMemoryWorkflowState>>,
    scratchpad: Arc<ScratchpadStore>,
    sessions: Arc<dyn SessionManager>,
    pages: Arc<dyn PagePool>,
    config: CoreConfig,
}

/// Handle to the workflow engine. Cheap to clone; every clone shares the
/// same underlying orchestration table.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<Shared>,
}

/// Aggregate results of a finished (or in-progress) orchestration.
#[derive(Debug, Clone)]
pub struct WorkflowResults {
    /// The orchestration id.
    pub orchestration_id: OrchestrationId,
    /// Per-worker final state, as read from the scratchpad.
    pub workers: Vec<WorkerState>,
    /// Count of workers that finished SUCCESS or PARTIAL.
    pub completed: u32,
    /// Count of workers that finished FAIL.
    pub failed: u32,
    /// Elapsed time since the orchestration was created.
    pub duration: DurationMs,
}

impl WorkflowEngine {
    /// Build an engine over the given collaborators and config.
    pub fn new(
        scratchpad: Arc<ScratchpadStore>,
        sessions: Arc<dyn SessionManager>,
        pages: Arc<dyn PagePool>,
        config: CoreConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Shared {
                state: Mutex::new(HashMap::new()),
                scratchpad,
                sessions,
                pages,
                config,
            }),
        }
    }

    /// Initialize a new orchestration: acquire pages in one batch, create
    /// every worker, seed its scratchpad, and arm the per-worker and
    /// global timeouts.
    pub async fn init_workflow(
        &self,
        session: &SessionId,
        def: WorkflowDef,
        now_ms: u64,
    ) -> Result<OrchestrationId, WorkflowError> {
        let orchestration_id = def.id.unwrap_or_else(|| {
            OrchestrationId::new(format!("orch-{now_ms}-{}", fastrand_like(def.steps.len())))
        });

        let tabs = self.inner.pages.acquire_batch(def.steps.len()).await?;

        let mut workers = HashMap::new();
        for (step, tab) in def.steps.iter().zip(tabs.into_iter()) {
            // Navigation/cookie-bridging failures are non-fatal to init —
            // the worker still exists, it just might not have a loaded page.
            if let Err(e) = self
                .inner
                .sessions
                .create_worker(
                    session,
                    &step.worker_id,
                    &step.worker_name,
                    step.share_cookies,
                    step.url.as_deref(),
                    tab,
                )
                .await
            {
                tracing::warn!(worker = %step.worker_id, error = %e, "worker init step failed, continuing");
            }

            let worker_state = WorkerState::new(step.worker_id.as_str(), &step.worker_name, &step.task, now_ms);
            self.inner.scratchpad.write_worker(&step.worker_name, &worker_state).await;

            workers.insert(
                step.worker_id.clone(),
                WorkerRuntime {
                    worker_id: step.worker_id.clone(),
                    worker_name: step.worker_name.clone(),
                    status: WorkerStatus::Init,
                    result_summary: None,
                    last_data_hash: None,
                    stale_count: 0,
                    timeout_handle: None,
                },
            );
        }

        let wf = InMemoryWorkflowState {
            orchestration_id: orchestration_id.clone(),
            session: session.clone(),
            task: def.name.clone(),
            created_at: now_ms,
            workers,
            completed: 0,
            failed: 0,
            global_timeout_handle: None,
        };

        {
            let mut state = self.inner.state.lock().await;
            state.insert(orchestration_id.clone(), wf);
        }

        let worker_timeout = def.timeout.unwrap_or(self.inner.config.worker_timeout_ms);
        let global_timeout = def.global_timeout_ms.unwrap_or(self.inner.config.global_timeout_ms);

        for worker_id in def.steps.iter().map(|s| s.worker_id.clone()) {
            let inner = self.inner.clone();
            let orch_id = orchestration_id.clone();
            let worker_id_for_task = worker_id.clone();
            let handle = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(worker_timeout.as_millis())).await;
                Self::force_worker_timeout(&inner, &orch_id, &worker_id_for_task).await;
            });
            let mut state = self.inner.state.lock().await;
            if let Some(wf) = state.get_mut(&orchestration_id) {
                if let Some(w) = wf.workers.get_mut(&worker_id) {
                    w.timeout_handle = Some(handle);
                }
            }
        }

        let inner = self.inner.clone();
        let orch_id = orchestration_id.clone();
        let global_handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(global_timeout.as_millis())).await;
            Self::force_all_timeout(&inner, &orch_id).await;
        });
        {
            let mut state = self.inner.state.lock().await;
            if let Some(wf) = state.get_mut(&orchestration_id) {
                wf.global_timeout_handle = Some(global_handle);
            }
        }

        Ok(orchestration_id)
    }

    async fn force_worker_timeout(inner: &Arc<Shared>, orch_id: &OrchestrationId, worker_id: &WorkerId) {
        let mut state = inner.state.lock().await;
        let Some(wf) = state.get_mut(orch_id) else {
            return;
        };
        let Some(worker) = wf.workers.get(worker_id) else {
            return;
        };
        if worker.status.is_terminal() {
            return;
        }
        tracing::warn!(orchestration = %orch_id, worker = %worker_id, "worker timed out, forcing PARTIAL");
        apply_completion(wf, worker_id, WorkerStatus::Partial, Some("timeout".to_owned()));
    }

    async fn force_all_timeout(inner: &Arc<Shared>, orch_id: &OrchestrationId) {
        let mut state = inner.state.lock().await;
        let Some(wf) = state.get_mut(orch_id) else {
            return;
        };
        let running: Vec<WorkerId> = wf
            .workers
            .values()
            .filter(|w| !w.status.is_terminal())
            .map(|w| w.worker_id.clone())
            .collect();
        if !running.is_empty() {
            tracing::warn!(orchestration = %orch_id, count = running.len(), "global workflow timeout, forcing remaining workers");
        }
        for worker_id in running {
            apply_completion(wf, &worker_id, WorkerStatus::Partial, Some("timeout".to_owned()));
        }
    }

    /// Report progress for a worker. Detects repeated no-change
    /// `extracted_data` and force-completes the worker as PARTIAL once
    /// the configured stale-iteration cap is reached.
    pub async fn update_worker_progress(
        &self,
        orchestration_id: &OrchestrationId,
        worker_id: &WorkerId,
        action: &str,
        extracted_data: Option<serde_json::Value>,
        now_ms: u64,
    ) -> Result<(), WorkflowError> {
        let worker_name = {
            let state = self.inner.state.lock().await;
            let wf = state
                .get(orchestration_id)
                .ok_or_else(|| WorkflowError::OrchestrationNotFound(orchestration_id.clone()))?;
            let worker = wf
                .workers
                .get(worker_id)
                .ok_or_else(|| WorkflowError::WorkerNotFound(worker_id.clone()))?;
            worker.worker_name.clone()
        };

        let Some(mut worker_state) = self.inner.scratchpad.read_worker(&worker_name).await else {
            return Ok(());
        };
        worker_state.iteration += 1;
        worker_state.last_updated_at = now_ms;
        if let Some(data) = extracted_data.clone() {
            worker_state.extracted_data = data;
        }
        worker_state.status = WorkerStatus::InProgress;
        worker_state.progress_log.push(tabmux_scratchpad::ProgressEntry {
            iteration: worker_state.iteration,
            timestamp: now_ms,
            action: action.to_owned(),
            result: ProgressResult::InProgress,
            error: None,
        });
        if worker_state.progress_log.len() > self.inner.config.max_progress_log_entries {
            let excess = worker_state.progress_log.len() - self.inner.config.max_progress_log_entries;
            worker_state.progress_log.drain(0..excess);
        }
        self.inner.scratchpad.write_worker(&worker_name, &worker_state).await;

        if let Some(data) = extracted_data {
            let hash = hash_extracted_data(&data);
            let mut state = self.inner.state.lock().await;
            let Some(wf) = state.get_mut(orchestration_id) else {
                return Ok(());
            };
            let Some(worker) = wf.workers.get_mut(worker_id) else {
                return Ok(());
            };
            if worker.status.is_terminal() {
                return Ok(());
            }
            if worker.last_data_hash == Some(hash) {
                worker.stale_count += 1;
            } else {
                worker.stale_count = 0;
                worker.last_data_hash = Some(hash);
            }
            if worker.stale_count >= self.inner.config.max_stale_iterations {
                tracing::warn!(orchestration = %orchestration_id, worker = %worker_id, "stale-data circuit breaker tripped");
                apply_completion(
                    wf,
                    worker_id,
                    WorkerStatus::Partial,
                    Some("stale data: no change across consecutive iterations".to_owned()),
                );
            }
        }

        Ok(())
    }

    /// Record a worker's completion, update the shared counters under the
    /// completion lock, and write back an orchestration snapshot.
    /// Idempotent: calling this twice with the same status never
    /// double-counts.
    pub async fn complete_worker(
        &self,
        orchestration_id: &OrchestrationId,
        worker_id: &WorkerId,
        status: WorkerStatus,
        summary: Option<String>,
        data: Option<serde_json::Value>,
        now_ms: u64,
    ) -> Result<(), WorkflowError> {
        let worker_name = {
            let state = self.inner.state.lock().await;
            let wf = state
                .get(orchestration_id)
                .ok_or_else(|| WorkflowError::OrchestrationNotFound(orchestration_id.clone()))?;
            wf.workers
                .get(worker_id)
                .map(|w| w.worker_name.clone())
                .ok_or_else(|| WorkflowError::WorkerNotFound(worker_id.clone()))?
        };

        if let Some(mut worker_state) = self.inner.scratchpad.read_worker(&worker_name).await {
            worker_state.status = status;
            worker_state.last_updated_at = now_ms;
            if let Some(data) = data {
                worker_state.extracted_data = data;
            }
            self.inner.scratchpad.write_worker(&worker_name, &worker_state).await;
        }

        let snap = {
            let mut state = self.inner.state.lock().await;
            let wf = state
                .get_mut(orchestration_id)
                .ok_or_else(|| WorkflowError::OrchestrationNotFound(orchestration_id.clone()))?;

            apply_completion(wf, worker_id, status, summary);

            if let Some(worker) = wf.workers.get_mut(worker_id) {
                if let Some(handle) = worker.timeout_handle.take() {
                    handle.abort();
                }
            }

            snapshot(wf, now_ms)
        };

        if !self.inner.scratchpad.write_orchestration(&snap).await {
            tracing::warn!(orchestration = %orchestration_id, "write-behind of orchestration snapshot failed");
        }

        Ok(())
    }

    /// The most up-to-date status for `orchestration_id`: the in-memory
    /// snapshot if the engine still holds it, falling back to the
    /// persisted scratchpad (e.g. after a restart).
    pub async fn get_orchestration_status(
        &self,
        orchestration_id: &OrchestrationId,
        now_ms: u64,
    ) -> Option<OrchestrationState> {
        let state = self.inner.state.lock().await;
        if let Some(wf) = state.get(orchestration_id) {
            return Some(snapshot(wf, now_ms));
        }
        drop(state);
        self.inner.scratchpad.read_orchestration().await
    }

    /// Collect per-worker final state plus aggregate counts for
    /// `orchestration_id`.
    pub async fn collect_results(&self, orchestration_id: &OrchestrationId, now_ms: u64) -> Result<WorkflowResults, WorkflowError> {
        let (worker_names, completed, failed, created_at) = {
            let state = self.inner.state.lock().await;
            let wf = state
                .get(orchestration_id)
                .ok_or_else(|| WorkflowError::OrchestrationNotFound(orchestration_id.clone()))?;
            (
                wf.workers.values().map(|w| w.worker_name.clone()).collect::<Vec<_>>(),
                wf.completed,
                wf.failed,
                wf.created_at,
            )
        };

        let mut workers = Vec::new();
        for name in worker_names {
            if let Some(w) = self.inner.scratchpad.read_worker(&name).await {
                workers.push(w);
            }
        }

        Ok(WorkflowResults {
            orchestration_id: orchestration_id.clone(),
            workers,
            completed,
            failed,
            duration: DurationMs::from_millis(now_ms.saturating_sub(created_at)),
        })
    }

    /// Delete every worker, cancel every timeout, drop the in-memory state
    /// and wipe the scratchpad directory.
    pub async fn cleanup_workflow(&self, orchestration_id: &OrchestrationId) -> Result<(), WorkflowError> {
        let wf = {
            let mut state = self.inner.state.lock().await;
            state.remove(orchestration_id)
        };
        let Some(mut wf) = wf else {
            return Ok(());
        };

        if let Some(handle) = wf.global_timeout_handle.take() {
            handle.abort();
        }
        for worker in wf.workers.values_mut() {
            if let Some(handle) = worker.timeout_handle.take() {
                handle.abort();
            }
            if let Err(e) = self.inner.sessions.delete_worker(&wf.session, &worker.worker_id).await {
                tracing::warn!(worker = %worker.worker_id, error = %e, "failed to delete worker during cleanup");
            }
        }

        self.inner.scratchpad.cleanup().await;
        Ok(())
    }
}

/// A small, deterministic id-suffix generator. Not cryptographically
/// random — just enough entropy to keep concurrently-created orchestration
/// ids from colliding within the same millisecond, without pulling in a
/// dedicated RNG crate for one call site.
fn fastrand_like(seed: usize) -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::SeqCst) ^ (seed as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct MockSessions;
    #[async_trait]
    impl SessionManager for MockSessions {
        async fn create_worker(
            &self,
            _session: &SessionId,
            _worker_id: &WorkerId,
            _worker_name: &str,
            _share_cookies: bool,
            _target_url: Option<&str>,
            _tab: TabId,
        ) -> Result<(), WorkflowError> {
            Ok(())
        }
        async fn delete_worker(&self, _session: &SessionId, _worker_id: &WorkerId) -> Result<(), WorkflowError> {
            Ok(())
        }
    }

    struct MockPages {
        next: AtomicU64,
    }
    #[async_trait]
    impl PagePool for MockPages {
        async fn acquire_batch(&self, n: usize) -> Result<Vec<TabId>, WorkflowError> {
            Ok((0..n).map(|_| TabId(self.next.fetch_add(1, Ordering::SeqCst))).collect())
        }
    }

    fn def_with_workers(names: &[&str]) -> WorkflowDef {
        WorkflowDef {
            id: None,
            name: "test job".into(),
            steps: names
                .iter()
                .enumerate()
                .map(|(i, name)| WorkerDef {
                    worker_id: WorkerId::new(format!("w{i}")),
                    worker_name: (*name).to_owned(),
                    url: None,
                    task: "do a thing".into(),
                    success_criteria: None,
                    share_cookies: false,
                })
                .collect(),
            timeout: Some(DurationMs::from_secs(60)),
            max_stale_iterations: Some(3),
            global_timeout_ms: Some(DurationMs::from_secs(300)),
        }
    }

    async fn engine() -> (WorkflowEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let scratchpad = Arc::new(ScratchpadStore::new(dir.path()));
        let engine = WorkflowEngine::new(
            scratchpad,
            Arc::new(MockSessions),
            Arc::new(MockPages { next: AtomicU64::new(1) }),
            CoreConfig {
                max_stale_iterations: 3,
                ..CoreConfig::default()
            },
        );
        (engine, dir)
    }

    #[tokio::test]
    async fn completion_accounting_under_mixed_outcomes() {
        let (engine, _dir) = engine().await;
        let session = SessionId::from("S");
        let orch_id = engine.init_workflow(&session, def_with_workers(&["w1", "w2", "w3", "w4", "w5"]), 0).await.unwrap();

        let results = tokio::join!(
            engine.complete_worker(&orch_id, &WorkerId::new("w0"), WorkerStatus::Success, None, None, 10),
            engine.complete_worker(&orch_id, &WorkerId::new("w1"), WorkerStatus::Partial, None, None, 10),
            engine.complete_worker(&orch_id, &WorkerId::new("w2"), WorkerStatus::Fail, None, None, 10),
            engine.complete_worker(&orch_id, &WorkerId::new("w3"), WorkerStatus::Success, None, None, 10),
            engine.complete_worker(&orch_id, &WorkerId::new("w4"), WorkerStatus::Partial, None, None, 10),
        );
        results.0.unwrap();
        results.1.unwrap();
        results.2.unwrap();
        results.3.unwrap();
        results.4.unwrap();

        let status = engine.get_orchestration_status(&orch_id, 20).await.unwrap();
        assert_eq!(status.completed_workers, 4);
        assert_eq!(status.failed_workers, 1);
        assert_eq!(status.status, OrchestrationStatus::Partial);
    }

    #[tokio::test]
    async fn completing_a_worker_twice_does_not_double_count() {
        let (engine, _dir) = engine().await;
        let session = SessionId::from("S");
        let orch_id = engine.init_workflow(&session, def_with_workers(&["w1"]), 0).await.unwrap();
        let worker = WorkerId::new("w0");

        engine.complete_worker(&orch_id, &worker, WorkerStatus::Success, None, None, 10).await.unwrap();
        engine.complete_worker(&orch_id, &worker, WorkerStatus::Success, None, None, 11).await.unwrap();

        let status = engine.get_orchestration_status(&orch_id, 20).await.unwrap();
        assert_eq!(status.completed_workers, 1);
        assert_eq!(status.failed_workers, 0);
        assert_eq!(status.status, OrchestrationStatus::Completed);
    }

    #[tokio::test]
    async fn status_transition_moves_worker_between_counters() {
        let (engine, _dir) = engine().await;
        let session = SessionId::from("S");
        let orch_id = engine.init_workflow(&session, def_with_workers(&["w1"]), 0).await.unwrap();
        let worker = WorkerId::new("w0");

        engine.complete_worker(&orch_id, &worker, WorkerStatus::Success, None, None, 10).await.unwrap();
        engine.complete_worker(&orch_id, &worker, WorkerStatus::Fail, None, None, 11).await.unwrap();

        let status = engine.get_orchestration_status(&orch_id, 20).await.unwrap();
        assert_eq!(status.completed_workers, 0);
        assert_eq!(status.failed_workers, 1);
        assert_eq!(status.status, OrchestrationStatus::Failed);
    }

    #[tokio::test]
    async fn stale_data_circuit_breaker_forces_partial() {
        let (engine, _dir) = engine().await;
        let session = SessionId::from("S");
        let orch_id = engine.init_workflow(&session, def_with_workers(&["w1"]), 0).await.unwrap();
        let worker = WorkerId::new("w0");

        let payload = serde_json::json!({ "x": 1 });
        for i in 0..3 {
            engine
                .update_worker_progress(&orch_id, &worker, "extract", Some(payload.clone()), i)
                .await
                .unwrap();
        }

        let status = engine.get_orchestration_status(&orch_id, 20).await.unwrap();
        let summary = status
            .workers
            .iter()
            .find(|w| w.worker_id == "w0")
            .and_then(|w| w.result_summary.clone())
            .unwrap();
        assert!(summary.contains("stale"));

        // a subsequent explicit completion must not double-count the
        // already-terminal worker.
        engine.complete_worker(&orch_id, &worker, WorkerStatus::Success, None, None, 30).await.unwrap();
        let status = engine.get_orchestration_status(&orch_id, 40).await.unwrap();
        assert_eq!(status.completed_workers + status.failed_workers, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn per_worker_timeout_forces_partial() {
        let (engine, _dir) = engine().await;
        let session = SessionId::from("S");
        let mut def = def_with_workers(&["w1"]);
        def.timeout = Some(DurationMs::from_millis(100));
        def.global_timeout_ms = Some(DurationMs::from_secs(600));
        let orch_id = engine.init_workflow(&session, def, 0).await.unwrap();

        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        let status = engine.get_orchestration_status(&orch_id, 200).await.unwrap();
        assert_eq!(status.status, OrchestrationStatus::Partial);
    }

    #[tokio::test]
    async fn cleanup_removes_scratchpad_and_in_memory_state() {
        let (engine, dir) = engine().await;
        let session = SessionId::from("S");
        let orch_id = engine.init_workflow(&session, def_with_workers(&["w1"]), 0).await.unwrap();

        engine.cleanup_workflow(&orch_id).await.unwrap();

        assert!(engine.get_orchestration_status(&orch_id, 10).await.is_none());
        assert!(!dir.path().join("worker-w1.md").exists());
    }
}
