//! # tabmux-scratchpad — persisted worker and orchestration state
//!
//! Each worker and the owning orchestration get a markdown file whose body
//! is free-form but which always ends with a fenced ```json block holding
//! the canonical state. Readers must pick the **last** such block — a file
//! may legitimately contain more than one (e.g. an extracted-data sample
//! followed by the full state).
//!
//! Every operation here is best-effort: a read of a missing or corrupt
//! file returns `None` rather than an error, and a write that fails is
//! logged and returns `false`. In-memory state (owned by `tabmux-workflow`)
//! stays authoritative regardless of what lands on disk.

#![deny(missing_docs)]

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const JSON_FENCE_START: &str = "```json";
const JSON_FENCE_END: &str = "```";
const MAX_WORKER_NAME_LEN: usize = 100;
const DEFAULT_MAX_PROGRESS_ENTRIES: usize = 500;

/// Errors raised internally while resolving a path or parsing a file.
/// Public methods swallow these into `None`/`false`, logging at `warn`.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ScratchpadError {
    /// The worker name failed the path-safety check.
    #[error("invalid worker name: {0}")]
    InvalidName(String),

    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file existed but did not parse as the expected state shape.
    #[error("failed to parse scratchpad state: {0}")]
    Parse(String),
}

/// A worker's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Created but not yet started.
    Init,
    /// Actively running.
    InProgress,
    /// Finished successfully.
    Success,
    /// Finished with a partial result (timeout, stale data, best-effort).
    Partial,
    /// Finished with failure.
    Fail,
}

impl WorkerStatus {
    /// Whether this status is terminal (no further transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Partial | Self::Fail)
    }
}

/// The outcome recorded for one progress-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressResult {
    /// The logged action succeeded.
    Success,
    /// The logged action failed.
    Fail,
    /// The logged action is still running.
    InProgress,
}

/// One entry in a worker's bounded progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    /// The iteration this entry belongs to.
    pub iteration: u32,
    /// Millisecond timestamp the entry was recorded at.
    pub timestamp: u64,
    /// A short description of what was attempted.
    pub action: String,
    /// The outcome of that action.
    pub result: ProgressResult,
    /// An error message, if `result` is `Fail`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Persisted state for one workflow worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    /// The worker's stable id.
    pub worker_id: String,
    /// The worker's display/file-path name.
    pub worker_name: String,
    /// The tab this worker drives, once assigned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<u64>,
    /// The task description assigned to this worker.
    pub task: String,
    /// Current lifecycle status.
    pub status: WorkerStatus,
    /// Current iteration count.
    pub iteration: u32,
    /// Max iterations allowed before giving up, default 5.
    pub max_iterations: u32,
    /// Millisecond timestamp the worker started at.
    pub started_at: u64,
    /// Millisecond timestamp of the worker's last update.
    pub last_updated_at: u64,
    /// Bounded log of progress entries, newest last.
    pub progress_log: Vec<ProgressEntry>,
    /// Opaque data extracted by the worker so far.
    pub extracted_data: serde_json::Value,
    /// Accumulated error messages.
    pub errors: Vec<String>,
}

impl WorkerState {
    /// A freshly initialized worker state.
    pub fn new(worker_id: impl Into<String>, worker_name: impl Into<String>, task: impl Into<String>, now_ms: u64) -> Self {
        Self {
            worker_id: worker_id.into(),
            worker_name: worker_name.into(),
            tab_id: None,
            task: task.into(),
            status: WorkerStatus::Init,
            iteration: 0,
            max_iterations: 5,
            started_at: now_ms,
            last_updated_at: now_ms,
            progress_log: Vec::new(),
            extracted_data: serde_json::Value::Null,
            errors: Vec::new(),
        }
    }
}

/// Aggregate orchestration lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestrationStatus {
    /// Workers are being initialized.
    Init,
    /// At least one worker is still running.
    Running,
    /// Every worker finished SUCCESS or PARTIAL, with at least one SUCCESS...
    /// see `tabmux-workflow` for the exact derivation rule.
    Completed,
    /// Every worker is done, with a mix of outcomes.
    Partial,
    /// Every worker failed.
    Failed,
}

/// A worker's entry in the orchestration-level summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationWorkerSummary {
    /// The worker's id.
    pub worker_id: String,
    /// The worker's name.
    pub worker_name: String,
    /// The worker's current status.
    pub status: WorkerStatus,
    /// A short human-readable summary of the worker's result, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_summary: Option<String>,
}

/// Persisted state for one orchestration (a parallel multi-worker job).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    /// The orchestration's id.
    pub orchestration_id: String,
    /// The high-level task description.
    pub task: String,
    /// Current aggregate status.
    pub status: OrchestrationStatus,
    /// Millisecond timestamp of creation.
    pub created_at: u64,
    /// Millisecond timestamp of the last update.
    pub updated_at: u64,
    /// Per-worker summaries.
    pub workers: Vec<OrchestrationWorkerSummary>,
    /// Count of workers that finished SUCCESS or PARTIAL.
    pub completed_workers: u32,
    /// Count of workers that finished FAIL.
    pub failed_workers: u32,
}

/// `true` iff `name` is safe to use as a scratchpad file name component:
/// non-empty, at most 100 code points, no path separators, no `..`, no
/// control characters, and only alphanumeric/`_`/`-` characters (Unicode
/// letters included, so non-Latin worker names are fine).
pub fn validate_worker_name(name: &str) -> Result<(), ScratchpadError> {
    if name.is_empty() || name.chars().count() > MAX_WORKER_NAME_LEN {
        return Err(ScratchpadError::InvalidName(name.to_owned()));
    }
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(ScratchpadError::InvalidName(name.to_owned()));
    }
    for c in name.chars() {
        if (c as u32) < 0x20 {
            return Err(ScratchpadError::InvalidName(name.to_owned()));
        }
        if !(c.is_alphanumeric() || c == '_' || c == '-') {
            return Err(ScratchpadError::InvalidName(name.to_owned()));
        }
    }
    Ok(())
}

/// Scans `text` for fenced ```json blocks and returns the **last** one
/// that parses successfully, ignoring any that don't.
fn parse_last_json_block(text: &str) -> Option<serde_json::Value> {
    let mut last = None;
    let mut cursor = 0usize;
    while let Some(rel_start) = text[cursor..].find(JSON_FENCE_START) {
        let body_start = cursor + rel_start + JSON_FENCE_START.len();
        let Some(rel_end) = text[body_start..].find(JSON_FENCE_END) else {
            break;
        };
        let body_end = body_start + rel_end;
        let body = text[body_start..body_end].trim();
        if let Ok(value) = serde_json::from_str(body) {
            last = Some(value);
        }
        cursor = body_end + JSON_FENCE_END.len();
    }
    last
}

fn render_markdown<T: Serialize>(heading: &str, state: &T) -> String {
    let json = serde_json::to_string_pretty(state).unwrap_or_else(|_| "{}".to_owned());
    format!("# {heading}\n\nGenerated by tabmux. Do not edit the fenced block by hand.\n\n```json\n{json}\n```\n")
}

/// Filesystem-backed store for worker and orchestration scratchpads.
pub struct ScratchpadStore {
    base_dir: PathBuf,
    max_progress_entries: usize,
}

impl ScratchpadStore {
    /// Build a store rooted at `base_dir`, using the spec default of 500
    /// retained progress-log entries per worker.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_progress_entries: DEFAULT_MAX_PROGRESS_ENTRIES,
        }
    }

    /// Build a store with a custom progress-log retention cap.
    pub fn with_max_progress_entries(base_dir: impl Into<PathBuf>, max_progress_entries: usize) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_progress_entries,
        }
    }

    /// The path a worker's scratchpad would live at, if `name` is valid.
    pub fn worker_path(&self, name: &str) -> Result<PathBuf, ScratchpadError> {
        validate_worker_name(name)?;
        Ok(self.base_dir.join(format!("worker-{name}.md")))
    }

    /// The path the orchestration scratchpad lives at.
    pub fn orchestration_path(&self) -> PathBuf {
        self.base_dir.join("orchestration.md")
    }

    async fn ensure_base_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await
    }

    /// Overwrite the scratchpad for worker `name`. Returns `false` (and
    /// logs) on an invalid name or I/O failure without panicking.
    pub async fn write_worker(&self, name: &str, state: &WorkerState) -> bool {
        let path = match self.worker_path(name) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "refusing to write scratchpad for unsafe worker name");
                return false;
            }
        };
        if let Err(e) = self.ensure_base_dir().await {
            tracing::warn!(error = %e, "failed to create scratchpad base dir");
            return false;
        }
        let markdown = render_markdown(&format!("Worker: {}", state.worker_name), state);
        match tokio::fs::write(&path, markdown).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to write worker scratchpad");
                false
            }
        }
    }

    /// Read back worker `name`'s scratchpad, or `None` if it is missing,
    /// unsafe to name, or fails to parse.
    pub async fn read_worker(&self, name: &str) -> Option<WorkerState> {
        let path = self.worker_path(name).ok()?;
        read_state_file(&path).await
    }

    /// Append one entry to worker `name`'s progress log, truncating from
    /// the head once the retention cap is exceeded. No-op (returns
    /// `false`) if the worker has no existing scratchpad.
    pub async fn add_progress_entry(
        &self,
        name: &str,
        action: impl Into<String>,
        result: ProgressResult,
        error: Option<String>,
        now_ms: u64,
    ) -> bool {
        let Some(mut state) = self.read_worker(name).await else {
            return false;
        };
        let iteration = state.progress_log.len() as u32 + 1;
        state.progress_log.push(ProgressEntry {
            iteration,
            timestamp: now_ms,
            action: action.into(),
            result,
            error,
        });
        if state.progress_log.len() > self.max_progress_entries {
            let excess = state.progress_log.len() - self.max_progress_entries;
            state.progress_log.drain(0..excess);
        }
        state.last_updated_at = now_ms;
        self.write_worker(name, &state).await
    }

    /// Overwrite the orchestration-level scratchpad.
    pub async fn write_orchestration(&self, state: &OrchestrationState) -> bool {
        if let Err(e) = self.ensure_base_dir().await {
            tracing::warn!(error = %e, "failed to create scratchpad base dir");
            return false;
        }
        let markdown = render_markdown(&format!("Orchestration: {}", state.orchestration_id), state);
        match tokio::fs::write(self.orchestration_path(), markdown).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to write orchestration scratchpad");
                false
            }
        }
    }

    /// Read back the orchestration-level scratchpad, or `None` if missing
    /// or unparseable.
    pub async fn read_orchestration(&self) -> Option<OrchestrationState> {
        read_state_file(&self.orchestration_path()).await
    }

    /// Delete every file under the base directory. Best-effort: logs and
    /// returns `false` on failure, never panics.
    pub async fn cleanup(&self) -> bool {
        match tokio::fs::remove_dir_all(&self.base_dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!(error = %e, "scratchpad cleanup failed");
                false
            }
        }
    }
}

async fn read_state_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let contents = tokio::fs::read_to_string(path).await.ok()?;
    let value = parse_last_json_block(&contents)?;
    serde_json::from_value(value).ok()
}
