//! Durable task queue
//!
//! Tasks are leased to workers with a TTL; a worker that crashes or stalls
//! loses its lease and the task becomes leasable again, so delivery is
//! at-least-once. The full queue state lives in a single JSON file under
//! `.vigil/runtime/` and is rewritten atomically (temp file + rename) after
//! every mutation. A task is removed only after reaching a terminal state;
//! nothing is lost silently.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sdk::errors::AgentError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Leased,
    Running,
    Succeeded,
    Failed,
    Retrying,
}

impl TaskState {
    /// Terminal states are never leased again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed)
    }
}

/// How a worker finished an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Attempt succeeded; task is terminal.
    Success,
    /// Transient failure; re-enqueue with backoff while attempts remain.
    Retry,
    /// Unrecoverable failure (e.g. blocked command); task fails now.
    Fatal,
}

/// A unit of queued work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub state: TaskState,

    /// Attempts started so far; incremented when a lease is granted
    pub attempts: u32,

    /// Lower value leases first among equally ready tasks
    pub priority: u32,

    pub created_at: DateTime<Utc>,

    /// Present while leased or running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expiry: Option<DateTime<Utc>>,

    /// Worker currently holding the lease
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leased_by: Option<String>,

    /// Earliest time the task may be leased (retry backoff)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    tasks: HashMap<String, Task>,
}

/// Aggregate counts for status reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub leased: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retrying: usize,
}

/// Durable lease-based task queue.
///
/// All mutation goes through one `Mutex`, making the queue single-writer;
/// every mutating call persists before returning.
pub struct TaskQueue {
    state: Mutex<QueueState>,
    path: PathBuf,
    max_attempts: u32,
    backoff_base_secs: u64,
}

impl TaskQueue {
    /// Opens the queue backed by the given state file.
    ///
    /// A missing file starts empty. A corrupt file is preserved on disk,
    /// logged loudly, and the queue starts empty rather than refusing to
    /// run. Tasks found `leased` or `running` were in flight when the
    /// previous process died; they return to `pending` so the work is
    /// re-delivered.
    pub fn open(path: &Path, max_attempts: u32, backoff_base_secs: u64) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut state = if path.exists() {
            let contents = fs::read_to_string(path)?;
            match serde_json::from_str::<QueueState>(&contents) {
                Ok(state) => state,
                Err(e) => {
                    let err = AgentError::CorruptState {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "queue state file corrupt, starting empty");
                    QueueState::default()
                }
            }
        } else {
            QueueState::default()
        };

        let mut recovered = 0;
        for task in state.tasks.values_mut() {
            if matches!(task.state, TaskState::Leased | TaskState::Running) {
                task.state = TaskState::Pending;
                task.lease_expiry = None;
                task.leased_by = None;
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(recovered, "returned in-flight tasks to pending after restart");
        }

        let queue = Self {
            state: Mutex::new(state),
            path: path.to_path_buf(),
            max_attempts,
            backoff_base_secs,
        };
        // Persist recovery so a second crash does not repeat it from stale state.
        {
            let state = queue.state.try_lock().map_err(|_| {
                AgentError::Config("queue lock poisoned during open".to_string())
            })?;
            Self::persist(&queue.path, &state)?;
        }
        Ok(queue)
    }

    /// Adds a new pending task and returns its id.
    pub async fn enqueue(
        &self,
        kind: &str,
        payload: serde_json::Value,
        priority: u32,
    ) -> Result<String, AgentError> {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            payload,
            state: TaskState::Pending,
            attempts: 0,
            priority,
            created_at: Utc::now(),
            lease_expiry: None,
            leased_by: None,
            not_before: None,
        };
        let id = task.id.clone();

        let mut state = self.state.lock().await;
        state.tasks.insert(id.clone(), task);
        Self::persist(&self.path, &state)?;
        debug!(task_id = %id, kind, priority, "task enqueued");
        Ok(id)
    }

    /// Leases the most eligible task to a worker.
    ///
    /// Eligible: `pending` or `retrying` with `not_before` passed, or a
    /// lease that expired without being reaped yet. Among eligible tasks,
    /// lowest priority value wins, then oldest `created_at`. Granting a
    /// lease increments `attempts`; at most one live lease exists per task.
    ///
    /// Returns None when nothing is ready.
    pub async fn lease(
        &self,
        worker_id: &str,
        ttl: std::time::Duration,
    ) -> Result<Option<Task>, AgentError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;

        let candidate = state
            .tasks
            .values()
            .filter(|t| Self::is_leasable(t, now))
            .min_by_key(|t| (t.priority, t.created_at))
            .map(|t| t.id.clone());

        let Some(id) = candidate else {
            return Ok(None);
        };

        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| AgentError::Config(format!("Invalid lease TTL: {}", e)))?;

        let task = state
            .tasks
            .get_mut(&id)
            .ok_or_else(|| AgentError::UnknownTask(id.clone()))?;
        task.state = TaskState::Leased;
        task.attempts += 1;
        task.lease_expiry = Some(now + ttl);
        task.leased_by = Some(worker_id.to_string());
        task.not_before = None;
        let leased = task.clone();

        Self::persist(&self.path, &state)?;
        debug!(task_id = %id, worker_id, attempt = leased.attempts, "task leased");
        Ok(Some(leased))
    }

    /// Marks a leased task as running.
    pub async fn mark_running(&self, task_id: &str) -> Result<(), AgentError> {
        let mut state = self.state.lock().await;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AgentError::UnknownTask(task_id.to_string()))?;
        task.state = TaskState::Running;
        Self::persist(&self.path, &state)?;
        Ok(())
    }

    /// Records the outcome of an attempt.
    ///
    /// - `Success` → `succeeded` (terminal)
    /// - `Fatal` → `failed` (terminal)
    /// - `Retry` → `retrying` with `not_before = now + base * 2^(attempts-1)`
    ///   while attempts remain, otherwise `failed`
    pub async fn complete(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), AgentError> {
        let mut state = self.state.lock().await;
        let max_attempts = self.max_attempts;
        let backoff_base = self.backoff_base_secs;
        let task = state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| AgentError::UnknownTask(task_id.to_string()))?;

        task.lease_expiry = None;
        task.leased_by = None;

        match outcome {
            TaskOutcome::Success => {
                task.state = TaskState::Succeeded;
                info!(task_id, kind = %task.kind, attempts = task.attempts, "task succeeded");
            }
            TaskOutcome::Fatal => {
                task.state = TaskState::Failed;
                warn!(task_id, kind = %task.kind, "task failed terminally");
            }
            TaskOutcome::Retry => {
                if task.attempts >= max_attempts {
                    task.state = TaskState::Failed;
                    warn!(
                        task_id,
                        kind = %task.kind,
                        attempts = task.attempts,
                        "task failed after exhausting attempts"
                    );
                } else {
                    let exponent = task.attempts.saturating_sub(1).min(16);
                    let delay_secs = backoff_base.saturating_mul(1u64 << exponent);
                    task.state = TaskState::Retrying;
                    task.not_before = Some(Utc::now() + ChronoDuration::seconds(delay_secs as i64));
                    debug!(task_id, delay_secs, "task scheduled for retry");
                }
            }
        }

        Self::persist(&self.path, &state)?;
        Ok(())
    }

    /// Returns expired leases to pending.
    ///
    /// Only tasks whose `lease_expiry` has passed are touched; live leases
    /// and ready tasks are left alone. Returns the ids of reaped tasks.
    pub async fn reap_expired(&self) -> Result<Vec<String>, AgentError> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let mut reaped = Vec::new();

        for task in state.tasks.values_mut() {
            if matches!(task.state, TaskState::Leased | TaskState::Running)
                && task.lease_expiry.is_some_and(|exp| exp <= now)
            {
                task.state = TaskState::Pending;
                task.lease_expiry = None;
                task.leased_by = None;
                reaped.push(task.id.clone());
            }
        }

        if !reaped.is_empty() {
            Self::persist(&self.path, &state)?;
            info!(count = reaped.len(), "reaped expired leases");
        }
        Ok(reaped)
    }

    /// Fetches a task snapshot by id.
    pub async fn get(&self, task_id: &str) -> Result<Task, AgentError> {
        let state = self.state.lock().await;
        state
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| AgentError::UnknownTask(task_id.to_string()))
    }

    /// Counts tasks by state.
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let mut stats = QueueStats::default();
        for task in state.tasks.values() {
            match task.state {
                TaskState::Pending => stats.pending += 1,
                TaskState::Leased => stats.leased += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Succeeded => stats.succeeded += 1,
                TaskState::Failed => stats.failed += 1,
                TaskState::Retrying => stats.retrying += 1,
            }
        }
        stats
    }

    /// Reads queue stats straight from a state file, without opening the
    /// queue. Used by `vigil status` against a possibly-running engine.
    ///
    /// A missing file is an empty queue, not an error: on a freshly
    /// initialized project the engine has not persisted anything yet.
    pub fn stats_from_file(path: &Path) -> Result<QueueStats, AgentError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(QueueStats::default());
            }
            Err(e) => return Err(e.into()),
        };
        let state: QueueState =
            serde_json::from_str(&contents).map_err(|e| AgentError::CorruptState {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut stats = QueueStats::default();
        for task in state.tasks.values() {
            match task.state {
                TaskState::Pending => stats.pending += 1,
                TaskState::Leased => stats.leased += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Succeeded => stats.succeeded += 1,
                TaskState::Failed => stats.failed += 1,
                TaskState::Retrying => stats.retrying += 1,
            }
        }
        Ok(stats)
    }

    fn is_leasable(task: &Task, now: DateTime<Utc>) -> bool {
        match task.state {
            TaskState::Pending => task.not_before.is_none_or(|nb| nb <= now),
            TaskState::Retrying => task.not_before.is_none_or(|nb| nb <= now),
            TaskState::Leased | TaskState::Running => {
                task.lease_expiry.is_some_and(|exp| exp <= now)
            }
            TaskState::Succeeded | TaskState::Failed => false,
        }
    }

    /// Atomic rewrite: serialize to a temp file, then rename over the
    /// state file. Readers never observe a partial write.
    fn persist(path: &Path, state: &QueueState) -> Result<(), AgentError> {
        let json = serde_json::to_string_pretty(state).map_err(|e| {
            AgentError::Config(format!("Failed to serialize queue state: {}", e))
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
