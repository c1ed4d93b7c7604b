//! Job Registry
//!
//! In-memory table of proof jobs, the single source of truth for
//! status polling. All mutation goes through the orchestrator; the
//! registry enforces the one rule that makes completion/timeout races
//! safe: the first terminal write per job wins, later writes are
//! reported as stale and discarded by the caller.

use proof_engine::{AnonAadhaarProof, ProofInput};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, RwLock};
use tracing::debug;

pub type JobId = String;

/// Job lifecycle: `pending -> running -> {completed, failed, timed_out}`.
/// Terminal states are immutable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut)
    }
}

/// Stable error kinds surfaced to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ArtifactUnavailable,
    WorkersUnavailable,
    InvalidInput,
    ExecutorError,
    ExecutorCrashed,
    DeadlineExceeded,
}

impl ErrorKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            ErrorKind::ArtifactUnavailable => "ARTIFACT_UNAVAILABLE",
            ErrorKind::WorkersUnavailable => "WORKERS_UNAVAILABLE",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::ExecutorError => "EXECUTOR_ERROR",
            ErrorKind::ExecutorCrashed => "EXECUTOR_CRASHED",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
        }
    }
}

/// Terminal error attached to a failed or timed-out job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Terminal outcome applied through [`Registry::transition`].
#[derive(Debug)]
pub enum JobOutcome {
    Completed(AnonAadhaarProof),
    Failed(JobError),
    TimedOut,
}

/// Result of a terminal transition attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The job already reached a terminal state; the event is stale.
    Stale,
    NotFound,
}

/// Client-facing snapshot of a job.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AnonAadhaarProof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub submitted_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_at: Option<u64>,
}

/// Aggregate counts for the health endpoint.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct JobCounts {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
}

struct JobEntry {
    status: JobStatus,
    input: ProofInput,
    result: Option<AnonAadhaarProof>,
    error: Option<JobError>,
    submitted_at: u64,
    terminal_at: Option<u64>,
    /// Terminal-transition signal for the timeout supervisor and the
    /// synchronous facade mode.
    status_tx: watch::Sender<JobStatus>,
}

impl JobEntry {
    fn view(&self, job_id: &str) -> JobView {
        JobView {
            job_id: job_id.to_string(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            submitted_at: self.submitted_at,
            terminal_at: self.terminal_at,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// The registry itself. One entry per issued id; ids are uuid v4 and
/// never reused within a process lifetime.
#[derive(Default)]
pub struct Registry {
    jobs: RwLock<HashMap<JobId, JobEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a pending record. Constant time; never blocks on the
    /// computation itself.
    pub async fn create(&self, input: ProofInput) -> JobView {
        let job_id = format!("job_{}", uuid::Uuid::new_v4().simple());
        let (status_tx, _) = watch::channel(JobStatus::Pending);

        let entry = JobEntry {
            status: JobStatus::Pending,
            input,
            result: None,
            error: None,
            submitted_at: unix_now(),
            terminal_at: None,
            status_tx,
        };
        let view = entry.view(&job_id);

        let mut jobs = self.jobs.write().await;
        jobs.insert(job_id, entry);
        view
    }

    /// `pending -> running` when the job is handed to a worker.
    pub async fn mark_running(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(job_id) {
            Some(entry) if entry.status == JobStatus::Pending => {
                entry.status = JobStatus::Running;
                let _ = entry.status_tx.send(JobStatus::Running);
                true
            }
            _ => false,
        }
    }

    /// Apply a terminal outcome. First writer wins; a second terminal
    /// write is reported as [`Transition::Stale`] and leaves the
    /// record untouched.
    pub async fn transition(&self, job_id: &str, outcome: JobOutcome) -> Transition {
        let mut jobs = self.jobs.write().await;
        let Some(entry) = jobs.get_mut(job_id) else {
            return Transition::NotFound;
        };

        if entry.status.is_terminal() {
            return Transition::Stale;
        }

        match outcome {
            JobOutcome::Completed(proof) => {
                entry.status = JobStatus::Completed;
                entry.result = Some(proof);
            }
            JobOutcome::Failed(error) => {
                entry.status = JobStatus::Failed;
                entry.error = Some(error);
            }
            JobOutcome::TimedOut => {
                entry.status = JobStatus::TimedOut;
                entry.error = Some(JobError {
                    kind: ErrorKind::DeadlineExceeded,
                    message: "deadline elapsed before a worker response".to_string(),
                });
            }
        }
        entry.terminal_at = Some(unix_now());
        let _ = entry.status_tx.send(entry.status);
        Transition::Applied
    }

    pub async fn get(&self, job_id: &str) -> Option<JobView> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(|entry| entry.view(job_id))
    }

    /// The payload recorded at submission, for dispatching to a worker.
    pub async fn input(&self, job_id: &str) -> Option<ProofInput> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(|entry| entry.input.clone())
    }

    /// Subscribe to the job's status transitions.
    pub async fn subscribe(&self, job_id: &str) -> Option<watch::Receiver<JobStatus>> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).map(|entry| entry.status_tx.subscribe())
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.read().await;
        let mut counts = JobCounts::default();
        counts.total = jobs.len();
        for entry in jobs.values() {
            match entry.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::TimedOut => counts.timed_out += 1,
            }
        }
        counts
    }

    /// Drop terminal jobs older than the retention window. Keeps the
    /// table bounded under sustained load.
    pub async fn evict_expired(&self, retention_secs: u64) -> usize {
        let now = unix_now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.terminal_at {
            Some(at) => at + retention_secs > now,
            None => true,
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            debug!("Evicted {} expired jobs", evicted);
        }
        evicted
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_input() -> ProofInput {
        ProofInput {
            qr_data: "123456789".to_string(),
            signal: "sig".to_string(),
        }
    }

    fn test_proof() -> AnonAadhaarProof {
        proof_engine::MockExecutor::new(std::time::Duration::ZERO)
            .compute(&test_input())
            .unwrap()
    }

    use proof_engine::ProofExecutor;

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = Registry::new();
        let view = registry.create(test_input()).await;

        assert!(view.job_id.starts_with("job_"));
        assert_eq!(view.status, JobStatus::Pending);
        assert!(view.result.is_none() && view.error.is_none());

        let fetched = registry.get(&view.job_id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(registry.input(&view.job_id).await.unwrap().signal, "sig");
    }

    #[tokio::test]
    async fn test_unknown_id_not_found() {
        let registry = Registry::new();
        assert!(registry.get("job_missing").await.is_none());
        assert_eq!(
            registry.transition("job_missing", JobOutcome::TimedOut).await,
            Transition::NotFound
        );
    }

    #[tokio::test]
    async fn test_distinct_ids() {
        let registry = Registry::new();
        let a = registry.create(test_input()).await;
        let b = registry.create(test_input()).await;
        assert_ne!(a.job_id, b.job_id);
    }

    #[tokio::test]
    async fn test_first_terminal_write_wins() {
        let registry = Registry::new();
        let view = registry.create(test_input()).await;
        assert!(registry.mark_running(&view.job_id).await);

        let applied = registry
            .transition(&view.job_id, JobOutcome::Completed(test_proof()))
            .await;
        assert_eq!(applied, Transition::Applied);

        // A late timeout must not overwrite the completion
        let stale = registry.transition(&view.job_id, JobOutcome::TimedOut).await;
        assert_eq!(stale, Transition::Stale);

        let fetched = registry.get(&view.job_id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert!(fetched.result.is_some());
        assert!(fetched.error.is_none());
        assert!(fetched.terminal_at.is_some());
    }

    #[tokio::test]
    async fn test_timeout_then_late_success_discarded() {
        let registry = Registry::new();
        let view = registry.create(test_input()).await;
        registry.mark_running(&view.job_id).await;

        assert_eq!(
            registry.transition(&view.job_id, JobOutcome::TimedOut).await,
            Transition::Applied
        );
        assert_eq!(
            registry
                .transition(&view.job_id, JobOutcome::Completed(test_proof()))
                .await,
            Transition::Stale
        );

        let fetched = registry.get(&view.job_id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::TimedOut);
        assert_eq!(fetched.error.unwrap().kind, ErrorKind::DeadlineExceeded);
        assert!(fetched.result.is_none());
    }

    #[tokio::test]
    async fn test_running_not_reentered() {
        let registry = Registry::new();
        let view = registry.create(test_input()).await;
        registry.mark_running(&view.job_id).await;
        registry.transition(&view.job_id, JobOutcome::TimedOut).await;

        // Terminal jobs cannot go back to running
        assert!(!registry.mark_running(&view.job_id).await);
    }

    #[tokio::test]
    async fn test_watch_signals_terminal() {
        let registry = Registry::new();
        let view = registry.create(test_input()).await;
        let mut rx = registry.subscribe(&view.job_id).await.unwrap();

        registry.mark_running(&view.job_id).await;
        registry
            .transition(&view.job_id, JobOutcome::Completed(test_proof()))
            .await;

        let status = *rx.wait_for(|s| s.is_terminal()).await.unwrap();
        assert_eq!(status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_eviction_drops_only_expired_terminal_jobs() {
        let registry = Registry::new();
        let done = registry.create(test_input()).await;
        let live = registry.create(test_input()).await;
        registry.mark_running(&done.job_id).await;
        registry.transition(&done.job_id, JobOutcome::TimedOut).await;

        // retention 0: anything terminal is expired
        assert_eq!(registry.evict_expired(0).await, 1);
        assert!(registry.get(&done.job_id).await.is_none());
        assert!(registry.get(&live.job_id).await.is_some());

        // generous retention keeps fresh terminal jobs around
        registry.mark_running(&live.job_id).await;
        registry.transition(&live.job_id, JobOutcome::TimedOut).await;
        assert_eq!(registry.evict_expired(3600).await, 0);
    }
}
