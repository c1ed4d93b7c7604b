//! Orchestrator
//!
//! Ties the artifact gate, worker pool, registry and per-job timeout
//! supervision together. Submission never blocks on the computation:
//! it gates, allocates a registry entry, hands the job to the worker
//! channel and returns the id. One event-router task consumes worker
//! events; together with the supervisor tasks it spawns, it is the
//! only writer of terminal registry state, which centralizes the
//! first-writer-wins rule.

use crate::artifacts::{ArtifactError, ArtifactGate};
use crate::registry::{
    ErrorKind, JobCounts, JobError, JobId, JobOutcome, JobView, Registry, Transition,
};
use crate::worker::{WorkerEvent, WorkerPool};
use proof_engine::{AnonAadhaarProof, ProofInput};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Tuning knobs for the orchestration core.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard deadline per job. Historically tuned between 5 and 30
    /// minutes depending on circuit size and hardware.
    pub deadline: Duration,
    /// How long terminal jobs stay queryable before eviction.
    pub retention: Duration,
    /// When set, the most recent completed proof is dumped here.
    pub debug_dump: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(300),
            retention: Duration::from_secs(3600),
            debug_dump: None,
        }
    }
}

/// Submission rejections. No job is created in either case.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    ArtifactUnavailable(#[from] ArtifactError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no live proving workers; the executor failed to initialize")]
    WorkersUnavailable,
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::ArtifactUnavailable(_) => ErrorKind::ArtifactUnavailable,
            SubmitError::InvalidInput(_) => ErrorKind::InvalidInput,
            SubmitError::WorkersUnavailable => ErrorKind::WorkersUnavailable,
        }
    }
}

pub struct Orchestrator {
    registry: Arc<Registry>,
    pool: WorkerPool,
    /// `None` disables the gate (mock executor mode needs no artifacts).
    gate: Option<Arc<ArtifactGate>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Build the orchestrator and spawn its background tasks: the
    /// worker event router and the retention sweeper.
    pub fn start(
        gate: Option<Arc<ArtifactGate>>,
        pool: WorkerPool,
        events: mpsc::UnboundedReceiver<WorkerEvent>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            registry: Arc::new(Registry::new()),
            pool,
            gate,
            config,
        });

        tokio::spawn(route_events(orchestrator.clone(), events));

        let sweeper = orchestrator.clone();
        tokio::spawn(async move {
            let retention = sweeper.config.retention.as_secs();
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                sweeper.registry.evict_expired(retention).await;
            }
        });

        orchestrator
    }

    /// Admit a job: gate, register, dispatch, supervise. Returns as
    /// soon as the job is queued, regardless of computation latency.
    pub async fn submit(&self, input: ProofInput) -> Result<JobView, SubmitError> {
        if input.qr_data.trim().is_empty() || input.signal.trim().is_empty() {
            return Err(SubmitError::InvalidInput(
                "qrCode and signal are required".to_string(),
            ));
        }

        // Fail closed: no registry entry exists until the gate passes,
        // and a job queued to a dead pool would only ever time out.
        if self.pool.live_workers() == 0 {
            return Err(SubmitError::WorkersUnavailable);
        }
        if let Some(gate) = &self.gate {
            gate.ensure_ready().await?;
        }

        let worker_input = input.clone();
        let view = self.registry.create(input).await;
        let job_id = view.job_id.clone();
        info!("Created proof job {}", job_id);

        self.pool.dispatch(job_id.clone(), worker_input);
        self.registry.mark_running(&job_id).await;
        self.spawn_supervisor(job_id);

        Ok(view)
    }

    /// Non-blocking status read. `None` means the id was never issued
    /// (or the job aged out of retention).
    pub async fn status(&self, job_id: &str) -> Option<JobView> {
        self.registry.get(job_id).await
    }

    /// Await the job's terminal state. Used by the synchronous facade
    /// mode; polling clients never need this.
    pub async fn wait(&self, job_id: &str) -> Option<JobView> {
        let mut status_rx = self.registry.subscribe(job_id).await?;
        // An Err here means the job was evicted mid-wait; fall through
        // to whatever the registry still knows.
        let _ = status_rx.wait_for(|status| status.is_terminal()).await;
        self.registry.get(job_id).await
    }

    pub async fn counts(&self) -> JobCounts {
        self.registry.counts().await
    }

    pub fn worker_count(&self) -> usize {
        self.pool.live_workers()
    }

    /// Race the job's terminal transition against the deadline. The
    /// loser's eventual signal is detected as stale and discarded; the
    /// underlying computation cannot be cancelled and may keep burning
    /// CPU on the worker after a timeout.
    fn spawn_supervisor(&self, job_id: JobId) {
        let registry = self.registry.clone();
        let deadline = self.config.deadline;

        tokio::spawn(async move {
            let Some(mut status_rx) = registry.subscribe(&job_id).await else {
                return;
            };

            tokio::select! {
                // Discard the watch guard inside the arm future; the
                // select machinery must not hold it across the other
                // arm's await.
                _ = async { let _ = status_rx.wait_for(|status| status.is_terminal()).await; } => {
                    // Worker outcome won the race; nothing to do.
                }
                _ = tokio::time::sleep(deadline) => {
                    if registry.transition(&job_id, JobOutcome::TimedOut).await
                        == Transition::Applied
                    {
                        warn!("Job {} timed out after {:?}", job_id, deadline);
                    }
                }
            }
        });
    }

    async fn dump_latest(&self, job_id: &str, proof: &AnonAadhaarProof) {
        let Some(path) = &self.config.debug_dump else {
            return;
        };
        match serde_json::to_vec_pretty(proof) {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::write(path, bytes).await {
                    warn!("Failed to dump proof for {} to {:?}: {}", job_id, path, e);
                }
            }
            Err(e) => warn!("Failed to serialize proof for {}: {}", job_id, e),
        }
    }
}

/// Consume worker events and apply them to the registry. Late events
/// for already-terminal jobs (a success racing a timeout) are logged
/// and dropped. A crashed worker fails its in-flight job and gets a
/// replacement thread; the failed job itself is never retried.
async fn route_events(
    orchestrator: Arc<Orchestrator>,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Completed {
                worker_id,
                job_id,
                proof,
                proving_time_ms,
            } => {
                match orchestrator
                    .registry
                    .transition(&job_id, JobOutcome::Completed(proof.clone()))
                    .await
                {
                    Transition::Applied => {
                        info!(
                            "Job {} completed by worker {} in {}ms",
                            job_id, worker_id, proving_time_ms
                        );
                        orchestrator.dump_latest(&job_id, &proof).await;
                    }
                    Transition::Stale => {
                        warn!("Discarding stale success for terminal job {}", job_id)
                    }
                    Transition::NotFound => warn!("Success message for unknown job {}", job_id),
                }
            }
            WorkerEvent::Failed {
                worker_id,
                job_id,
                error,
            } => {
                let outcome = JobOutcome::Failed(JobError {
                    kind: ErrorKind::ExecutorError,
                    message: error,
                });
                match orchestrator.registry.transition(&job_id, outcome).await {
                    Transition::Applied => {
                        error!("Job {} failed on worker {}", job_id, worker_id)
                    }
                    Transition::Stale => {
                        warn!("Discarding stale failure for terminal job {}", job_id)
                    }
                    Transition::NotFound => warn!("Failure message for unknown job {}", job_id),
                }
            }
            WorkerEvent::Crashed { worker_id, job_id } => match job_id {
                Some(job_id) => {
                    error!(
                        "Worker {} crashed while computing job {}; restarting worker",
                        worker_id, job_id
                    );
                    let outcome = JobOutcome::Failed(JobError {
                        kind: ErrorKind::ExecutorCrashed,
                        message: "worker terminated unexpectedly while computing this job"
                            .to_string(),
                    });
                    if orchestrator.registry.transition(&job_id, outcome).await
                        == Transition::Stale
                    {
                        warn!("Crash notice for already-terminal job {}", job_id);
                    }
                    orchestrator.pool.respawn();
                }
                None => {
                    // Executor init failed. Not respawned: a factory
                    // that failed once would fail again in a hot loop.
                    orchestrator.pool.retire();
                    error!(
                        "Worker {} failed to initialize and will not be replaced ({} workers left)",
                        worker_id,
                        orchestrator.pool.live_workers()
                    );
                }
            },
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
