//! Worker Channel
//!
//! Long-lived OS threads that host the proof executor. Threads are
//! started once at process startup so the heavy artifact
//! initialization is paid once per worker, not per job. The pool and
//! the workers share no mutable state: requests go in over a channel,
//! exactly one event per job comes back, and every event carries the
//! job id (delivery order is not FIFO once more than one job is in
//! flight).
//!
//! A panic inside the executor terminates only that worker thread.
//! The dying worker self-reports the job it was holding, which lets
//! the orchestrator fail exactly the right job and spawn a
//! replacement.

use crossbeam_channel::{Receiver, Sender};
use proof_engine::{AnonAadhaarProof, ExecutorError, ProofExecutor, ProofInput};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::registry::JobId;

/// Builds one executor per worker thread, on that thread.
pub type ExecutorFactory =
    Arc<dyn Fn() -> Result<Box<dyn ProofExecutor>, ExecutorError> + Send + Sync>;

/// One unit of work for a worker.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    pub job_id: JobId,
    pub input: ProofInput,
}

/// Exactly one of these per dispatched job, plus `Crashed` when a
/// worker thread dies.
#[derive(Debug)]
pub enum WorkerEvent {
    Completed {
        worker_id: u32,
        job_id: JobId,
        proof: AnonAadhaarProof,
        proving_time_ms: u64,
    },
    Failed {
        worker_id: u32,
        job_id: JobId,
        error: String,
    },
    /// The worker thread terminated. `job_id` is the job that was in
    /// flight on it, if any (executor init failures carry none).
    Crashed {
        worker_id: u32,
        job_id: Option<JobId>,
    },
}

/// Pool of worker threads sharing one inbox.
pub struct WorkerPool {
    req_tx: Sender<WorkerRequest>,
    /// Kept so dispatch never observes a closed channel while workers
    /// are being respawned.
    req_rx: Receiver<WorkerRequest>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    factory: ExecutorFactory,
    size: usize,
    /// Workers currently able to take jobs. Drops below `size` when a
    /// worker dies without a replacement.
    live: AtomicUsize,
    next_worker_id: AtomicU32,
}

impl WorkerPool {
    /// Spawn `size` workers (minimum one). Returns the pool and the
    /// event stream the orchestrator consumes.
    pub fn start(
        size: usize,
        factory: ExecutorFactory,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (req_tx, req_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let size = size.max(1);
        let pool = Self {
            req_tx,
            req_rx,
            event_tx,
            factory,
            size,
            live: AtomicUsize::new(size),
            next_worker_id: AtomicU32::new(1),
        };
        for _ in 0..pool.size {
            pool.spawn_worker();
        }
        (pool, event_rx)
    }

    /// Workers currently able to take jobs.
    pub fn live_workers(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Record a worker that died and will not be replaced.
    pub fn retire(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    /// Queue a job. Non-blocking; the channel is unbounded.
    pub fn dispatch(&self, job_id: JobId, input: ProofInput) {
        let _ = self.req_tx.send(WorkerRequest { job_id, input });
    }

    /// Replace a crashed worker with a fresh thread.
    pub fn respawn(&self) {
        self.spawn_worker();
    }

    fn spawn_worker(&self) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let req_rx = self.req_rx.clone();
        let event_tx = self.event_tx.clone();
        let factory = self.factory.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("proof-worker-{}", worker_id))
            .spawn(move || worker_loop(worker_id, req_rx, event_tx, factory));

        if let Err(e) = spawned {
            error!("Failed to spawn worker {}: {}", worker_id, e);
        }
    }
}

fn worker_loop(
    worker_id: u32,
    req_rx: Receiver<WorkerRequest>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    factory: ExecutorFactory,
) {
    // Heavy one-time init happens here, on the worker context.
    let executor = match factory() {
        Ok(executor) => executor,
        Err(e) => {
            error!("Worker {} failed to initialize executor: {}", worker_id, e);
            let _ = event_tx.send(WorkerEvent::Crashed {
                worker_id,
                job_id: None,
            });
            return;
        }
    };

    info!("Worker {} ready", worker_id);

    while let Ok(request) = req_rx.recv() {
        let start = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| executor.compute(&request.input)));

        let event = match outcome {
            Ok(Ok(proof)) => WorkerEvent::Completed {
                worker_id,
                job_id: request.job_id,
                proof,
                proving_time_ms: start.elapsed().as_millis() as u64,
            },
            Ok(Err(e)) => WorkerEvent::Failed {
                worker_id,
                job_id: request.job_id,
                error: e.to_string(),
            },
            Err(_) => {
                error!(
                    "Worker {} executor panicked on job {}; worker exiting",
                    worker_id, request.job_id
                );
                let _ = event_tx.send(WorkerEvent::Crashed {
                    worker_id,
                    job_id: Some(request.job_id),
                });
                return;
            }
        };

        if event_tx.send(event).is_err() {
            // Orchestrator gone; shutting down.
            return;
        }
    }
    // Inbox closed: pool dropped, clean exit.
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proof_engine::MockExecutor;
    use std::time::Duration;

    /// Executor whose behavior is scripted by the signal field:
    /// "panic" panics, "fail" errors, anything else proves.
    struct ScriptedExecutor;

    impl ProofExecutor for ScriptedExecutor {
        fn compute(&self, input: &ProofInput) -> Result<AnonAadhaarProof, ExecutorError> {
            match input.signal.as_str() {
                "panic" => panic!("scripted executor fault"),
                "fail" => Err(ExecutorError::InvalidQr("scripted failure".to_string())),
                _ => MockExecutor::new(Duration::ZERO).compute(input),
            }
        }
    }

    fn scripted_pool(size: usize) -> (WorkerPool, mpsc::UnboundedReceiver<WorkerEvent>) {
        WorkerPool::start(size, Arc::new(|| Ok(Box::new(ScriptedExecutor) as Box<dyn ProofExecutor>)))
    }

    fn input(signal: &str) -> ProofInput {
        ProofInput {
            qr_data: "987654321".to_string(),
            signal: signal.to_string(),
        }
    }

    #[tokio::test]
    async fn test_completion_event_carries_job_id() {
        let (pool, mut events) = scripted_pool(1);
        pool.dispatch("job_a".to_string(), input("ok"));

        match events.recv().await.unwrap() {
            WorkerEvent::Completed { job_id, proof, .. } => {
                assert_eq!(job_id, "job_a");
                assert!(!proof.nullifier.is_empty());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_executor_error_becomes_failed_event() {
        let (pool, mut events) = scripted_pool(1);
        pool.dispatch("job_b".to_string(), input("fail"));

        match events.recv().await.unwrap() {
            WorkerEvent::Failed { job_id, error, .. } => {
                assert_eq!(job_id, "job_b");
                assert!(error.contains("scripted failure"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_reports_crash_and_respawn_recovers() {
        let (pool, mut events) = scripted_pool(1);
        pool.dispatch("job_c".to_string(), input("panic"));

        match events.recv().await.unwrap() {
            WorkerEvent::Crashed { job_id, .. } => {
                assert_eq!(job_id, Some("job_c".to_string()));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // The replacement worker picks up queued work.
        pool.respawn();
        pool.dispatch("job_d".to_string(), input("ok"));
        match events.recv().await.unwrap() {
            WorkerEvent::Completed { job_id, .. } => assert_eq!(job_id, "job_d"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_factory_failure_reports_crash() {
        let (_pool, mut events) = WorkerPool::start(
            1,
            Arc::new(|| {
                Err::<Box<dyn ProofExecutor>, _>(ExecutorError::InvalidQr(
                    "no artifacts on this worker".to_string(),
                ))
            }),
        );

        match events.recv().await.unwrap() {
            WorkerEvent::Crashed { job_id, .. } => assert_eq!(job_id, None),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retired_workers_leave_live_count() {
        let (pool, _events) = scripted_pool(2);
        assert_eq!(pool.live_workers(), 2);

        pool.retire();
        assert_eq!(pool.live_workers(), 1);

        // Saturates at zero
        pool.retire();
        pool.retire();
        assert_eq!(pool.live_workers(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_jobs_no_result_bleed() {
        let (pool, mut events) = scripted_pool(2);
        pool.dispatch("job_x".to_string(), input("x-signal"));
        pool.dispatch("job_y".to_string(), input("y-signal"));

        let mut seen = std::collections::HashMap::new();
        for _ in 0..2 {
            match events.recv().await.unwrap() {
                WorkerEvent::Completed { job_id, proof, .. } => {
                    seen.insert(job_id, proof.signal_hash);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }

        // Distinct outcomes per job, regardless of completion order.
        assert_eq!(seen.len(), 2);
        assert_ne!(seen["job_x"], seen["job_y"]);
    }
}
