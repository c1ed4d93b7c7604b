use anyhow::Context;
use clap::Parser;
use proof_engine::{ArtifactPaths, Groth16Executor, MockExecutor, ProofExecutor, REQUIRED_ARTIFACTS};
use proof_server::api;
use proof_server::artifacts::{ArtifactFetcher, ArtifactGate, HttpArtifactFetcher};
use proof_server::orchestrator::{Orchestrator, OrchestratorConfig};
use proof_server::worker::{ExecutorFactory, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "proof-server")]
#[command(about = "Anon Aadhaar proof generation service")]
struct Args {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "3222")]
    port: u16,

    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Directory holding the circuit artifacts
    #[arg(long, env = "ARTIFACTS_DIR", default_value = "public")]
    artifacts_dir: PathBuf,

    /// Base URL to download missing artifacts from
    #[arg(long, env = "ARTIFACTS_BASE_URL")]
    artifacts_base_url: Option<String>,

    /// Number of proving workers
    #[arg(long, env = "WORKERS", default_value = "1")]
    workers: usize,

    /// Per-job proving deadline in seconds (deployments run 300-1800)
    #[arg(long, env = "PROOF_TIMEOUT_SECS", default_value = "300")]
    proof_timeout_secs: u64,

    /// How long finished jobs stay queryable, in seconds
    #[arg(long, env = "JOB_RETENTION_SECS", default_value = "3600")]
    job_retention_secs: u64,

    /// Use the mock executor instead of real proving
    #[arg(long, env = "MOCK_EXECUTOR", default_value = "false", action = clap::ArgAction::Set)]
    mock_executor: bool,

    /// Simulated proving time for the mock executor, in milliseconds
    #[arg(long, env = "MOCK_DELAY_MS", default_value = "1000")]
    mock_delay_ms: u64,

    /// Write the most recent proof bundle to this path after each job
    #[arg(long, env = "DEBUG_PROOF_DUMP")]
    debug_proof_dump: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proof_server=debug,tower_http=debug".into()),
        )
        .init();

    let args = Args::parse();

    info!("Starting proof server");
    info!("  Workers: {}", args.workers);
    info!("  Proof timeout: {}s", args.proof_timeout_secs);
    info!("  Mock executor: {}", args.mock_executor);

    // In mock mode no artifacts are needed, so no gate either.
    let gate = if args.mock_executor {
        None
    } else {
        let paths = ArtifactPaths::new(&args.artifacts_dir);
        let fetcher = args.artifacts_base_url.as_deref().map(|url| {
            Arc::new(HttpArtifactFetcher::new(url)) as Arc<dyn ArtifactFetcher>
        });
        let gate = Arc::new(ArtifactGate::new(paths, fetcher));

        // Fail fast: refuse to start without a usable artifact set.
        gate.ensure_ready().await.with_context(|| {
            format!(
                "artifacts {:?} not available under {}",
                REQUIRED_ARTIFACTS,
                args.artifacts_dir.display()
            )
        })?;
        info!("Artifacts ready in {}", args.artifacts_dir.display());
        Some(gate)
    };

    let factory: ExecutorFactory = if args.mock_executor {
        let delay = Duration::from_millis(args.mock_delay_ms);
        Arc::new(move || Ok(Box::new(MockExecutor::new(delay)) as Box<dyn ProofExecutor>))
    } else {
        let dir = args.artifacts_dir.clone();
        Arc::new(move || {
            let executor = Groth16Executor::load(&ArtifactPaths::new(&dir))?;
            Ok(Box::new(executor) as Box<dyn ProofExecutor>)
        })
    };

    let (pool, events) = WorkerPool::start(args.workers, factory);

    let config = OrchestratorConfig {
        deadline: Duration::from_secs(args.proof_timeout_secs),
        retention: Duration::from_secs(args.job_retention_secs),
        debug_dump: args.debug_proof_dump,
    };
    let orchestrator = Orchestrator::start(gate, pool, events, config);

    let app = api::app(orchestrator);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
