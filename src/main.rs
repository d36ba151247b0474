use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use recovery_lite::callbacks::TracingObserver;
use recovery_lite::config::{ManagerConfig, ServerConfig, WorkerConfig, DEFAULT_ALPHABET};
use recovery_lite::dashboard::run_dashboard;
use recovery_lite::manager::{JobSpec, Manager};
use recovery_lite::shutdown::{drain_workers, install_shutdown_handler};
use recovery_lite::worker::{LocalWorker, Sha256Oracle};

#[derive(Parser, Debug)]
#[command(name = "recovery-lite")]
#[command(version)]
#[command(about = "Distributed brute-force password recovery")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the manager with local workers and serve the HTTP API
    Serve(ServeArgs),

    /// Recover one password in-process and print the result
    Recover(RecoverArgs),
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ManagerArgs {
    /// Candidate alphabet, in enumeration order
    #[arg(long, default_value = DEFAULT_ALPHABET)]
    alphabet: String,

    /// Longest password a job may target
    #[arg(long, default_value = "10")]
    max_length: usize,

    /// Target seconds of work per batch
    #[arg(long, default_value = "10")]
    batch_secs: u64,

    /// Estimated candidates per second per worker
    #[arg(long, default_value = "150000")]
    rate: u64,

    /// Reassign a batch after this many milliseconds without a report
    #[arg(long)]
    max_batch_ms: Option<u64>,

    /// Progress reporting interval in milliseconds
    #[arg(long, default_value = "1000")]
    progress_ms: u64,

    /// Number of local workers
    #[arg(long, short = 'w', default_value = "4")]
    workers: usize,

    /// Each local worker stops after this many batches
    #[arg(long)]
    max_batches: Option<u64>,
}

impl ManagerArgs {
    fn manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig {
            max_password_length: self.max_length,
            ..ManagerConfig::default()
        }
        .with_alphabet(self.alphabet.clone())
        .with_batch_target(self.batch_secs, self.rate)
        .with_progress_interval_ms(self.progress_ms);
        if let Some(ms) = self.max_batch_ms {
            config = config.with_max_batch_duration_ms(ms);
        }
        config
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            count: self.workers,
            max_batches: self.max_batches,
            ..WorkerConfig::default()
        }
    }
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Port for the HTTP API
    #[arg(long, default_value = "8080")]
    port: u16,

    #[command(flatten)]
    manager: ManagerArgs,
}

#[derive(Parser, Debug)]
struct RecoverArgs {
    /// Generate a random password of this length (or the length of --digest)
    #[arg(long, short = 'l')]
    length: Option<usize>,

    /// Recover this password
    #[arg(long, short = 'p', conflicts_with = "digest")]
    password: Option<String>,

    /// Recover the plaintext of this hex SHA-256 digest (requires --length)
    #[arg(long, requires = "length")]
    digest: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    #[command(flatten)]
    manager: ManagerArgs,
}

impl RecoverArgs {
    fn job_spec(&self) -> Result<JobSpec, Box<dyn std::error::Error>> {
        match (&self.password, &self.digest, self.length) {
            (Some(plaintext), None, None) => Ok(JobSpec::Custom {
                plaintext: plaintext.clone(),
            }),
            (None, Some(digest), Some(length)) => Ok(JobSpec::Digest {
                digest: digest.clone(),
                length,
            }),
            (None, None, Some(length)) => Ok(JobSpec::Generate { length }),
            _ => Err("specify one of --length, --password, or --digest with --length".into()),
        }
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Serialize)]
struct RecoverOutput {
    plaintext: String,
    digest: Option<String>,
    tested: u64,
    elapsed_secs: u64,
    rate: u64,
    workers: usize,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("recovery_lite=info")),
        )
        .init();
}

// =============================================================================
// Server
// =============================================================================

async fn run_server(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let config = ServerConfig::new(listen_addr)
        .with_manager(args.manager.manager_config())
        .with_workers(args.manager.worker_config());

    tracing::info!(
        listen_addr = %config.listen_addr,
        workers = config.workers.count,
        max_batch_ms = config.manager.max_batch_duration().as_millis() as u64,
        "Starting recovery manager"
    );

    let manager = Manager::new(config.manager.clone(), Arc::new(Sha256Oracle))?;
    manager.attach_observer(Arc::new(TracingObserver)).await?;

    let shutdown = install_shutdown_handler();
    let workers = LocalWorker::spawn_pool(manager.clone(), &config.workers, shutdown.clone()).await?;

    run_dashboard(config.listen_addr, manager.clone(), shutdown.clone()).await;

    // The dashboard returns on shutdown or on a bind failure; stop workers either way.
    shutdown.cancel();
    manager.cancel_job().await?;
    let total = workers.len();
    let stopped = drain_workers(workers, Duration::from_secs(5)).await;
    tracing::info!(stopped, total, "Shutdown complete");
    Ok(())
}

// =============================================================================
// One-shot Recovery
// =============================================================================

async fn run_recover(args: RecoverArgs) -> Result<(), Box<dyn std::error::Error>> {
    let spec = args.job_spec()?;
    let digest = match &spec {
        JobSpec::Digest { digest, .. } => Some(digest.clone()),
        _ => None,
    };

    let manager = Manager::new(args.manager.manager_config(), Arc::new(Sha256Oracle))?;
    let shutdown = CancellationToken::new();
    let worker_config = args.manager.worker_config();
    let workers = LocalWorker::spawn_pool(manager.clone(), &worker_config, shutdown.clone()).await?;

    let recovered = manager.recover_and_wait(spec).await;
    let status = manager.status().await;

    shutdown.cancel();
    drain_workers(workers, Duration::from_secs(5)).await;
    let plaintext = recovered?;

    let job = status.job;
    let output = RecoverOutput {
        plaintext,
        digest: digest.or_else(|| job.as_ref().map(|j| j.target_digest.clone())),
        tested: job.as_ref().map_or(0, |j| j.completed),
        elapsed_secs: job.as_ref().map_or(0, |j| j.elapsed_secs),
        rate: job.as_ref().map_or(0, |j| j.throughput),
        workers: worker_config.count,
    };

    match args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Password recovered!");
            println!("Plaintext: {}", output.plaintext);
            if let Some(digest) = &output.digest {
                println!("Digest:    {}", digest);
            }
            println!("Tested:    {}", output.tested);
            println!("Elapsed:   {}s", output.elapsed_secs);
            println!("Rate:      {}/s", output.rate);
            println!("Workers:   {}", output.workers);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Commands::Serve(serve_args) => run_server(serve_args).await?,
        Commands::Recover(recover_args) => run_recover(recover_args).await?,
    }

    Ok(())
}
