use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use kube_job_controller::config::{
    CleanupConfig, ControllerConfig, RepositoryMountConfig, SharedVolumeConfig, WatchConfig,
};
use kube_job_controller::controller::Controller;
use kube_job_controller::manifest::{JobRequest, ManifestBuilder};
use kube_job_controller::orchestrator::KubeOrchestrator;
use kube_job_controller::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "kube-job-controller")]
#[command(version)]
#[command(about = "Submits batch jobs to Kubernetes and tracks them to completion")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the controller: watch jobs and pods and serve the HTTP API
    Server(ServerArgs),

    /// Print the Job manifest a submission would create, without contacting the cluster
    Render(RenderArgs),
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct VolumeArgs {
    /// Namespace for jobs that do not name one
    #[arg(long, default_value = "default")]
    namespace: String,

    /// PersistentVolumeClaim backing the shared filesystem
    #[arg(long, default_value = "shared-volume-pvc")]
    shared_claim: String,

    /// Mount path of the shared filesystem inside job containers
    #[arg(long, default_value = "/shared")]
    shared_mount_path: String,

    /// Root directory for read-only repository mounts
    #[arg(long, default_value = "/cvmfs")]
    repository_mount_root: String,

    /// Suffix appended to repository names in mount paths
    #[arg(long, default_value = ".cern.ch")]
    repository_mount_suffix: String,
}

impl VolumeArgs {
    fn apply(&self, config: &mut ControllerConfig) {
        config.namespace = self.namespace.clone();
        config.shared_volume = SharedVolumeConfig {
            claim_name: self.shared_claim.clone(),
            mount_path: self.shared_mount_path.clone(),
            ..SharedVolumeConfig::default()
        };
        config.repositories = RepositoryMountConfig {
            mount_root: self.repository_mount_root.clone(),
            mount_suffix: self.repository_mount_suffix.clone(),
            ..RepositoryMountConfig::default()
        };
    }
}

// =============================================================================
// Server Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    #[command(flatten)]
    volumes: VolumeArgs,

    /// Restart ceiling for jobs that do not set one
    #[arg(long, default_value = "3")]
    default_max_restarts: u32,

    /// Port for the HTTP API (disabled when omitted)
    #[arg(long)]
    api_port: Option<u16>,

    /// Interval between checks while cleaning up a job
    #[arg(long, default_value = "5000")]
    poll_interval_ms: u64,

    /// Report a job's cleanup as stuck and restart it after this long
    #[arg(long, default_value = "600000")]
    cleanup_timeout_ms: u64,

    /// Delay before restarting a stuck cleanup
    #[arg(long, default_value = "30000")]
    cleanup_retry_delay_ms: u64,

    /// Delay before resubscribing to a failed watch stream
    #[arg(long, default_value = "1000")]
    resubscribe_delay_ms: u64,
}

// =============================================================================
// Render Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct RenderArgs {
    #[command(flatten)]
    volumes: VolumeArgs,

    /// Job identifier
    job_id: String,

    /// Container image
    image: String,

    /// Command line to run in the container
    #[arg(long)]
    cmd: Option<String>,

    /// Environment variables (format: NAME=VALUE, repeatable)
    #[arg(long = "env", value_parser = parse_env_var)]
    env: Vec<(String, String)>,

    /// Mount the shared filesystem
    #[arg(long)]
    shared_file_system: bool,

    /// Read-only repository to mount (repeatable)
    #[arg(long = "repository")]
    repositories: Vec<String>,
}

fn parse_env_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ControllerConfig {
        default_max_restart_count: args.default_max_restarts,
        api_addr: match args.api_port {
            Some(p) => Some(format!("0.0.0.0:{}", p).parse::<SocketAddr>()?),
            None => None,
        },
        watch: WatchConfig {
            resubscribe_delay_ms: args.resubscribe_delay_ms,
            ..WatchConfig::default()
        },
        cleanup: CleanupConfig {
            poll_interval_ms: args.poll_interval_ms,
            timeout_ms: args.cleanup_timeout_ms,
            retry_delay_ms: args.cleanup_retry_delay_ms,
        },
        ..ControllerConfig::default()
    };
    args.volumes.apply(&mut config);

    tracing::info!(
        namespace = %config.namespace,
        api_addr = ?config.api_addr,
        default_max_restarts = config.default_max_restart_count,
        cleanup_timeout_ms = config.cleanup.timeout_ms,
        "Starting kube-job-controller"
    );

    let orchestrator = KubeOrchestrator::try_default().await?;
    let controller = Arc::new(Controller::new(config, Arc::new(orchestrator)));
    let shutdown = install_shutdown_handler();

    controller.run(shutdown).await?;
    Ok(())
}

fn run_render(args: RenderArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ControllerConfig::default();
    args.volumes.apply(&mut config);

    let request = JobRequest {
        job_id: args.job_id,
        image: args.image,
        command: args.cmd,
        env: args.env.into_iter().collect::<BTreeMap<_, _>>(),
        shared_file_system: args.shared_file_system,
        repositories: args.repositories,
        max_restart_count: None,
        namespace: None,
    };

    let manifest = ManifestBuilder::new(&config).build(&request)?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Render(render_args) => run_render(render_args)?,
    }

    Ok(())
}
