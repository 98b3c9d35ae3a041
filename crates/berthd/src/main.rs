//! berthd — the Berth daemon.
//!
//! Single binary that wires the record store, the image catalog and the
//! orchestrator behind the REST API.
//!
//! # Usage
//!
//! ```text
//! berthd serve --port 8443 --data-dir /var/lib/berth --config berth.toml
//! berthd serve --cluster memory          # no cluster needed, local development
//! berthd default-config > berth.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use berth_api::{ApiState, build_router};
use berth_core::BerthConfig;
use berth_orchestrator::{ControlPlane, KubeControlPlane, MemoryControlPlane, Orchestrator};
use berth_state::DeploymentStore;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "berthd", about = "Berth managed deployment daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the deployment API.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Data directory for the record store.
        #[arg(long, default_value = "/var/lib/berth")]
        data_dir: PathBuf,

        /// Path to berth.toml; built-in defaults when absent.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Control plane to drive.
        #[arg(long, value_enum, default_value_t = ClusterKind::Kube)]
        cluster: ClusterKind,
    },

    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ClusterKind {
    /// A Kubernetes API server.
    Kube,
    /// An in-process control plane; state is lost on exit.
    Memory,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,berthd=debug,berth=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            config,
            cluster,
        } => {
            let config = load_config(config.as_deref())?;
            match cluster {
                ClusterKind::Kube => {
                    let cp = KubeControlPlane::connect(
                        config.cluster.kubeconfig.as_deref(),
                        &config.cluster.namespace,
                    )
                    .await
                    .context("connecting to the cluster")?;
                    serve(cp, &config, port, &data_dir).await
                }
                ClusterKind::Memory => {
                    warn!("using the in-memory control plane; cluster state is not persisted");
                    serve(MemoryControlPlane::new(), &config, port, &data_dir).await
                }
            }
        }
        Command::DefaultConfig => {
            print!("{}", BerthConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BerthConfig> {
    match path {
        Some(path) => {
            let config = BerthConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            info!(path = %path.display(), "configuration loaded");
            Ok(config)
        }
        None => {
            info!("no configuration file given, using defaults");
            Ok(BerthConfig::default())
        }
    }
}

async fn serve<C: ControlPlane>(
    cluster: C,
    config: &BerthConfig,
    port: u16,
    data_dir: &Path,
) -> anyhow::Result<()> {
    info!("Berth daemon starting");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let db_path = data_dir.join("berth.redb");
    let store = DeploymentStore::open(&db_path)?;
    info!(path = ?db_path, "record store opened");

    let catalog = config.build_catalog();
    info!(images = catalog.len(), "image catalog loaded");

    let orchestrator = Orchestrator::from_config(cluster, config);
    info!(
        namespace = %config.cluster.namespace,
        call_timeout = ?orchestrator.call_timeout(),
        retry_attempts = orchestrator.retry_policy().attempts,
        "orchestrator initialized"
    );

    let router = build_router(ApiState::new(store, orchestrator, catalog));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Berth daemon stopped");
    Ok(())
}
