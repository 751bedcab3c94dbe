//! Kindling CLI - disposable local Kubernetes clusters

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kindling::cluster::ClusterManager;
use kindling::config::{ClusterConfig, EnvironmentConfig};
use kindling::exec::{CommandRunner, SubprocessRunner};
use kindling::kind::KindClient;

/// Kindling - ephemeral local Kubernetes clusters backed by kind
#[derive(Parser, Debug)]
#[command(name = "kindling", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a cluster (no-op if it already exists)
    Create(ClusterArgs),

    /// Delete a cluster (no-op if it does not exist)
    Delete(ClusterArgs),

    /// Report aggregate cluster health as JSON
    Status(ClusterArgs),

    /// Report per-node information and utilization as JSON
    Info(ClusterArgs),

    /// Install an ingress controller into the cluster
    Ingress(IngressArgs),

    /// Export the cluster's kubeconfig
    Kubeconfig(KubeconfigArgs),
}

/// Arguments identifying a cluster
#[derive(Args, Debug)]
struct ClusterArgs {
    /// Cluster name; defaults to kind-cluster-{namespace}
    #[arg(short, long)]
    name: Option<String>,

    /// Path to a cluster configuration YAML file
    #[arg(short = 'f', long = "config")]
    config_file: Option<PathBuf>,

    /// Number of worker nodes
    #[arg(short, long)]
    workers: Option<u32>,

    /// Skip applying resource limits to node containers
    #[arg(long)]
    no_resource_limits: bool,

    /// Kubernetes namespace label for the environment
    #[arg(long, env = "KINDLING_NAMESPACE", default_value = "dev")]
    namespace: String,

    /// Environment label (e.g. dev, staging)
    #[arg(long, env = "KINDLING_ENVIRONMENT", default_value = "dev")]
    environment: String,
}

/// Ingress installation arguments
#[derive(Args, Debug)]
struct IngressArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Ingress controller type
    #[arg(long = "type", default_value = "nginx")]
    ingress_type: String,
}

/// Kubeconfig export arguments
#[derive(Args, Debug)]
struct KubeconfigArgs {
    #[command(flatten)]
    cluster: ClusterArgs,

    /// Write the kubeconfig to this path instead of the default location
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl ClusterArgs {
    fn cluster_config(&self) -> anyhow::Result<ClusterConfig> {
        let mut config = match &self.config_file {
            Some(path) => ClusterConfig::from_yaml_file(path)?,
            None => ClusterConfig::default(),
        };
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(workers) = self.workers {
            config.worker_nodes = workers;
        }
        if self.no_resource_limits {
            config.apply_resource_limits = false;
        }
        Ok(config)
    }

    fn environment_config(&self) -> EnvironmentConfig {
        EnvironmentConfig {
            environment: self.environment.clone(),
            namespace: self.namespace.clone(),
        }
    }

    fn manager(&self) -> anyhow::Result<ClusterManager> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SubprocessRunner::new());
        Ok(ClusterManager::new(
            self.cluster_config()?,
            self.environment_config(),
            runner,
        )?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Create(args) => {
            let manager = args.manager()?;
            let outcome = manager.create().await?;
            if outcome.already_existed {
                println!(
                    "Cluster '{}' already exists, skipped creation",
                    outcome.cluster
                );
            } else if outcome.ready {
                println!("Cluster '{}' created and ready", outcome.cluster);
            } else {
                println!(
                    "Cluster '{}' created but did not become ready in time",
                    outcome.cluster
                );
            }
            if let Some(ports) = outcome.ports {
                println!(
                    "Host ports - HTTP: {}, HTTPS: {}, NodePort: {}",
                    ports.http, ports.https, ports.node_port
                );
            }
            if !outcome.ready {
                std::process::exit(1);
            }
        }
        Commands::Delete(args) => {
            let manager = args.manager()?;
            manager.delete().await?;
            println!("Cluster '{}' deleted", manager.cluster_name());
        }
        Commands::Status(args) => {
            let manager = args.manager()?;
            let report = manager.check_health().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Info(args) => {
            let manager = args.manager()?;
            let report = manager.get_info().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Ingress(args) => {
            let manager = args.cluster.manager()?;
            manager.install_ingress(&args.ingress_type).await?;
            println!(
                "Installed {} ingress controller in cluster '{}'",
                args.ingress_type,
                manager.cluster_name()
            );
        }
        Commands::Kubeconfig(args) => {
            let manager = args.cluster.manager()?;
            let runner: Arc<dyn CommandRunner> = Arc::new(SubprocessRunner::new());
            let kind = KindClient::new(runner);
            kind.export_kubeconfig(manager.cluster_name(), args.output.as_deref())
                .await?;
            println!(
                "Exported kubeconfig for cluster '{}'",
                manager.cluster_name()
            );
        }
    }

    Ok(())
}
