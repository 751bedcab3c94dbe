//! Cluster lifecycle orchestration.
//!
//! [`ClusterManager`] composes the tool clients, port negotiation, topology
//! generation, and resource limits into the full lifecycle: create, delete,
//! readiness wait, health check, info, ingress installation, and port
//! forwarding. Operations are idempotent where the external state allows it —
//! existence is always re-derived from the provisioning tool, never cached.
//!
//! A manager is not safe for concurrent use against the same cluster name;
//! callers running several managers in parallel must give each its own name.
//!
//! # Example
//!
//! ```ignore
//! use kindling::cluster::ClusterManager;
//!
//! let manager = ClusterManager::new(cluster_config, env_config, runner)?;
//! manager
//!     .scoped(|cluster| async move {
//!         cluster.install_ingress("nginx").await?;
//!         // run tests against the cluster
//!         Ok(())
//!     })
//!     .await?;
//! // the cluster is gone again, unless it already existed beforehand
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

use crate::config::{ClusterConfig, EnvironmentConfig};
use crate::docker::DockerClient;
use crate::error::remediation_hint;
use crate::exec::CommandRunner;
use crate::kind::KindClient;
use crate::kubectl::{KubectlClient, KubectlTarget};
use crate::limits::{LimitReport, ResourceLimiter};
use crate::ports::{PortNegotiator, ResolvedPorts};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::topology::ClusterTopology;
use crate::{Error, ErrorKind, Result};

/// Readiness poll interval
const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Readiness budget during creation
const CREATE_READY_TIMEOUT: Duration = Duration::from_secs(120);
/// Grace period before checking that a port-forward process survived startup
const PORT_FORWARD_GRACE: Duration = Duration::from_secs(1);

/// Upstream NGINX ingress manifest for kind clusters
const NGINX_INGRESS_MANIFEST: &str =
    "https://raw.githubusercontent.com/kubernetes/ingress-nginx/main/deploy/static/provider/kind/deploy.yaml";

const CREATE_POLICY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    initial_delay: Duration::from_secs(2),
    backoff_multiplier: 2.0,
    retry_on: &[
        ErrorKind::DockerNotRunning,
        ErrorKind::ToolNotInstalled,
        ErrorKind::ClusterOperation,
    ],
};

const PORT_POLICY: RetryPolicy = RetryPolicy {
    max_attempts: 3,
    initial_delay: Duration::from_secs(2),
    backoff_multiplier: 2.0,
    retry_on: &[
        ErrorKind::DockerNotRunning,
        ErrorKind::ToolNotInstalled,
        ErrorKind::ClusterOperation,
    ],
};

const DELETE_POLICY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    initial_delay: Duration::from_secs(1),
    backoff_multiplier: 2.0,
    retry_on: &[ErrorKind::ClusterOperation],
};

const INGRESS_POLICY: RetryPolicy = RetryPolicy {
    max_attempts: 2,
    initial_delay: Duration::from_secs(5),
    backoff_multiplier: 2.0,
    retry_on: &[ErrorKind::ClusterOperation],
};

/// Composite result of a create call.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutcome {
    /// The cluster name
    pub cluster: String,
    /// True when the cluster was already present and creation was skipped
    pub already_existed: bool,
    /// True when every node reported Ready within the readiness budget
    pub ready: bool,
    /// Negotiated host ports; absent for a pre-existing cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ports: Option<ResolvedPorts>,
    /// Advisory resource-limit reports, one per node container
    pub limits: Vec<LimitReport>,
}

/// Aggregate cluster health.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every node is Ready
    Healthy,
    /// At least one node is not Ready
    Degraded,
    /// The cluster could not be queried
    Unavailable,
}

/// Readiness of a single node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct NodeHealth {
    /// Whether the node's Ready condition is `"True"`
    pub ready: bool,
}

/// Supporting detail for a health report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HealthDetails {
    /// Per-node readiness keyed by node name
    Nodes {
        /// Node readiness map
        nodes: BTreeMap<String, NodeHealth>,
    },
    /// The error that prevented a node listing
    Error {
        /// Query failure message
        error: String,
    },
}

/// Health report for a cluster.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    /// Aggregate status
    pub status: HealthStatus,
    /// Per-node detail or the query error
    pub details: HealthDetails,
    /// Human-readable issues, empty when healthy
    pub issues: Vec<String>,
}

impl HealthReport {
    fn unavailable(error: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unavailable,
            details: HealthDetails::Error {
                error: error.into(),
            },
            issues: vec![issue.into()],
        }
    }
}

/// Information about one cluster node, enriched with utilization.
#[derive(Clone, Debug, Serialize)]
pub struct NodeInfo {
    /// Node name
    pub name: String,
    /// `control-plane` or `worker`, derived from the node name
    pub role: String,
    /// Node status
    pub status: String,
    /// CPU utilization percentage
    pub cpu: u32,
    /// Memory utilization percentage
    pub memory: u32,
    /// Disk utilization percentage; kind does not surface this
    pub disk: u32,
    /// Kubelet version
    pub version: String,
}

/// Cluster information report.
#[derive(Clone, Debug, Serialize)]
pub struct InfoReport {
    /// Nodes with a utilization sample; nodes missing from the metrics
    /// snapshot are omitted
    pub nodes: Vec<NodeInfo>,
    /// Query failure, when the node listing itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A running `kubectl port-forward` process.
///
/// The child is killed when the handle is dropped or [`stop`](Self::stop) is
/// called.
#[derive(Debug)]
pub struct PortForward {
    child: tokio::process::Child,
    resource: String,
}

impl PortForward {
    /// The resource being forwarded to
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Terminate the forwarding process
    pub async fn stop(mut self) {
        if let Err(err) = self.child.kill().await {
            warn!(resource = %self.resource, %err, "failed to kill port-forward process");
        }
    }
}

/// Orchestrates the lifecycle of one kind cluster.
pub struct ClusterManager {
    config: ClusterConfig,
    env: EnvironmentConfig,
    cluster_name: String,
    docker: DockerClient,
    kind: KindClient,
    kubectl: KubectlClient,
    negotiator: PortNegotiator,
    limiter: ResourceLimiter,
    /// Whether this instance performed the external create
    created: AtomicBool,
}

impl ClusterManager {
    /// Create a manager for the configured cluster.
    ///
    /// An empty configured name defaults to `kind-cluster-{namespace}`.
    pub fn new(
        config: ClusterConfig,
        env: EnvironmentConfig,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        config.validate()?;
        let cluster_name = if config.name.is_empty() {
            format!("kind-cluster-{}", env.namespace)
        } else {
            config.name.clone()
        };

        let docker = DockerClient::new(runner.clone());
        Ok(Self {
            limiter: ResourceLimiter::new(docker.clone()),
            docker,
            kind: KindClient::new(runner.clone()),
            kubectl: KubectlClient::new(runner.clone()),
            negotiator: PortNegotiator::new(runner),
            config,
            env,
            cluster_name,
            created: AtomicBool::new(false),
        })
    }

    /// The cluster name this manager operates on
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// The environment this manager was configured with
    pub fn environment(&self) -> &EnvironmentConfig {
        &self.env
    }

    /// Whether this instance created the cluster (and therefore owns cleanup)
    pub fn owns_cluster(&self) -> bool {
        self.created.load(Ordering::Relaxed)
    }

    /// The kubectl context for this cluster
    pub fn context_name(&self) -> String {
        format!("kind-{}", self.cluster_name)
    }

    /// Create the cluster, idempotently.
    ///
    /// Verifies docker and kind are available, skips creation when the name
    /// already exists, negotiates host ports, provisions the topology, applies
    /// best-effort resource limits, and waits up to two minutes for readiness.
    /// A readiness timeout is reported in the outcome rather than raised.
    /// Transient failures are retried with backoff.
    pub async fn create(&self) -> Result<CreateOutcome> {
        retry_with_backoff(&CREATE_POLICY, "create cluster", || self.create_once()).await
    }

    async fn create_once(&self) -> Result<CreateOutcome> {
        if !self.docker.is_running().await {
            return Err(Error::DockerNotRunning(
                "docker is not running or not accessible. Start the Docker daemon and retry"
                    .to_string(),
            ));
        }
        if !self.kind.is_installed().await {
            return Err(Error::tool_not_installed(
                "kind",
                "install kind: https://kind.sigs.k8s.io/docs/user/quick-start/#installation",
            ));
        }

        let existing = self
            .kind
            .clusters()
            .await
            .map_err(|err| Error::cluster_operation(format!("failed to list clusters: {err}")))?;
        if existing.iter().any(|name| name == &self.cluster_name) {
            info!(cluster = %self.cluster_name, "cluster already exists, skipping creation");
            // Not ours to delete later
            return Ok(CreateOutcome {
                cluster: self.cluster_name.clone(),
                already_existed: true,
                ready: true,
                ports: None,
                limits: Vec::new(),
            });
        }

        match self.provision().await {
            Ok(outcome) => Ok(outcome),
            // Precondition failures keep their kind so the outer retry sees them
            Err(err @ Error::DockerNotRunning(_)) | Err(err @ Error::ToolNotInstalled { .. }) => {
                Err(err)
            }
            Err(err) => Err(self.fail_creation(err).await),
        }
    }

    async fn provision(&self) -> Result<CreateOutcome> {
        let request = self.config.port_request();
        let ports = retry_with_backoff(&PORT_POLICY, "negotiate ports", || {
            self.negotiator.negotiate(request)
        })
        .await?;

        let topology = ClusterTopology::build(self.config.worker_nodes, &ports);
        let config_file = tempfile::Builder::new()
            .prefix(&format!("kind-config-{}-", self.cluster_name))
            .suffix(".yaml")
            .tempfile()?;
        tokio::fs::write(config_file.path(), topology.to_yaml()?).await?;

        info!(cluster = %self.cluster_name, workers = self.config.worker_nodes, "creating cluster");
        self.kind
            .create_cluster(&self.cluster_name, config_file.path())
            .await?;

        let limits = self.limiter.apply(&self.config, &self.cluster_name).await;

        let ready = self.wait_for_ready(CREATE_READY_TIMEOUT).await;
        if ready {
            info!(cluster = %self.cluster_name, "cluster created successfully");
            self.created.store(true, Ordering::Relaxed);
        } else {
            warn!(cluster = %self.cluster_name, "cluster was created but is not ready");
        }

        Ok(CreateOutcome {
            cluster: self.cluster_name.clone(),
            already_existed: false,
            ready,
            ports: Some(ports),
            limits,
        })
    }

    /// Translate a provisioning failure: log a remediation hint when the
    /// error text matches a known condition, attempt a compensating delete,
    /// and surface everything as a cluster-operation failure with the
    /// original cause preserved.
    async fn fail_creation(&self, err: Error) -> Error {
        let cause = err.to_string();
        error!(cluster = %self.cluster_name, error = %cause, "failed to create cluster");

        let mut message = format!("failed to create cluster '{}': {cause}", self.cluster_name);
        if let Some(hint) = remediation_hint(&cause) {
            error!(%hint, "remediation");
            message = format!("{message} ({hint})");
        }

        if let Err(cleanup) = self.kind.delete_cluster(&self.cluster_name).await {
            warn!(cluster = %self.cluster_name, error = %cleanup, "cleanup delete failed");
        }

        Error::ClusterOperation(message)
    }

    /// Delete the cluster, idempotently.
    ///
    /// Deleting a cluster that does not exist is a success. Clears the
    /// ownership flag either way.
    pub async fn delete(&self) -> Result<()> {
        retry_with_backoff(&DELETE_POLICY, "delete cluster", || self.delete_once()).await
    }

    async fn delete_once(&self) -> Result<()> {
        let existing = self
            .kind
            .clusters()
            .await
            .map_err(|err| Error::cluster_operation(format!("failed to list clusters: {err}")))?;
        if !existing.iter().any(|name| name == &self.cluster_name) {
            warn!(cluster = %self.cluster_name, "cluster does not exist, nothing to delete");
            self.created.store(false, Ordering::Relaxed);
            return Ok(());
        }

        info!(cluster = %self.cluster_name, "deleting cluster");
        self.kind
            .delete_cluster(&self.cluster_name)
            .await
            .map_err(|err| {
                Error::cluster_operation(format!(
                    "failed to delete cluster '{}': {err}",
                    self.cluster_name
                ))
            })?;
        self.created.store(false, Ordering::Relaxed);
        info!(cluster = %self.cluster_name, "cluster deleted");
        Ok(())
    }

    /// Poll until every node reports Ready, or `timeout` elapses.
    ///
    /// Query failures during the loop are logged and treated as not-yet-ready.
    pub async fn wait_for_ready(&self, timeout: Duration) -> bool {
        info!(cluster = %self.cluster_name, timeout_secs = timeout.as_secs(), "waiting for cluster to be ready");
        let context = self.context_name();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self
                .kubectl
                .node_ready_statuses(KubectlTarget::context(&context))
                .await
            {
                Ok(statuses)
                    if !statuses.is_empty() && statuses.iter().all(|s| s == "True") =>
                {
                    info!(cluster = %self.cluster_name, "all nodes are ready");
                    return true;
                }
                Ok(statuses) => {
                    info!(cluster = %self.cluster_name, ?statuses, "waiting for nodes to be ready")
                }
                Err(err) => {
                    warn!(cluster = %self.cluster_name, %err, "error checking node readiness")
                }
            }

            if tokio::time::Instant::now() + READY_POLL_INTERVAL >= deadline {
                warn!(cluster = %self.cluster_name, "timeout waiting for cluster to be ready");
                return false;
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Aggregate node readiness into a health report.
    pub async fn check_health(&self) -> HealthReport {
        let context = self.context_name();
        let nodes = match self
            .kubectl
            .node_names_and_ready(KubectlTarget::context(&context))
            .await
        {
            Ok(nodes) => nodes,
            Err(err) => {
                return HealthReport::unavailable(err.to_string(), "Cannot connect to cluster")
            }
        };

        if nodes.is_empty() {
            return HealthReport::unavailable("No nodes found", "No nodes found in cluster");
        }

        let mut details = BTreeMap::new();
        let mut issues = Vec::new();
        for (name, status) in nodes {
            let ready = status == "True";
            if !ready {
                issues.push(format!("Node {name} not ready"));
            }
            details.insert(name, NodeHealth { ready });
        }

        HealthReport {
            status: if issues.is_empty() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            details: HealthDetails::Nodes { nodes: details },
            issues,
        }
    }

    /// Gather node information enriched with a utilization snapshot.
    ///
    /// Degrades gracefully: a failed metrics query yields an empty node list
    /// rather than an error, and nodes absent from the snapshot are omitted.
    pub async fn get_info(&self) -> InfoReport {
        let context = self.context_name();
        let target = KubectlTarget::context(&context);

        let versions = match self.kubectl.node_versions(target).await {
            Ok(versions) => versions,
            Err(err) => {
                error!(cluster = %self.cluster_name, %err, "failed to get cluster info");
                return InfoReport {
                    nodes: Vec::new(),
                    error: Some(err.to_string()),
                };
            }
        };
        let versions: BTreeMap<String, String> = versions.into_iter().collect();

        let usage = self.kubectl.top_nodes(target).await.unwrap_or_default();

        let nodes = usage
            .into_iter()
            .map(|sample| {
                let role = if sample.name.contains("control-plane") {
                    "control-plane"
                } else {
                    "worker"
                };
                let version = versions
                    .get(&sample.name)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string());
                NodeInfo {
                    role: role.to_string(),
                    status: "Ready".to_string(),
                    cpu: sample.cpu_percent,
                    memory: sample.memory_percent,
                    disk: 0,
                    version,
                    name: sample.name,
                }
            })
            .collect();

        InfoReport { nodes, error: None }
    }

    /// Install an ingress controller.
    ///
    /// Only the NGINX controller is supported; any other type is a validation
    /// error. Applies the upstream manifest, then waits for the controller
    /// pods to become ready.
    pub async fn install_ingress(&self, ingress_type: &str) -> Result<()> {
        if !ingress_type.eq_ignore_ascii_case("nginx") {
            return Err(Error::validation(format!(
                "unsupported ingress type: {ingress_type}. Supported types: nginx"
            )));
        }

        info!(cluster = %self.cluster_name, "installing nginx ingress controller");
        retry_with_backoff(&INGRESS_POLICY, "install ingress", || self.install_nginx()).await
    }

    async fn install_nginx(&self) -> Result<()> {
        let context = self.context_name();
        let target = KubectlTarget::context(&context);

        self.kubectl
            .apply(&[NGINX_INGRESS_MANIFEST], target)
            .await
            .map_err(|err| {
                Error::cluster_operation(format!("failed to apply ingress manifest: {err}"))
            })?;

        info!("waiting for nginx ingress controller to be ready");
        self.kubectl
            .wait_for_condition(
                "pod",
                "Ready",
                Some("app.kubernetes.io/component=controller"),
                "90s",
                target.in_namespace("ingress-nginx"),
            )
            .await
            .map_err(|err| {
                Error::cluster_operation(format!(
                    "ingress controller pods did not become ready: {err}"
                ))
            })?;

        info!("nginx ingress controller is ready");
        Ok(())
    }

    /// Start forwarding a local port to a pod or service.
    ///
    /// `resource` is e.g. `svc/my-service`, `mapping` e.g. `8080:80`. After a
    /// short grace period, a process that already exited is reported as a
    /// failure with its captured stderr.
    pub async fn port_forward(&self, resource: &str, mapping: &str) -> Result<PortForward> {
        let context_arg = format!("--context={}", self.context_name());
        info!(resource, mapping, "starting port forwarding");

        let mut child = tokio::process::Command::new("kubectl")
            .args(["port-forward", resource, mapping, &context_arg])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        tokio::time::sleep(PORT_FORWARD_GRACE).await;

        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            return Err(Error::cluster_operation(format!(
                "failed to establish port forwarding to {resource} (exit {status}): {}",
                stderr.trim()
            )));
        }

        Ok(PortForward {
            child,
            resource: resource.to_string(),
        })
    }

    /// Run `f` with a live cluster, cleaning up afterwards.
    ///
    /// Creates the cluster (idempotently), invokes the closure, then deletes
    /// the cluster — but only when this instance created it, so a
    /// pre-existing cluster survives the scope. Delete failures during
    /// cleanup are logged, not raised, to keep the closure's result.
    pub async fn scoped<'a, T, Fut>(&'a self, f: impl FnOnce(&'a Self) -> Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>> + 'a,
    {
        self.create().await?;
        let result = f(self).await;

        if self.owns_cluster() {
            if let Err(err) = self.delete().await {
                error!(cluster = %self.cluster_name, %err, "failed to delete cluster on scope exit");
            }
        }

        result
    }
}
