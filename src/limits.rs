//! Best-effort node container resource limits.
//!
//! After a cluster comes up, the node containers get CPU and memory limits
//! via `docker update`. The whole step is advisory: a missing container (a
//! race with provisioning) or a failed update is recorded and logged, never
//! escalated into a creation failure.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{ClusterConfig, ResourceSpec};
use crate::docker::DockerClient;
use crate::{Error, Result};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

/// Parse a memory string into bytes.
///
/// Accepts `G`/`GB`, `M`/`MB`, `K`/`KB` suffixes (case-insensitive) with
/// fractional values; a bare number is taken as bytes already. Empty input
/// parses to zero.
pub fn parse_memory(memory: &str) -> Result<u64> {
    let upper = memory.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Ok(0);
    }

    let (number, multiplier) = if let Some(n) = strip_suffix(&upper, "GB", "G") {
        (n, GIB)
    } else if let Some(n) = strip_suffix(&upper, "MB", "M") {
        (n, MIB)
    } else if let Some(n) = strip_suffix(&upper, "KB", "K") {
        (n, KIB)
    } else {
        (upper.as_str(), 1)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| Error::validation(format!("invalid memory value: {memory}")))?;
    if value < 0.0 {
        return Err(Error::validation(format!(
            "memory value cannot be negative: {memory}"
        )));
    }
    Ok((value * multiplier as f64) as u64)
}

fn strip_suffix<'a>(value: &'a str, long: &str, short: &str) -> Option<&'a str> {
    value
        .strip_suffix(long)
        .or_else(|| value.strip_suffix(short))
}

/// Name of the control-plane container for a cluster
pub fn control_plane_container(cluster_name: &str) -> String {
    format!("{cluster_name}-control-plane")
}

/// Name of the Nth worker container (0-based index).
///
/// The first worker carries no suffix; later workers are numbered from 2,
/// matching kind's own naming (`demo-worker`, `demo-worker2`, ...).
pub fn worker_container(cluster_name: &str, index: u32) -> String {
    if index == 0 {
        format!("{cluster_name}-worker")
    } else {
        format!("{cluster_name}-worker{}", index + 1)
    }
}

/// What happened to one container during limit application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "reason")]
pub enum LimitOutcome {
    /// Limits were applied
    Applied,
    /// The container does not exist yet; skipped
    SkippedMissing,
    /// The update failed; creation proceeds anyway
    Failed(String),
}

/// Advisory record of limit application for one container.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitReport {
    /// Target container name
    pub container: String,
    /// Outcome for this container
    #[serde(flatten)]
    pub outcome: LimitOutcome,
}

/// Applies per-role resource limits to a cluster's node containers.
#[derive(Clone)]
pub struct ResourceLimiter {
    docker: DockerClient,
}

impl ResourceLimiter {
    /// Create a limiter driving the given docker client
    pub fn new(docker: DockerClient) -> Self {
        Self { docker }
    }

    /// Apply limits to the control plane and every worker container.
    ///
    /// Returns one advisory report per target; never fails the caller. When
    /// `apply_resource_limits` is off the step is skipped entirely.
    pub async fn apply(&self, config: &ClusterConfig, cluster_name: &str) -> Vec<LimitReport> {
        if !config.apply_resource_limits {
            info!("resource limits disabled, skipping");
            return Vec::new();
        }

        let mut reports = Vec::new();
        reports.push(
            self.apply_one(&control_plane_container(cluster_name), &config.control_plane)
                .await,
        );
        for index in 0..config.worker_nodes {
            reports.push(
                self.apply_one(&worker_container(cluster_name, index), &config.worker)
                    .await,
            );
        }
        reports
    }

    async fn apply_one(&self, container: &str, spec: &ResourceSpec) -> LimitReport {
        let outcome = self.try_apply(container, spec).await;
        match &outcome {
            LimitOutcome::Applied => {
                info!(container, cpu = %spec.cpu, memory = %spec.memory, "applied resource limits")
            }
            LimitOutcome::SkippedMissing => {
                warn!(container, "container not found, skipping resource limits")
            }
            LimitOutcome::Failed(reason) => {
                warn!(container, %reason, "failed to apply resource limits")
            }
        }
        LimitReport {
            container: container.to_string(),
            outcome,
        }
    }

    async fn try_apply(&self, container: &str, spec: &ResourceSpec) -> LimitOutcome {
        let memory_bytes = match parse_memory(&spec.memory) {
            Ok(bytes) => bytes,
            Err(err) => return LimitOutcome::Failed(err.to_string()),
        };
        // Swap limit is always twice the memory limit
        let memory_swap = memory_bytes * 2;

        let filter = format!("name={container}");
        match self.docker.containers(true, Some(&filter)).await {
            Ok(containers) if containers.is_empty() => LimitOutcome::SkippedMissing,
            Ok(_) => match self
                .docker
                .update_container(container, &spec.cpu, memory_bytes, memory_swap)
                .await
            {
                Ok(_) => LimitOutcome::Applied,
                Err(err) => LimitOutcome::Failed(err.to_string()),
            },
            Err(err) => LimitOutcome::Failed(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::exec::mock::MockRunner;
    use crate::exec::{CommandResult, CommandRunner};

    #[test]
    fn parses_memory_suffixes_to_bytes() {
        assert_eq!(parse_memory("2GB").unwrap(), 2147483648);
        assert_eq!(parse_memory("512MB").unwrap(), 536870912);
        assert_eq!(parse_memory("1024").unwrap(), 1024);
        assert_eq!(parse_memory("2g").unwrap(), 2147483648);
        assert_eq!(parse_memory("256K").unwrap(), 262144);
        assert_eq!(parse_memory("1.5G").unwrap(), 1610612736);
        assert_eq!(parse_memory("").unwrap(), 0);
    }

    #[test]
    fn rejects_unparseable_memory() {
        assert!(parse_memory("lots").is_err());
        assert!(parse_memory("G").is_err());
        assert!(parse_memory("-1G").is_err());
    }

    #[test]
    fn worker_naming_matches_kind_enumeration() {
        // One worker: unsuffixed
        assert_eq!(worker_container("demo", 0), "demo-worker");
        // Two through four workers: numbered from 2
        assert_eq!(worker_container("demo", 1), "demo-worker2");
        assert_eq!(worker_container("demo", 2), "demo-worker3");
        assert_eq!(worker_container("demo", 3), "demo-worker4");
        assert_eq!(control_plane_container("demo"), "demo-control-plane");
    }

    fn limiter(mock: &Arc<MockRunner>) -> ResourceLimiter {
        ResourceLimiter::new(DockerClient::new(mock.clone() as Arc<dyn CommandRunner>))
    }

    fn config_with_workers(workers: u32) -> ClusterConfig {
        ClusterConfig {
            worker_nodes: workers,
            ..ClusterConfig::default()
        }
    }

    #[tokio::test]
    async fn disabled_limits_skip_everything() {
        let mock = Arc::new(MockRunner::new());
        let config = ClusterConfig {
            apply_resource_limits: false,
            ..ClusterConfig::default()
        };
        let reports = limiter(&mock).apply(&config, "demo").await;
        assert!(reports.is_empty());
        assert!(mock.commands().is_empty());
    }

    #[tokio::test]
    async fn applies_limits_with_doubled_swap() {
        let mock = Arc::new(MockRunner::new());
        mock.add_result(
            "docker ps",
            CommandResult::succeeded("{\"ID\":\"abc\",\"Names\":\"demo-control-plane\"}\n"),
        );
        mock.add_result("docker update", CommandResult::succeeded(""));

        let reports = limiter(&mock).apply(&config_with_workers(1), "demo").await;
        assert_eq!(reports.len(), 2);
        assert!(reports
            .iter()
            .all(|r| r.outcome == LimitOutcome::Applied));

        // Default 2GB memory, swap doubled
        let updates: Vec<String> = mock
            .commands()
            .into_iter()
            .filter(|c| c.contains("docker update"))
            .collect();
        assert_eq!(
            updates[0],
            "docker update --cpus 1 --memory 2147483648 --memory-swap 4294967296 demo-control-plane"
        );
        assert_eq!(
            updates[1],
            "docker update --cpus 1 --memory 2147483648 --memory-swap 4294967296 demo-worker"
        );
    }

    #[tokio::test]
    async fn missing_container_is_skipped_not_failed() {
        let mock = Arc::new(MockRunner::new());
        mock.add_result(
            "name=demo-control-plane",
            CommandResult::succeeded("{\"ID\":\"abc\",\"Names\":\"demo-control-plane\"}\n"),
        );
        // Worker container not created yet
        mock.add_result("name=demo-worker", CommandResult::succeeded(""));
        mock.add_result("docker update", CommandResult::succeeded(""));

        let reports = limiter(&mock).apply(&config_with_workers(1), "demo").await;
        assert_eq!(reports[0].outcome, LimitOutcome::Applied);
        assert_eq!(reports[1].outcome, LimitOutcome::SkippedMissing);
        assert_eq!(mock.count_matching("docker update"), 1);
    }

    #[tokio::test]
    async fn failed_update_is_advisory() {
        let mock = Arc::new(MockRunner::new());
        mock.add_result(
            "docker ps",
            CommandResult::succeeded("{\"ID\":\"abc\",\"Names\":\"demo-control-plane\"}\n"),
        );
        mock.add_result(
            "docker update",
            CommandResult::failed(1, "Cannot update container: conflicting options"),
        );

        let reports = limiter(&mock).apply(&config_with_workers(0), "demo").await;
        assert_eq!(reports.len(), 1);
        match &reports[0].outcome {
            LimitOutcome::Failed(reason) => assert!(reason.contains("conflicting options")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unparseable_memory_is_advisory() {
        let mock = Arc::new(MockRunner::new());
        let config = ClusterConfig {
            worker_nodes: 0,
            control_plane: ResourceSpec {
                cpu: "1".into(),
                memory: "plenty".into(),
            },
            ..ClusterConfig::default()
        };

        let reports = limiter(&mock).apply(&config, "demo").await;
        assert!(matches!(reports[0].outcome, LimitOutcome::Failed(_)));
        // No docker calls for an unparseable spec
        assert!(mock.commands().is_empty());
    }
}
