//! Docker CLI client.
//!
//! Thin typed wrapper over the `docker` command line for the three operations
//! the orchestrator needs: daemon reachability, container listing, and
//! resource-limit updates.

use std::sync::Arc;

use serde::Deserialize;

use crate::exec::{CommandResult, CommandRunner, RunOptions};
use crate::{Error, Result};

/// One entry from `docker ps --format json`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ContainerSummary {
    /// Container id
    #[serde(rename = "ID", default)]
    pub id: String,
    /// Container name(s)
    #[serde(rename = "Names", default)]
    pub names: String,
    /// Container state (e.g. `running`, `exited`)
    #[serde(rename = "State", default)]
    pub state: String,
}

/// Client for the `docker` CLI.
#[derive(Clone)]
pub struct DockerClient {
    runner: Arc<dyn CommandRunner>,
}

impl DockerClient {
    /// Create a client executing through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, args: &[&str], check: bool) -> Result<CommandResult> {
        let mut argv = vec!["docker".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let opts = RunOptions {
            check,
            ..RunOptions::default()
        };
        self.runner.run(&argv, opts).await
    }

    /// Whether the Docker daemon is reachable
    pub async fn is_running(&self) -> bool {
        self.run(&["ps"], false)
            .await
            .map(|result| result.success())
            .unwrap_or(false)
    }

    /// List containers, optionally including stopped ones and filtered by a
    /// `docker ps --filter` expression (e.g. `name=demo-worker`).
    pub async fn containers(
        &self,
        all_containers: bool,
        filter: Option<&str>,
    ) -> Result<Vec<ContainerSummary>> {
        let mut args = vec!["ps", "--format", "json"];
        if all_containers {
            args.push("--all");
        }
        if let Some(filter) = filter {
            args.push("--filter");
            args.push(filter);
        }

        let result = self.run(&args, true).await?;
        parse_containers(&result.stdout)
    }

    /// Update a container's CPU, memory, and swap limits.
    ///
    /// Memory values are raw byte counts, as `docker update` accepts them.
    pub async fn update_container(
        &self,
        container: &str,
        cpu_limit: &str,
        memory_bytes: u64,
        memory_swap_bytes: u64,
    ) -> Result<CommandResult> {
        let memory = memory_bytes.to_string();
        let swap = memory_swap_bytes.to_string();
        self.run(
            &[
                "update",
                "--cpus",
                cpu_limit,
                "--memory",
                &memory,
                "--memory-swap",
                &swap,
                container,
            ],
            true,
        )
        .await
    }
}

/// Parse `docker ps --format json` output: one JSON object per line on
/// current docker versions, a JSON array on some older ones.
fn parse_containers(stdout: &str) -> Result<Vec<ContainerSummary>> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| Error::cluster_operation(format!("invalid docker ps output: {e}")));
    }

    trimmed
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| Error::cluster_operation(format!("invalid docker ps output: {e}")))
        })
        .collect()
}
