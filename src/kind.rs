//! kind CLI client.
//!
//! Wraps the `kind` provisioning tool: installation check, cluster listing,
//! create/delete, and kubeconfig export. Cluster existence is always
//! re-derived from `kind get clusters`; no state is cached here.

use std::path::Path;
use std::sync::Arc;

use crate::exec::{CommandResult, CommandRunner, RunOptions};
use crate::Result;

/// Client for the `kind` CLI.
#[derive(Clone)]
pub struct KindClient {
    runner: Arc<dyn CommandRunner>,
}

impl KindClient {
    /// Create a client executing through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, args: &[&str], check: bool) -> Result<CommandResult> {
        let mut argv = vec!["kind".to_string()];
        argv.extend(args.iter().map(|s| s.to_string()));
        let opts = RunOptions {
            check,
            ..RunOptions::default()
        };
        self.runner.run(&argv, opts).await
    }

    /// Whether the kind binary is installed and runnable
    pub async fn is_installed(&self) -> bool {
        self.run(&["version"], false)
            .await
            .map(|result| result.success())
            .unwrap_or(false)
    }

    /// Names of existing kind clusters
    pub async fn clusters(&self) -> Result<Vec<String>> {
        let result = self.run(&["get", "clusters"], true).await?;
        Ok(result
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Create a cluster from a topology config file
    pub async fn create_cluster(&self, name: &str, config_file: &Path) -> Result<CommandResult> {
        self.run(
            &[
                "create",
                "cluster",
                "--name",
                name,
                "--config",
                &config_file.display().to_string(),
            ],
            true,
        )
        .await
    }

    /// Delete a cluster by name
    pub async fn delete_cluster(&self, name: &str) -> Result<CommandResult> {
        self.run(&["delete", "cluster", "--name", name], true).await
    }

    /// Export the kubeconfig for a cluster, optionally to a specific path
    pub async fn export_kubeconfig(
        &self,
        name: &str,
        path: Option<&Path>,
    ) -> Result<CommandResult> {
        let path_arg = path.map(|p| p.display().to_string());
        let mut args = vec!["export", "kubeconfig", "--name", name];
        if let Some(path) = path_arg.as_deref() {
            args.push("--kubeconfig");
            args.push(path);
        }
        self.run(&args, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockRunner;

    fn client(mock: &Arc<MockRunner>) -> KindClient {
        KindClient::new(mock.clone() as Arc<dyn CommandRunner>)
    }

    #[tokio::test]
    async fn clusters_parses_one_name_per_line() {
        let mock = Arc::new(MockRunner::new());
        mock.add_result(
            "kind get clusters",
            CommandResult::succeeded("alpha\nbeta\n"),
        );
        let clusters = client(&mock).clusters().await.unwrap();
        assert_eq!(clusters, vec!["alpha".to_string(), "beta".to_string()]);
    }

    #[tokio::test]
    async fn empty_listing_means_no_clusters() {
        let mock = Arc::new(MockRunner::new());
        // kind prints "No kind clusters found." to stderr, stdout stays empty
        mock.add_result(
            "kind get clusters",
            CommandResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: "No kind clusters found.\n".to_string(),
            },
        );
        assert!(client(&mock).clusters().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_and_delete_build_expected_argv() {
        let mock = Arc::new(MockRunner::new());
        mock.set_default(CommandResult::succeeded(""));
        let client = client(&mock);

        client
            .create_cluster("demo", Path::new("/tmp/kind-config-demo.yaml"))
            .await
            .unwrap();
        client.delete_cluster("demo").await.unwrap();
        client.export_kubeconfig("demo", None).await.unwrap();

        let commands = mock.commands();
        assert_eq!(
            commands[0],
            "kind create cluster --name demo --config /tmp/kind-config-demo.yaml"
        );
        assert_eq!(commands[1], "kind delete cluster --name demo");
        assert_eq!(commands[2], "kind export kubeconfig --name demo");
    }
}
