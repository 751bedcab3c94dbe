//! kubectl CLI client.
//!
//! Wraps the cluster query tool: node readiness and name extraction via
//! jsonpath, resource-utilization snapshots, manifest application, and
//! condition waits. Context, namespace, and kubeconfig are threaded through
//! [`KubectlTarget`]; the kubeconfig travels as a `KUBECONFIG` environment
//! override rather than a flag, matching how the surrounding tools expect it.

use std::sync::Arc;

use crate::exec::{CommandResult, CommandRunner, RunOptions};
use crate::Result;

/// Jsonpath extracting every node's Ready condition status
const READY_STATUS_JSONPATH: &str =
    "-o=jsonpath='{.items[*].status.conditions[?(@.type==\"Ready\")].status}'";

/// Jsonpath extracting node names followed by their Ready condition statuses
const NAMES_AND_READY_JSONPATH: &str = "-o=jsonpath='{.items[*].metadata.name} {.items[*].status.conditions[?(@.type==\"Ready\")].status}'";

/// Where a kubectl invocation is aimed.
#[derive(Clone, Copy, Debug, Default)]
pub struct KubectlTarget<'a> {
    /// Kubernetes context (e.g. `kind-demo`)
    pub context: Option<&'a str>,
    /// Namespace for namespaced operations
    pub namespace: Option<&'a str>,
    /// Kubeconfig path, passed via the `KUBECONFIG` environment variable
    pub kubeconfig: Option<&'a str>,
}

impl<'a> KubectlTarget<'a> {
    /// Target a specific context
    pub fn context(context: &'a str) -> Self {
        Self {
            context: Some(context),
            ..Self::default()
        }
    }

    /// Narrow this target to a namespace
    pub fn in_namespace(self, namespace: &'a str) -> Self {
        Self {
            namespace: Some(namespace),
            ..self
        }
    }
}

/// Per-node utilization from `kubectl top nodes`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeUsage {
    /// Node name
    pub name: String,
    /// CPU utilization percentage
    pub cpu_percent: u32,
    /// Memory utilization percentage
    pub memory_percent: u32,
}

/// Client for the `kubectl` CLI.
#[derive(Clone)]
pub struct KubectlClient {
    runner: Arc<dyn CommandRunner>,
}

impl KubectlClient {
    /// Create a client executing through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Run a kubectl command against `target`.
    pub async fn run(
        &self,
        args: &[&str],
        target: KubectlTarget<'_>,
        check: bool,
    ) -> Result<CommandResult> {
        let mut argv = vec!["kubectl".to_string()];
        if let Some(context) = target.context {
            argv.push("--context".to_string());
            argv.push(context.to_string());
        }
        if let Some(namespace) = target.namespace {
            argv.push("--namespace".to_string());
            argv.push(namespace.to_string());
        }
        argv.extend(args.iter().map(|s| s.to_string()));

        let mut opts = RunOptions {
            check,
            ..RunOptions::default()
        };
        if let Some(kubeconfig) = target.kubeconfig {
            opts.env
                .push(("KUBECONFIG".to_string(), kubeconfig.to_string()));
        }
        self.runner.run(&argv, opts).await
    }

    /// Ready condition status of every node (`"True"` / `"False"` /
    /// `"Unknown"`).
    pub async fn node_ready_statuses(&self, target: KubectlTarget<'_>) -> Result<Vec<String>> {
        let result = self
            .run(&["get", "nodes", READY_STATUS_JSONPATH], target, true)
            .await?;
        Ok(split_jsonpath_words(&result.stdout))
    }

    /// Node names and Ready statuses in a single query.
    pub async fn node_names_and_ready(
        &self,
        target: KubectlTarget<'_>,
    ) -> Result<Vec<(String, String)>> {
        let result = self
            .run(&["get", "nodes", NAMES_AND_READY_JSONPATH], target, true)
            .await?;
        let words = split_jsonpath_words(&result.stdout);
        let half = words.len() / 2;
        let statuses = words[half..].to_vec();
        let names = words[..half].to_vec();
        Ok(names.into_iter().zip(statuses).collect())
    }

    /// Kubernetes version per node from the wide listing.
    pub async fn node_versions(
        &self,
        target: KubectlTarget<'_>,
    ) -> Result<Vec<(String, String)>> {
        let result = self
            .run(&["get", "nodes", "-o", "wide"], target, true)
            .await?;
        let mut versions = Vec::new();
        for line in result.stdout.lines().skip(1) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 5 {
                versions.push((parts[0].to_string(), parts[4].to_string()));
            }
        }
        Ok(versions)
    }

    /// Utilization snapshot from `kubectl top nodes`.
    ///
    /// A failure (metrics server absent) degrades to an empty snapshot rather
    /// than an error. Percentage columns are located by their `%` suffix.
    pub async fn top_nodes(&self, target: KubectlTarget<'_>) -> Result<Vec<NodeUsage>> {
        let result = self.run(&["top", "nodes"], target, false).await?;
        if !result.success() {
            return Ok(Vec::new());
        }

        let mut usage = Vec::new();
        for line in result.stdout.lines().skip(1) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }
            let mut percents = parts[1..]
                .iter()
                .filter(|p| p.ends_with('%'))
                .filter_map(|p| p.trim_end_matches('%').parse::<u32>().ok());
            if let (Some(cpu), Some(memory)) = (percents.next(), percents.next()) {
                usage.push(NodeUsage {
                    name: parts[0].to_string(),
                    cpu_percent: cpu,
                    memory_percent: memory,
                });
            }
        }
        Ok(usage)
    }

    /// Apply manifests by local path or URL.
    pub async fn apply(
        &self,
        files: &[&str],
        target: KubectlTarget<'_>,
    ) -> Result<CommandResult> {
        let mut args = vec!["apply"];
        for file in files {
            args.push("-f");
            args.push(file);
        }
        self.run(&args, target, true).await
    }

    /// Block until a resource reports a condition, bounded by `timeout`
    /// (kubectl duration syntax, e.g. `90s`).
    pub async fn wait_for_condition(
        &self,
        resource_type: &str,
        condition: &str,
        selector: Option<&str>,
        timeout: &str,
        target: KubectlTarget<'_>,
    ) -> Result<CommandResult> {
        let condition_arg = format!("condition={condition}");
        let mut args = vec!["wait", resource_type, "--for", condition_arg.as_str()];
        if let Some(selector) = selector {
            args.push("--selector");
            args.push(selector);
        }
        args.push("--timeout");
        args.push(timeout);
        self.run(&args, target, true).await
    }
}

/// Split jsonpath output into words, dropping the quote characters the shell
/// convention wraps it in.
fn split_jsonpath_words(stdout: &str) -> Vec<String> {
    stdout
        .trim()
        .trim_matches('\'')
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockRunner;

    fn client(mock: &Arc<MockRunner>) -> KubectlClient {
        KubectlClient::new(mock.clone() as Arc<dyn CommandRunner>)
    }

    #[tokio::test]
    async fn context_and_namespace_precede_arguments() {
        let mock = Arc::new(MockRunner::new());
        mock.set_default(CommandResult::succeeded(""));

        let target = KubectlTarget::context("kind-demo").in_namespace("ingress-nginx");
        client(&mock)
            .run(&["get", "pods"], target, true)
            .await
            .unwrap();

        assert_eq!(
            mock.commands()[0],
            "kubectl --context kind-demo --namespace ingress-nginx get pods"
        );
    }

    #[tokio::test]
    async fn kubeconfig_travels_as_environment() {
        let mock = Arc::new(MockRunner::new());
        mock.set_default(CommandResult::succeeded(""));

        let target = KubectlTarget {
            kubeconfig: Some("/tmp/demo-kubeconfig"),
            ..KubectlTarget::default()
        };
        client(&mock)
            .run(&["get", "nodes"], target, true)
            .await
            .unwrap();

        let call = &mock.calls()[0];
        assert_eq!(
            call.env,
            vec![("KUBECONFIG".to_string(), "/tmp/demo-kubeconfig".to_string())]
        );
    }

    #[tokio::test]
    async fn ready_statuses_strip_jsonpath_quoting() {
        let mock = Arc::new(MockRunner::new());
        mock.add_result("get nodes", CommandResult::succeeded("'True False True'"));

        let statuses = client(&mock)
            .node_ready_statuses(KubectlTarget::context("kind-demo"))
            .await
            .unwrap();
        assert_eq!(statuses, vec!["True", "False", "True"]);
    }

    #[tokio::test]
    async fn names_and_ready_pair_up_by_position() {
        let mock = Arc::new(MockRunner::new());
        mock.add_result(
            "get nodes",
            CommandResult::succeeded("'demo-control-plane demo-worker True False'"),
        );

        let nodes = client(&mock)
            .node_names_and_ready(KubectlTarget::context("kind-demo"))
            .await
            .unwrap();
        assert_eq!(
            nodes,
            vec![
                ("demo-control-plane".to_string(), "True".to_string()),
                ("demo-worker".to_string(), "False".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn top_nodes_reads_percent_columns() {
        let mock = Arc::new(MockRunner::new());
        mock.add_result(
            "kubectl --context kind-demo top nodes",
            CommandResult::succeeded(
                "NAME                 CPU(cores)   CPU%   MEMORY(bytes)   MEMORY%\n\
                 demo-control-plane   165m         8%     1399Mi          36%\n\
                 demo-worker          53m          2%     701Mi           18%\n",
            ),
        );

        let usage = client(&mock)
            .top_nodes(KubectlTarget::context("kind-demo"))
            .await
            .unwrap();
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].name, "demo-control-plane");
        assert_eq!(usage[0].cpu_percent, 8);
        assert_eq!(usage[0].memory_percent, 36);
        assert_eq!(usage[1].cpu_percent, 2);
    }

    #[tokio::test]
    async fn top_nodes_degrades_to_empty_when_metrics_unavailable() {
        let mock = Arc::new(MockRunner::new());
        mock.add_result(
            "top nodes",
            CommandResult::failed(1, "error: Metrics API not available"),
        );
        let usage = client(&mock)
            .top_nodes(KubectlTarget::context("kind-demo"))
            .await
            .unwrap();
        assert!(usage.is_empty());
    }

    #[tokio::test]
    async fn apply_and_wait_build_expected_argv() {
        let mock = Arc::new(MockRunner::new());
        mock.set_default(CommandResult::succeeded(""));
        let client = client(&mock);
        let target = KubectlTarget::context("kind-demo");

        client
            .apply(&["https://example.com/deploy.yaml"], target)
            .await
            .unwrap();
        client
            .wait_for_condition(
                "pod",
                "Ready",
                Some("app.kubernetes.io/component=controller"),
                "90s",
                target.in_namespace("ingress-nginx"),
            )
            .await
            .unwrap();

        let commands = mock.commands();
        assert_eq!(
            commands[0],
            "kubectl --context kind-demo apply -f https://example.com/deploy.yaml"
        );
        assert_eq!(
            commands[1],
            "kubectl --context kind-demo --namespace ingress-nginx wait pod --for \
             condition=Ready --selector app.kubernetes.io/component=controller --timeout 90s"
        );
    }
}
