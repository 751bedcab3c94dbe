//! Cluster and environment configuration.
//!
//! All inputs reach the orchestrator as pre-validated configuration values;
//! nothing in this crate reads the process environment directly.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ports::PortRequest;
use crate::{Error, Result, DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT, DEFAULT_NODE_PORT};

/// CPU and memory for one node role.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourceSpec {
    /// CPU limit as passed to `docker update --cpus` (e.g. `"1"`, `"1.5"`)
    pub cpu: String,
    /// Memory limit with optional G/GB, M/MB, K/KB suffix (e.g. `"2GB"`)
    pub memory: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu: "1".to_string(),
            memory: "2GB".to_string(),
        }
    }
}

/// Explicit host-port overrides, taking precedence over the top-level port
/// fields.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CustomPorts {
    /// HTTP ingress host port
    pub http: Option<u16>,
    /// HTTPS ingress host port
    pub https: Option<u16>,
    /// NodePort host port
    pub nodeport: Option<u16>,
}

/// Declarative description of a kind cluster.
///
/// Port fields describe the *desired* host ports; the negotiated ports a
/// cluster actually uses are returned by creation, leaving this value
/// untouched.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster name; when empty, `kind-cluster-{namespace}` is used
    pub name: String,
    /// Number of worker nodes alongside the single control plane
    pub worker_nodes: u32,
    /// Resource limits for the control-plane container
    pub control_plane: ResourceSpec,
    /// Resource limits for each worker container
    pub worker: ResourceSpec,
    /// Whether to apply resource limits to node containers after creation
    pub apply_resource_limits: bool,
    /// Desired host port for HTTP ingress
    pub http_port: u16,
    /// Desired host port for HTTPS ingress
    pub https_port: u16,
    /// Desired host port mapped to the cluster's NodePort 30080
    pub node_port: u16,
    /// Optional overrides that win over the port fields above
    pub custom_ports: Option<CustomPorts>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            worker_nodes: 2,
            control_plane: ResourceSpec::default(),
            worker: ResourceSpec::default(),
            apply_resource_limits: true,
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            node_port: DEFAULT_NODE_PORT,
            custom_ports: None,
        }
    }
}

impl ClusterConfig {
    /// Load a cluster configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a cluster configuration from YAML
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| Error::validation(format!("invalid cluster config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// The desired host ports with custom overrides applied
    pub fn port_request(&self) -> PortRequest {
        let custom = self.custom_ports.as_ref();
        PortRequest {
            http: custom.and_then(|c| c.http).unwrap_or(self.http_port),
            https: custom.and_then(|c| c.https).unwrap_or(self.https_port),
            node_port: custom.and_then(|c| c.nodeport).unwrap_or(self.node_port),
        }
    }

    /// Check invariants: the desired host ports must be pairwise distinct
    pub fn validate(&self) -> Result<()> {
        let request = self.port_request();
        if request.http == request.https
            || request.http == request.node_port
            || request.https == request.node_port
        {
            return Err(Error::validation(format!(
                "host ports must be distinct: http={}, https={}, nodeport={}",
                request.http, request.https, request.node_port
            )));
        }
        Ok(())
    }
}

/// Deployment environment metadata. Does not affect cluster topology.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Environment label (e.g. `dev`, `staging`)
    pub environment: String,
    /// Kubernetes namespace targeted by deployments
    pub namespace: String,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            namespace: "dev".to_string(),
        }
    }
}
