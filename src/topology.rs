//! Declarative kind cluster topology.
//!
//! Builds the `kind.x-k8s.io/v1alpha4` Cluster document consumed by
//! `kind create cluster --config`: one control-plane node carrying the
//! ingress label and host-port mappings, followed by the configured number of
//! workers. Every node mounts the host docker socket so workloads can reach
//! the container runtime.

use serde::{Deserialize, Serialize};

use crate::ports::ResolvedPorts;
use crate::{Error, Result};

const KIND_API_VERSION: &str = "kind.x-k8s.io/v1alpha4";
const DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// NodePort targeted inside the control-plane container
pub const NODEPORT_CONTAINER_PORT: u16 = 30080;

const CONTROL_PLANE_PATCH: &str = "kind: InitConfiguration\n\
nodeRegistration:\n\
  kubeletExtraArgs:\n\
    node-labels: \"ingress-ready=true\"\n";

const WORKER_PATCH: &str = "kind: JoinConfiguration\n\
nodeRegistration:\n\
  kubeletExtraArgs:\n\
    node-labels: \"kind.x-k8s.io/worker=true\"";

/// Role of a node within the cluster.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Runs the API server and core control components
    ControlPlane,
    /// Runs workloads only
    Worker,
}

/// A host path mounted into a node container.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Mount {
    /// Path on the host
    pub host_path: String,
    /// Path inside the node container
    pub container_path: String,
}

/// A container-to-host port mapping on a node.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Port inside the node container
    pub container_port: u16,
    /// Port exposed on the host
    pub host_port: u16,
    /// Protocol, always TCP here
    pub protocol: Protocol,
}

/// Transport protocol for a port mapping.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// TCP
    Tcp,
}

/// One node in the cluster topology.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    /// Node role
    pub role: NodeRole,
    /// Host mounts bound into the node container
    pub extra_mounts: Vec<Mount>,
    /// Raw kubeadm patches applied at init/join
    pub kubeadm_config_patches: Vec<String>,
    /// Host port mappings; only present on the control plane
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_port_mappings: Vec<PortMapping>,
}

/// The full multi-node descriptor handed to the provisioning tool.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTopology {
    /// Always `Cluster`
    pub kind: String,
    /// Always `kind.x-k8s.io/v1alpha4`
    pub api_version: String,
    /// Control-plane node first, then workers
    pub nodes: Vec<NodeSpec>,
}

impl ClusterTopology {
    /// Build the topology for one control plane and `worker_nodes` workers,
    /// using the negotiated host ports.
    pub fn build(worker_nodes: u32, ports: &ResolvedPorts) -> Self {
        let docker_socket_mount = Mount {
            host_path: DOCKER_SOCKET.to_string(),
            container_path: DOCKER_SOCKET.to_string(),
        };

        let control_plane = NodeSpec {
            role: NodeRole::ControlPlane,
            extra_mounts: vec![docker_socket_mount.clone()],
            kubeadm_config_patches: vec![CONTROL_PLANE_PATCH.to_string()],
            extra_port_mappings: vec![
                PortMapping {
                    container_port: 80,
                    host_port: ports.http,
                    protocol: Protocol::Tcp,
                },
                PortMapping {
                    container_port: 443,
                    host_port: ports.https,
                    protocol: Protocol::Tcp,
                },
                PortMapping {
                    container_port: NODEPORT_CONTAINER_PORT,
                    host_port: ports.node_port,
                    protocol: Protocol::Tcp,
                },
            ],
        };

        let mut nodes = vec![control_plane];
        for _ in 0..worker_nodes {
            nodes.push(NodeSpec {
                role: NodeRole::Worker,
                extra_mounts: vec![docker_socket_mount.clone()],
                kubeadm_config_patches: vec![WORKER_PATCH.to_string()],
                extra_port_mappings: Vec::new(),
            });
        }

        Self {
            kind: "Cluster".to_string(),
            api_version: KIND_API_VERSION.to_string(),
            nodes,
        }
    }

    /// Serialize to the YAML form kind expects
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::cluster_operation(format!("failed to serialize topology: {e}")))
    }
}
