//! Host-port negotiation.
//!
//! Before a cluster is created, the desired ingress and NodePort host ports
//! are probed; occupied ports fall back to a fixed candidate list. Occupancy
//! is decided by a TCP connect probe against localhost, corroborated by
//! `lsof` when that tool is available. Negotiation never mutates the caller's
//! configuration; it returns a fresh [`ResolvedPorts`] value.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::exec::{CommandRunner, RunOptions};
use crate::{Error, Result};

/// Fallback candidates for the HTTP ingress port
pub const HTTP_FALLBACKS: [u16; 4] = [8080, 8081, 8082, 8083];
/// Fallback candidates for the HTTPS ingress port
pub const HTTPS_FALLBACKS: [u16; 4] = [8443, 8444, 8445, 8446];
/// Fallback candidates for the NodePort host port
pub const NODEPORT_FALLBACKS: [u16; 9] = [
    30081, 30082, 30083, 30084, 30085, 30086, 30087, 30088, 30089,
];

const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// The class of host port being negotiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortClass {
    /// HTTP ingress port (default 80)
    Http,
    /// HTTPS ingress port (default 443)
    Https,
    /// NodePort host port (default 30000)
    NodePort,
}

impl fmt::Display for PortClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortClass::Http => write!(f, "HTTP"),
            PortClass::Https => write!(f, "HTTPS"),
            PortClass::NodePort => write!(f, "NodePort"),
        }
    }
}

/// Desired host ports before negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRequest {
    /// Desired HTTP ingress port
    pub http: u16,
    /// Desired HTTPS ingress port
    pub https: u16,
    /// Desired NodePort host port
    pub node_port: u16,
}

/// Host ports actually chosen for a cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPorts {
    /// Negotiated HTTP ingress port
    pub http: u16,
    /// Negotiated HTTPS ingress port
    pub https: u16,
    /// Negotiated NodePort host port
    pub node_port: u16,
}

/// Negotiates free host ports for a cluster.
#[derive(Clone)]
pub struct PortNegotiator {
    runner: Arc<dyn CommandRunner>,
}

impl PortNegotiator {
    /// Create a negotiator that corroborates socket probes through `runner`
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Resolve all three port classes independently.
    ///
    /// Returns [`Error::PortsExhausted`] when a class has no free candidate,
    /// and a validation error if the chosen ports collide (only possible with
    /// unusual custom overrides).
    pub async fn negotiate(&self, request: PortRequest) -> Result<ResolvedPorts> {
        let http = self
            .resolve(PortClass::Http, request.http, &HTTP_FALLBACKS)
            .await?;
        let https = self
            .resolve(PortClass::Https, request.https, &HTTPS_FALLBACKS)
            .await?;
        let node_port = self
            .resolve(PortClass::NodePort, request.node_port, &NODEPORT_FALLBACKS)
            .await?;

        if http == https || http == node_port || https == node_port {
            return Err(Error::validation(format!(
                "negotiated host ports collide: http={http}, https={https}, nodeport={node_port}"
            )));
        }

        let resolved = ResolvedPorts {
            http,
            https,
            node_port,
        };
        info!(
            http = resolved.http,
            https = resolved.https,
            node_port = resolved.node_port,
            "using host ports"
        );
        Ok(resolved)
    }

    async fn resolve(&self, class: PortClass, desired: u16, fallbacks: &[u16]) -> Result<u16> {
        resolve_port(class, desired, fallbacks, |port| self.port_is_free(port)).await
    }

    /// A port is free when the connect probe fails and `lsof` (if usable)
    /// reports no listener.
    async fn port_is_free(&self, port: u16) -> bool {
        if connect_probe_occupied(port).await {
            return false;
        }

        let argv = vec!["lsof".to_string(), "-i".to_string(), format!(":{port}")];
        match self.runner.run(&argv, RunOptions::unchecked()).await {
            // lsof exits 0 when a process holds the port
            Ok(result) => !result.success(),
            // lsof unavailable: trust the socket probe
            Err(_) => true,
        }
    }
}

/// Walk the candidate list for one port class with the given occupancy probe.
pub(crate) async fn resolve_port<F, Fut>(
    class: PortClass,
    desired: u16,
    fallbacks: &[u16],
    mut is_free: F,
) -> Result<u16>
where
    F: FnMut(u16) -> Fut,
    Fut: Future<Output = bool>,
{
    if is_free(desired).await {
        return Ok(desired);
    }

    warn!(port = desired, class = %class, "port occupied, trying alternatives");
    for &candidate in fallbacks {
        if is_free(candidate).await {
            info!(port = candidate, class = %class, "using alternative port");
            return Ok(candidate);
        }
    }

    Err(Error::PortsExhausted {
        class,
        port: desired,
    })
}

async fn connect_probe_occupied(port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}
