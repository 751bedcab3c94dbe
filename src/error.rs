//! Error types for cluster lifecycle operations

use thiserror::Error;

use crate::exec::CommandResult;
use crate::ports::PortClass;

/// Main error type for kindling operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The Docker daemon is unreachable
    #[error("docker is not running: {0}")]
    DockerNotRunning(String),

    /// A required external tool is missing from PATH
    #[error("required tool not installed: {tool} - {hint}")]
    ToolNotInstalled {
        /// The tool that was not found
        tool: String,
        /// Hint for how to install it
        hint: String,
    },

    /// A cluster operation failed in a way that may be transient
    #[error("cluster operation failed: {0}")]
    ClusterOperation(String),

    /// Every candidate port for a port class is occupied
    #[error("unable to find a free {class} port: {port} and all alternatives are in use")]
    PortsExhausted {
        /// The port class that could not be satisfied
        class: PortClass,
        /// The originally requested port
        port: u16,
    },

    /// An external command exited non-zero
    #[error(
        "command `{command}` failed with exit code {}\nstdout: {}\nstderr: {}",
        result.exit_code,
        result.stdout.trim(),
        result.stderr.trim()
    )]
    Command {
        /// The full command line that was executed
        command: String,
        /// The captured result of the failed invocation
        result: CommandResult,
    },

    /// Invalid configuration or request
    #[error("validation error: {0}")]
    Validation(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an [`Error`], used by the retry layer to decide
/// which failures are worth another attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Docker daemon unreachable
    DockerNotRunning,
    /// Required tool missing
    ToolNotInstalled,
    /// Transient cluster operation failure
    ClusterOperation,
    /// External command failure
    Command,
    /// Invalid input, never retried
    Validation,
    /// I/O failure
    Io,
}

impl Error {
    /// Create a cluster-operation error with the given message
    pub fn cluster_operation(msg: impl Into<String>) -> Self {
        Self::ClusterOperation(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a tool-not-installed error for the given tool
    pub fn tool_not_installed(tool: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::ToolNotInstalled {
            tool: tool.into(),
            hint: hint.into(),
        }
    }

    /// Classify this error for retry decisions.
    ///
    /// Port exhaustion counts as a cluster-operation failure: another attempt
    /// may find a port freed in the meantime.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DockerNotRunning(_) => ErrorKind::DockerNotRunning,
            Error::ToolNotInstalled { .. } => ErrorKind::ToolNotInstalled,
            Error::ClusterOperation(_) | Error::PortsExhausted { .. } => {
                ErrorKind::ClusterOperation
            }
            Error::Command { .. } => ErrorKind::Command,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Io(_) => ErrorKind::Io,
        }
    }
}

/// Map a low-level failure message to a human-readable remediation hint.
///
/// The hint is appended to the surfaced error; the original message is kept
/// intact for diagnostics.
pub fn remediation_hint(message: &str) -> Option<&'static str> {
    let lower = message.to_ascii_lowercase();
    if lower.contains("no space left on device") {
        Some(
            "Docker has run out of disk space. Free space with \
             `docker system prune -a -f --volumes` or increase Docker's disk allocation",
        )
    } else if lower.contains("failed to copy files") && lower.contains("write") {
        Some(
            "Docker storage is full. Clean up with `docker system prune -a -f --volumes` \
             or increase Docker's storage limit",
        )
    } else if lower.contains("port") && lower.contains("already in use") {
        Some(
            "required host ports are already in use. Stop services occupying ports 80, 443, \
             or 30080, or let automatic port fallback pick alternatives",
        )
    } else {
        None
    }
}
