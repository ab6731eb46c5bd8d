//! Shared types used across Fleetmend crates.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One managed server: how to reach it, how to judge it, how to restart it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(alias = "private_key")]
    pub private_key_path: PathBuf,
    pub service: Option<String>,
    pub restart_command: Option<String>,
    pub health_check: HealthCheckSpec,
    #[serde(default)]
    pub host_key: HostKeyPolicy,
    #[serde(default = "default_ssh_timeout")]
    pub ssh_timeout_seconds: u64,
}

impl ServerSpec {
    /// SSH connection parameters for this server.
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            private_key_path: self.private_key_path.clone(),
            host_key: self.host_key.clone(),
            timeout: Duration::from_secs(self.ssh_timeout_seconds),
        }
    }

    /// The command that restarts this server's service.
    ///
    /// An explicit `restart_command` wins; otherwise a systemd restart of
    /// `service` is synthesized. Config validation rejects servers that
    /// have neither.
    pub fn restart_command_line(&self) -> String {
        match non_blank(self.restart_command.as_deref()) {
            Some(cmd) => cmd.to_string(),
            None => format!(
                "sudo systemctl restart {}",
                self.service.as_deref().unwrap_or_default()
            ),
        }
    }

    /// Whether a usable restart command can be derived.
    pub fn has_restart_target(&self) -> bool {
        non_blank(self.restart_command.as_deref()).is_some()
            || non_blank(self.service.as_deref()).is_some()
    }
}

/// How a server's health is judged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HealthCheckSpec {
    /// GET a URL and compare the status (and optionally the body).
    Http {
        url: String,
        #[serde(default = "default_http_timeout", alias = "timeout")]
        timeout_seconds: u64,
        #[serde(default = "default_expected_status")]
        expected_status: u16,
        /// Literal substring the body must contain.
        contains: Option<String>,
    },
    /// Run a command over SSH and inspect its exit code and stdout.
    RemoteCmd {
        command: String,
        /// Regex searched anywhere in stdout.
        #[serde(alias = "expect_stdout_regex")]
        expect_stdout_pattern: Option<String>,
    },
}

impl HealthCheckSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            HealthCheckSpec::Http { .. } => "http",
            HealthCheckSpec::RemoteCmd { .. } => "remote_cmd",
        }
    }
}

/// Host key trust policy for SSH connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Accept whatever key the host presents (trust on first use).
    /// The fingerprint is logged but never pinned.
    #[default]
    AcceptNew,
    /// Require the host key to match an entry in an OpenSSH known_hosts file.
    Verify { known_hosts: PathBuf },
}

/// Everything needed to open one SSH session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key_path: PathBuf,
    pub host_key: HostKeyPolicy,
    /// Bounds both the TCP connect and every blocking session call.
    pub timeout: Duration,
}

impl ConnectionParams {
    /// `host:port` form used for resolution and log labels.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Output of one remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Remote exit status; `-1` when the process died without reporting one.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Result of one health evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthVerdict {
    pub healthy: bool,
    /// Human-readable diagnostics; never parsed for correctness.
    pub detail: String,
}

impl HealthVerdict {
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: true,
            detail: detail.into(),
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: detail.into(),
        }
    }
}

/// Result of one restart attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub succeeded: bool,
}

impl From<ExecResult> for RemediationOutcome {
    fn from(result: ExecResult) -> Self {
        Self {
            succeeded: result.exit_code == 0,
            exit_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        }
    }
}

impl RemediationOutcome {
    /// One-line summary, e.g. `Restart OK: exit=0, out=, err=`.
    pub fn summary(&self) -> String {
        format!(
            "Restart {}: exit={}, out={}, err={}",
            if self.succeeded { "OK" } else { "FAILED" },
            self.exit_code,
            self.stdout,
            self.stderr
        )
    }
}

/// The value exactly as written, unless it is empty or all whitespace.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

fn default_ssh_port() -> u16 {
    22
}

fn default_ssh_timeout() -> u64 {
    10
}

fn default_http_timeout() -> u64 {
    5
}

fn default_expected_status() -> u16 {
    200
}
