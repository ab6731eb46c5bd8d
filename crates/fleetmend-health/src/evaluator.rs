//! Health evaluator — dispatches a server's declared check.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use tracing::debug;

use fleetmend_core::{HealthCheckSpec, HealthVerdict, ServerSpec};
use fleetmend_remote::RemoteExecutor;

use crate::checker::{http_probe, judge_remote};

/// Produces a verdict for one server. Implementations must not panic or
/// return errors; every failure is an unhealthy verdict.
pub trait Evaluator {
    fn evaluate(&self, server: &ServerSpec) -> HealthVerdict;
}

/// Evaluator backed by a blocking HTTP client and a remote executor.
pub struct HealthEvaluator {
    http: Client,
    executor: Arc<dyn RemoteExecutor>,
}

impl HealthEvaluator {
    /// Create an evaluator with a default HTTP client.
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .user_agent(concat!("fleetmend/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(http, executor))
    }

    /// Create an evaluator with a caller-supplied HTTP client.
    pub fn with_client(http: Client, executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { http, executor }
    }
}

impl Evaluator for HealthEvaluator {
    fn evaluate(&self, server: &ServerSpec) -> HealthVerdict {
        match &server.health_check {
            HealthCheckSpec::Http {
                url,
                timeout_seconds,
                expected_status,
                contains,
            } => http_probe(
                &self.http,
                url,
                Duration::from_secs(*timeout_seconds),
                *expected_status,
                contains.as_deref(),
            ),
            HealthCheckSpec::RemoteCmd {
                command,
                expect_stdout_pattern,
            } => {
                let pattern = match expect_stdout_pattern.as_deref().map(Regex::new).transpose() {
                    Ok(pattern) => pattern,
                    Err(e) => {
                        return HealthVerdict::unhealthy(format!("invalid stdout pattern: {e}"));
                    }
                };

                match self.executor.execute(&server.connection_params(), command) {
                    Ok(result) => judge_remote(&result, pattern.as_ref()),
                    Err(e) => {
                        debug!(server = %server.name, error = %e, "remote health command failed");
                        HealthVerdict::unhealthy(format!("SSH error: {e}"))
                    }
                }
            }
        }
    }
}
