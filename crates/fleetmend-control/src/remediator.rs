//! Remediator — one restart attempt for an unhealthy server.

use std::sync::Arc;

use tracing::debug;

use fleetmend_core::{RemediationOutcome, ServerSpec};
use fleetmend_remote::{NO_EXIT_STATUS, RemoteExecutor};

/// Attempts to bring an unhealthy server back.
pub trait Remediator {
    fn remediate(&self, server: &ServerSpec) -> RemediationOutcome;
}

/// Restarts the server's service over SSH.
pub struct ServiceRemediator {
    executor: Arc<dyn RemoteExecutor>,
}

impl ServiceRemediator {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }
}

impl Remediator for ServiceRemediator {
    fn remediate(&self, server: &ServerSpec) -> RemediationOutcome {
        let command = server.restart_command_line();
        debug!(server = %server.name, %command, "issuing restart");

        match self.executor.execute(&server.connection_params(), &command) {
            Ok(result) => result.into(),
            Err(e) => RemediationOutcome {
                exit_code: NO_EXIT_STATUS,
                stdout: String::new(),
                stderr: e.to_string(),
                succeeded: false,
            },
        }
    }
}
