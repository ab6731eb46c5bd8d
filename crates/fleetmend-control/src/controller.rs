//! Controller — drives one pass over the fleet.

use tracing::{info, warn};

use fleetmend_core::{HealthVerdict, RemediationOutcome, ServerSpec};
use fleetmend_health::Evaluator;
use fleetmend_notify::Notifier;

use crate::remediator::Remediator;

/// What happened to one server during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReport {
    pub name: String,
    pub verdict: HealthVerdict,
    /// Present only when the server was found unhealthy.
    pub remediation: Option<RemediationOutcome>,
}

/// Per-server results of one pass, in config order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub servers: Vec<ServerReport>,
}

impl PassReport {
    pub fn checked(&self) -> usize {
        self.servers.len()
    }

    pub fn unhealthy(&self) -> usize {
        self.servers.iter().filter(|s| !s.verdict.healthy).count()
    }

    /// Unhealthy servers whose restart command exited 0.
    pub fn restarted(&self) -> usize {
        self.servers
            .iter()
            .filter(|s| s.remediation.as_ref().is_some_and(|r| r.succeeded))
            .count()
    }
}

/// Runs check → remediate → report for each server, one at a time.
pub struct Controller<E, R, N> {
    evaluator: E,
    remediator: R,
    notifier: N,
}

impl<E, R, N> Controller<E, R, N>
where
    E: Evaluator,
    R: Remediator,
    N: Notifier,
{
    pub fn new(evaluator: E, remediator: R, notifier: N) -> Self {
        Self {
            evaluator,
            remediator,
            notifier,
        }
    }

    /// Process every server once, strictly in order.
    pub fn run_pass(&self, servers: &[ServerSpec]) -> PassReport {
        info!(servers = servers.len(), "starting health pass");

        let report = PassReport {
            servers: servers.iter().map(|server| self.process(server)).collect(),
        };

        info!(
            checked = report.checked(),
            unhealthy = report.unhealthy(),
            restarted = report.restarted(),
            "health pass complete"
        );
        report
    }

    /// Process one server to completion.
    pub fn process(&self, server: &ServerSpec) -> ServerReport {
        let name = server.name.as_str();

        info!(server = %name, check = server.health_check.kind(), "checking health");
        let verdict = self.evaluator.evaluate(server);

        if verdict.healthy {
            info!(server = %name, detail = %verdict.detail, "healthy");
            return ServerReport {
                name: name.to_string(),
                verdict,
                remediation: None,
            };
        }

        warn!(server = %name, detail = %verdict.detail, "unhealthy");
        let outcome = self.remediator.remediate(server);
        info!(server = %name, "{}", outcome.summary());

        self.notifier
            .notify(&incident_message(name, &verdict, &outcome));

        ServerReport {
            name: name.to_string(),
            verdict,
            remediation: Some(outcome),
        }
    }
}

/// Text sent to the incident channel for one unhealthy server.
pub fn incident_message(name: &str, verdict: &HealthVerdict, outcome: &RemediationOutcome) -> String {
    format!(
        "⚠️ {name} unhealthy\n{}\n{}",
        verdict.detail,
        outcome.summary()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(exit_code: i32) -> RemediationOutcome {
        RemediationOutcome {
            exit_code,
            stdout: "done".to_string(),
            stderr: String::new(),
            succeeded: exit_code == 0,
        }
    }

    fn report(name: &str, healthy: bool, remediation: Option<RemediationOutcome>) -> ServerReport {
        ServerReport {
            name: name.to_string(),
            verdict: HealthVerdict {
                healthy,
                detail: "HTTP 200".to_string(),
            },
            remediation,
        }
    }

    #[test]
    fn incident_message_layout() {
        let msg = incident_message(
            "web-1",
            &HealthVerdict::unhealthy("HTTP 502"),
            &outcome(0),
        );
        assert_eq!(
            msg,
            "⚠️ web-1 unhealthy\nHTTP 502\nRestart OK: exit=0, out=done, err="
        );
    }

    #[test]
    fn incident_message_reports_failed_restart() {
        let msg = incident_message(
            "db-1",
            &HealthVerdict::unhealthy("SSH error: timed out connecting to db:22"),
            &outcome(5),
        );
        assert!(msg.ends_with("Restart FAILED: exit=5, out=done, err="));
    }

    #[test]
    fn pass_report_counts() {
        let pass = PassReport {
            servers: vec![
                report("a", true, None),
                report("b", false, Some(outcome(0))),
                report("c", false, Some(outcome(1))),
            ],
        };
        assert_eq!(pass.checked(), 3);
        assert_eq!(pass.unhealthy(), 2);
        assert_eq!(pass.restarted(), 1);
        assert_eq!(PassReport::default().checked(), 0);
    }
}
