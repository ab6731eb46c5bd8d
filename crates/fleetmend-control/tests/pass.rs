//! Control loop tests.
//!
//! Drive whole passes with scripted evaluators, remediators and notifiers,
//! then with the real components over a scripted SSH executor.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use fleetmend_control::{Controller, Remediator, ServiceRemediator};
use fleetmend_core::{
    ConfigError, ConfigFormat, ConnectionParams, ExecResult, FleetConfig, HealthCheckSpec,
    HealthVerdict, HostKeyPolicy, RemediationOutcome, ServerSpec,
};
use fleetmend_health::{Evaluator, HealthEvaluator};
use fleetmend_notify::{Notifier, WebhookNotifier};
use fleetmend_remote::{ConnectionError, RemoteExecutor};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Evaluate(String),
    Remediate(String),
    Notify(String),
}

type Events = Arc<Mutex<Vec<Event>>>;

struct ScriptedEvaluator {
    events: Events,
    unhealthy: Vec<&'static str>,
}

impl Evaluator for ScriptedEvaluator {
    fn evaluate(&self, server: &ServerSpec) -> HealthVerdict {
        self.events
            .lock()
            .unwrap()
            .push(Event::Evaluate(server.name.clone()));
        if self.unhealthy.iter().any(|n| *n == server.name) {
            HealthVerdict::unhealthy("HTTP 500")
        } else {
            HealthVerdict::healthy("HTTP 200")
        }
    }
}

struct ScriptedRemediator {
    events: Events,
    exit_code: i32,
}

impl Remediator for ScriptedRemediator {
    fn remediate(&self, server: &ServerSpec) -> RemediationOutcome {
        self.events
            .lock()
            .unwrap()
            .push(Event::Remediate(server.name.clone()));
        RemediationOutcome {
            exit_code: self.exit_code,
            stdout: String::new(),
            stderr: String::new(),
            succeeded: self.exit_code == 0,
        }
    }
}

struct RecordingNotifier {
    events: Events,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Notify(message.to_string()));
    }
}

fn server(name: &str) -> ServerSpec {
    ServerSpec {
        name: name.to_string(),
        host: format!("{name}.internal"),
        port: 22,
        username: "ops".to_string(),
        private_key_path: PathBuf::from("/keys/ops"),
        service: Some("app".to_string()),
        restart_command: None,
        health_check: HealthCheckSpec::Http {
            url: format!("http://{name}.internal/healthz"),
            timeout_seconds: 5,
            expected_status: 200,
            contains: None,
        },
        host_key: HostKeyPolicy::AcceptNew,
        ssh_timeout_seconds: 10,
    }
}

fn scripted(
    unhealthy: Vec<&'static str>,
    restart_exit: i32,
) -> (
    Controller<ScriptedEvaluator, ScriptedRemediator, RecordingNotifier>,
    Events,
) {
    let events = Events::default();
    let controller = Controller::new(
        ScriptedEvaluator {
            events: events.clone(),
            unhealthy,
        },
        ScriptedRemediator {
            events: events.clone(),
            exit_code: restart_exit,
        },
        RecordingNotifier {
            events: events.clone(),
        },
    );
    (controller, events)
}

fn evaluations(events: &Events) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            Event::Evaluate(name) => Some(name.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn every_server_is_evaluated_exactly_once_in_order() {
    let (controller, events) = scripted(vec!["b", "d"], 0);
    let servers: Vec<_> = ["a", "b", "c", "d", "e"].into_iter().map(server).collect();

    let report = controller.run_pass(&servers);

    assert_eq!(evaluations(&events), ["a", "b", "c", "d", "e"]);
    assert_eq!(report.checked(), 5);
    assert_eq!(report.unhealthy(), 2);
    assert_eq!(report.restarted(), 2);
}

#[test]
fn healthy_fleet_triggers_no_remediation_or_notification() {
    let (controller, events) = scripted(vec![], 0);
    let report = controller.run_pass(&[server("a"), server("b")]);

    assert_eq!(
        *events.lock().unwrap(),
        vec![Event::Evaluate("a".into()), Event::Evaluate("b".into())]
    );
    assert!(report.servers.iter().all(|s| s.remediation.is_none()));
}

#[test]
fn unhealthy_server_is_restarted_then_reported_before_next_server() {
    let (controller, events) = scripted(vec!["b"], 0);
    controller.run_pass(&[server("a"), server("b"), server("c")]);

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            Event::Evaluate("a".into()),
            Event::Evaluate("b".into()),
            Event::Remediate("b".into()),
            Event::Notify("⚠️ b unhealthy\nHTTP 500\nRestart OK: exit=0, out=, err=".into()),
            Event::Evaluate("c".into()),
        ]
    );
}

#[test]
fn failed_restart_is_still_reported_once() {
    let (controller, events) = scripted(vec!["a"], 1);
    let report = controller.run_pass(&[server("a")]);

    let events = events.lock().unwrap();
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::Remediate(_))).count(),
        1
    );
    assert_eq!(
        events.iter().filter(|e| matches!(e, Event::Notify(_))).count(),
        1
    );
    assert!(matches!(
        events.last(),
        Some(Event::Notify(msg)) if msg.ends_with("Restart FAILED: exit=1, out=, err=")
    ));
    assert_eq!(report.restarted(), 0);
    assert_eq!(report.servers[0].remediation.as_ref().map(|r| r.succeeded), Some(false));
}

#[test]
fn empty_fleet_is_a_no_op() {
    let (controller, events) = scripted(vec![], 0);
    let report = controller.run_pass(&[]);
    assert_eq!(report.checked(), 0);
    assert!(events.lock().unwrap().is_empty());
}

// ── Real components over a scripted SSH executor ─────────────────────

/// Answers health commands with `check_exit` and anything else with 0.
struct ScriptedExecutor {
    check_exit: i32,
    commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn new(check_exit: i32) -> Arc<Self> {
        Arc::new(Self {
            check_exit,
            commands: Mutex::new(Vec::new()),
        })
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl RemoteExecutor for ScriptedExecutor {
    fn execute(
        &self,
        _target: &ConnectionParams,
        command: &str,
    ) -> Result<ExecResult, ConnectionError> {
        self.commands.lock().unwrap().push(command.to_string());
        let exit_code = if command.starts_with("systemctl is-active") {
            self.check_exit
        } else {
            0
        };
        Ok(ExecResult {
            exit_code,
            stdout: if exit_code == 0 { "active" } else { "inactive" }.to_string(),
            stderr: String::new(),
        })
    }
}

const FLEET_TOML: &str = r#"
[[servers]]
name = "api"
host = "api.internal"
username = "deploy"
private_key = "/keys/deploy"
service = "api"
health_check = { type = "remote_cmd", command = "systemctl is-active api", expect_stdout_pattern = "^active$" }
"#;

fn real_controller(
    executor: Arc<ScriptedExecutor>,
) -> Controller<HealthEvaluator, ServiceRemediator, WebhookNotifier> {
    let http = reqwest::blocking::Client::builder()
        .no_proxy()
        .build()
        .unwrap();
    Controller::new(
        HealthEvaluator::with_client(http.clone(), executor.clone()),
        ServiceRemediator::new(executor),
        // No destination: notification degrades to a logged skip.
        WebhookNotifier::with_client(None, http),
    )
}

#[test]
fn unhealthy_remote_service_is_restarted_over_ssh() {
    let config = FleetConfig::parse(FLEET_TOML, ConfigFormat::Toml).unwrap();
    let executor = ScriptedExecutor::new(3);

    let report = real_controller(executor.clone()).run_pass(&config.servers);

    assert_eq!(
        executor.commands(),
        ["systemctl is-active api", "sudo systemctl restart api"]
    );
    let api = &report.servers[0];
    assert_eq!(api.verdict.detail, "exit=3, out=inactive, err=");
    assert!(api.remediation.as_ref().is_some_and(|r| r.succeeded));
}

#[test]
fn healthy_remote_service_is_checked_only() {
    let config = FleetConfig::parse(FLEET_TOML, ConfigFormat::Toml).unwrap();
    let executor = ScriptedExecutor::new(0);

    let report = real_controller(executor.clone()).run_pass(&config.servers);

    assert_eq!(executor.commands(), ["systemctl is-active api"]);
    assert!(report.servers[0].verdict.healthy);
}

#[test]
fn unsupported_config_format_fails_before_any_remote_call() {
    let mut file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
    file.write_all(FLEET_TOML.as_bytes()).unwrap();
    let executor = ScriptedExecutor::new(0);
    let controller = real_controller(executor.clone());

    let result = FleetConfig::load(file.path()).map(|config| controller.run_pass(&config.servers));

    assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    assert!(executor.commands().is_empty());
}

// ── Log ordering ─────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn log_lines_follow_check_remediate_notify_order() {
    let config = FleetConfig::parse(FLEET_TOML, ConfigFormat::Toml).unwrap();
    let controller = real_controller(ScriptedExecutor::new(3));

    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::with_default(subscriber, || controller.run_pass(&config.servers));

    let logs = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
    let position = |needle: &str| {
        logs.find(needle)
            .unwrap_or_else(|| panic!("missing {needle:?} in logs:\n{logs}"))
    };

    let checking = position("checking health");
    let unhealthy = position("unhealthy");
    let restart = position("Restart OK");
    let skipped = position("skipping notification");
    let summary = position("health pass complete");
    assert!(checking < unhealthy && unhealthy < restart && restart < skipped && skipped < summary);

    assert!(logs
        .lines()
        .any(|l| l.contains("WARN") && l.contains("unhealthy") && l.contains("server=api")));
    assert!(logs
        .lines()
        .any(|l| l.contains("ERROR") && l.contains("skipping notification")));
}
