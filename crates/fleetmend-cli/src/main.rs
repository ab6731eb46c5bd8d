//! fleetmend — check a fleet once, restart what is unhealthy, report it.
//!
//! # Usage
//!
//! ```text
//! export FLEETMEND_WEBHOOK="https://discord.com/api/webhooks/..."
//! fleetmend --config fleet.yaml
//! ```
//!
//! Exits 0 after a complete pass, however many servers were unhealthy.
//! Only an unreadable or invalid config (or an unusable log file) makes
//! it exit non-zero. Schedule it with cron or a systemd timer for
//! periodic checks.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use fleetmend_control::{Controller, ServiceRemediator};
use fleetmend_core::FleetConfig;
use fleetmend_health::HealthEvaluator;
use fleetmend_notify::WebhookNotifier;
use fleetmend_remote::{RemoteExecutor, SshExecutor};

mod logging;

#[derive(Parser)]
#[command(
    name = "fleetmend",
    about = "Fleetmend — health-check a fleet and restart unhealthy services",
    version
)]
struct Cli {
    /// Path to the fleet config file (.yaml, .yml, .json or .toml)
    #[arg(short, long)]
    config: PathBuf,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let Some(config) = load_config(&cli.config) else {
        return Ok(ExitCode::FAILURE);
    };

    logging::init(&config).with_context(|| {
        format!("failed to open log file {}", config.log_file.display())
    })?;
    info!(
        path = %cli.config.display(),
        servers = config.servers.len(),
        "config loaded"
    );

    let executor: Arc<dyn RemoteExecutor> = Arc::new(SshExecutor::new());
    let controller = Controller::new(
        HealthEvaluator::new(executor.clone())?,
        ServiceRemediator::new(executor),
        WebhookNotifier::from_env()?,
    );

    controller.run_pass(&config.servers);
    Ok(ExitCode::SUCCESS)
}

/// Load the fleet config. A failure is logged here and only here.
fn load_config(path: &Path) -> Option<FleetConfig> {
    match FleetConfig::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            // The log file location lives in the config, so this one goes
            // to the console only.
            logging::init_console();
            error!(path = %path.display(), error = %e, "failed to load config");
            None
        }
    }
}
