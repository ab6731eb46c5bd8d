//! Fleet config file parser (`.yaml`/`.yml`, `.json` or `.toml`).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{HealthCheckSpec, HostKeyPolicy, ServerSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Size at which the log file is rotated.
    #[serde(default = "default_log_max_bytes")]
    pub log_max_bytes: u64,
    /// Number of rotated files kept (`<log_file>.1` .. `.N`).
    #[serde(default = "default_log_backups")]
    pub log_backups: u32,
    #[serde(default)]
    pub servers: Vec<ServerSpec>,
}

/// Serialization of a config file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            _ => Err(ConfigError::UnsupportedFormat(
                path.display().to_string(),
            )),
        }
    }
}

impl FleetConfig {
    /// Load, parse and validate a config file.
    ///
    /// The format is decided from the extension before the file is read.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, format)
    }

    pub fn parse(content: &str, format: ConfigFormat) -> ConfigResult<Self> {
        let config: FleetConfig = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configs that could only ever fail at run time.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.log_max_bytes == 0 {
            return Err(invalid("log_max_bytes must be greater than zero"));
        }

        let mut names = HashSet::new();
        for (index, server) in self.servers.iter().enumerate() {
            if server.name.trim().is_empty() {
                return Err(invalid(format!("servers[{index}]: name must not be empty")));
            }
            if !names.insert(server.name.as_str()) {
                return Err(invalid(format!("duplicate server name {:?}", server.name)));
            }
            validate_server(server).map_err(|reason| {
                invalid(format!("server {:?}: {reason}", server.name))
            })?;
        }
        Ok(())
    }
}

fn validate_server(server: &ServerSpec) -> Result<(), String> {
    if server.host.trim().is_empty() {
        return Err("host must not be empty".to_string());
    }
    if server.username.trim().is_empty() {
        return Err("username must not be empty".to_string());
    }
    if server.ssh_timeout_seconds == 0 {
        return Err("ssh_timeout_seconds must be greater than zero".to_string());
    }
    if !server.has_restart_target() {
        return Err("either restart_command or service is required".to_string());
    }
    if let HostKeyPolicy::Verify { known_hosts } = &server.host_key {
        if known_hosts.as_os_str().is_empty() {
            return Err("host_key.known_hosts must not be empty".to_string());
        }
    }

    match &server.health_check {
        HealthCheckSpec::Http {
            url,
            timeout_seconds,
            ..
        } => {
            if url.trim().is_empty() {
                return Err("health_check.url must not be empty".to_string());
            }
            if *timeout_seconds == 0 {
                return Err("health_check.timeout_seconds must be greater than zero".to_string());
            }
        }
        HealthCheckSpec::RemoteCmd {
            command,
            expect_stdout_pattern,
        } => {
            if command.trim().is_empty() {
                return Err("health_check.command must not be empty".to_string());
            }
            if let Some(pattern) = expect_stdout_pattern {
                Regex::new(pattern)
                    .map_err(|e| format!("health_check.expect_stdout_pattern: {e}"))?;
            }
        }
    }
    Ok(())
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(reason.into())
}

fn default_log_file() -> PathBuf {
    PathBuf::from("logs/fleetmend.log")
}

fn default_log_max_bytes() -> u64 {
    2_000_000
}

fn default_log_backups() -> u32 {
    3
}
