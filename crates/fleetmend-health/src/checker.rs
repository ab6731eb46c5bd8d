//! Health check probe logic.
//!
//! Turns raw probe results (an HTTP response, a remote command's output)
//! into verdicts. The judging functions are pure; only [`http_probe`]
//! touches the network.

use std::error::Error as _;
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::Client;
use tracing::debug;

use fleetmend_core::{ExecResult, HealthVerdict};

/// Perform an HTTP GET health probe.
///
/// Healthy iff the status equals `expected_status` and, when `contains` is
/// set, the body contains that literal substring. The body is only read
/// when it can still change the verdict.
pub fn http_probe(
    client: &Client,
    url: &str,
    timeout: Duration,
    expected_status: u16,
    contains: Option<&str>,
) -> HealthVerdict {
    let response = match client.get(url).timeout(timeout).send() {
        Ok(resp) => resp,
        Err(e) => {
            debug!(%url, error = %e, "health probe request failed");
            return HealthVerdict::unhealthy(format!("HTTP error: {}", error_chain(&e)));
        }
    };

    let status = response.status().as_u16();
    let body = match contains {
        Some(_) if status == expected_status => match response.text() {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(%url, error = %e, "health probe body read failed");
                return HealthVerdict::unhealthy(format!("HTTP error: {}", error_chain(&e)));
            }
        },
        _ => None,
    };

    judge_http(status, expected_status, contains, body.as_deref())
}

/// Judge an HTTP response. The detail is always `HTTP <status>`.
pub fn judge_http(
    status: u16,
    expected_status: u16,
    contains: Option<&str>,
    body: Option<&str>,
) -> HealthVerdict {
    let body_ok = contains.is_none_or(|needle| body.is_some_and(|b| b.contains(needle)));
    HealthVerdict {
        healthy: status == expected_status && body_ok,
        detail: format!("HTTP {status}"),
    }
}

/// Judge a remote command result.
///
/// Healthy iff the exit code is 0 and, when a pattern is given, it matches
/// somewhere in stdout.
pub fn judge_remote(result: &ExecResult, pattern: Option<&Regex>) -> HealthVerdict {
    let pattern_ok = pattern.is_none_or(|re| re.is_match(&result.stdout));
    HealthVerdict {
        healthy: result.exit_code == 0 && pattern_ok,
        detail: format!(
            "exit={}, out={}, err={}",
            result.exit_code, result.stdout, result.stderr
        ),
    }
}

/// `reqwest` hides the interesting part (refused, timed out, ...) in the
/// source chain.
fn error_chain(e: &reqwest::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
