//! Incident webhook notifier.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{error, info};

/// Environment variable holding the webhook URL.
pub const WEBHOOK_ENV: &str = "FLEETMEND_WEBHOOK";

/// Fixed timeout for a single webhook POST.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers a text message to the incident channel.
///
/// `notify` must never fail the caller; implementations log and swallow
/// their own errors.
pub trait Notifier {
    fn notify(&self, message: &str);
}

/// Why a notification was not delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification destination not configured (FLEETMEND_WEBHOOK is unset)")]
    NoDestination,

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook returned {0}")]
    Status(StatusCode),
}

/// Posts `{"content": <message>}` to a webhook URL (Discord-compatible).
pub struct WebhookNotifier {
    destination: Option<String>,
    http: Client,
}

impl WebhookNotifier {
    /// Create a notifier for `destination`. A blank destination counts as
    /// unset.
    pub fn new(destination: Option<String>) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(NOTIFY_TIMEOUT).build()?;
        Ok(Self::with_client(destination, http))
    }

    /// Create a notifier whose destination comes from [`WEBHOOK_ENV`].
    pub fn from_env() -> Result<Self, reqwest::Error> {
        Self::new(std::env::var(WEBHOOK_ENV).ok())
    }

    pub fn with_client(destination: Option<String>, http: Client) -> Self {
        let destination = destination
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        Self { destination, http }
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Send one message and report the outcome.
    ///
    /// Without a destination this returns [`NotifyError::NoDestination`]
    /// before any network activity.
    pub fn deliver(&self, message: &str) -> Result<(), NotifyError> {
        let url = self.destination.as_deref().ok_or(NotifyError::NoDestination)?;

        let resp = self
            .http
            .post(url)
            .timeout(NOTIFY_TIMEOUT)
            .json(&serde_json::json!({ "content": message }))
            .send()?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, message: &str) {
        match self.deliver(message) {
            Ok(()) => info!("notification sent"),
            Err(NotifyError::NoDestination) => {
                error!("{WEBHOOK_ENV} not set; skipping notification")
            }
            Err(e) => error!(error = %e, "notification failed"),
        }
    }
}
