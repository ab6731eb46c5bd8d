//! fleetmend-notify — tell a human when something was restarted.
//!
//! Notifications are best-effort. A missing destination, a transport error
//! or a non-2xx response is logged and dropped; the caller never sees it.

pub mod webhook;

pub use webhook::{NotifyError, Notifier, WebhookNotifier, WEBHOOK_ENV};
