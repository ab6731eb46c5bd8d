//! fleetmend-control — the health-check/remediation control loop.
//!
//! One pass walks the configured servers in order. Each server goes
//! through the same small state machine and is finished before the next
//! one starts:
//!
//! ```text
//! Checking ──healthy──────────────────────────────► Done
//!    │
//!    └─unhealthy─► Remediating ─► Reporting ──────► Done
//!                  (one restart)  (one notification)
//! ```
//!
//! Nothing is carried between passes. A server that stays broken is
//! restarted and reported again on the next run.

pub mod controller;
pub mod remediator;

pub use controller::{Controller, PassReport, ServerReport, incident_message};
pub use remediator::{Remediator, ServiceRemediator};
