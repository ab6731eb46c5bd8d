//! fleetmend-health — decide whether a server is healthy.
//!
//! Two kinds of check are supported, matching
//! [`HealthCheckSpec`](fleetmend_core::HealthCheckSpec):
//!
//! ```text
//! HealthEvaluator::evaluate(server)
//!   ├── http        → http_probe()  → status (+ literal body substring)
//!   └── remote_cmd  → RemoteExecutor → exit code (+ stdout regex search)
//! ```
//!
//! Evaluation never fails: connection problems, timeouts and mismatches
//! all become a [`HealthVerdict`](fleetmend_core::HealthVerdict) with
//! `healthy = false` and a detail string for the logs.

pub mod checker;
pub mod evaluator;

pub use checker::{http_probe, judge_http, judge_remote};
pub use evaluator::{Evaluator, HealthEvaluator};
