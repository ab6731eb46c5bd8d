//! fleetmend-remote — run one command on one host over SSH.
//!
//! Every call to [`RemoteExecutor::execute`] opens a fresh session,
//! authenticates with the server's private key, runs a single command and
//! tears the session down again, whatever the outcome. There is no session
//! reuse between calls or between servers.
//!
//! # Host keys
//!
//! The default [`HostKeyPolicy::AcceptNew`](fleetmend_core::HostKeyPolicy)
//! accepts any key the host presents and only logs its SHA-256 fingerprint
//! (trust on first use, nothing is pinned). Servers that need stronger
//! guarantees set `host_key = { mode = "verify", known_hosts = "..." }`.

pub mod error;
pub mod executor;

pub use error::ConnectionError;
pub use executor::{NO_EXIT_STATUS, RemoteExecutor, SshExecutor};
