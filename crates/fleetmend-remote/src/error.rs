//! Remote execution error types.

use thiserror::Error;

/// Why a remote command could not be run to completion.
///
/// Callers convert these into an unhealthy verdict or a failed
/// remediation; they never abort a pass.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to resolve {0}")]
    Resolve(String),

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("failed to connect to {0}")]
    Connect(String),

    #[error("SSH handshake failed: {0}")]
    Handshake(String),

    #[error("host key rejected: {0}")]
    HostKeyRejected(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("timed out waiting for remote command: {0}")]
    CommandTimeout(String),

    #[error("SSH channel error: {0}")]
    Channel(String),
}
