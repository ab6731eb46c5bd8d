//! SSH-backed remote command execution.

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use sha2::{Digest, Sha256};
use ssh2::{Channel, CheckResult, ErrorCode, KnownHostFileKind, Session};
use tracing::{debug, info, warn};

use fleetmend_core::{ConnectionParams, ExecResult, HostKeyPolicy};

use crate::error::ConnectionError;

/// libssh2's `LIBSSH2_ERROR_TIMEOUT`.
const LIBSSH2_ERROR_TIMEOUT: i32 = -9;

/// Pause between polls of a channel with no data ready.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit code reported when the remote process ended without an exit status
/// (killed by a signal, or the channel closed early).
pub const NO_EXIT_STATUS: i32 = -1;

/// Runs a single command on a remote host.
///
/// Injected into the evaluator and remediator so tests can substitute a
/// scripted implementation.
pub trait RemoteExecutor: Send + Sync {
    fn execute(
        &self,
        target: &ConnectionParams,
        command: &str,
    ) -> Result<ExecResult, ConnectionError>;
}

/// Production executor built on libssh2.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshExecutor;

impl SshExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl RemoteExecutor for SshExecutor {
    fn execute(
        &self,
        target: &ConnectionParams,
        command: &str,
    ) -> Result<ExecResult, ConnectionError> {
        let session = ScopedSession::open(target)?;
        debug!(address = %session.address, %command, "executing remote command");
        session.run(command)
        // `session` is dropped here on every path, which disconnects it.
    }
}

/// An authenticated session that is always disconnected on drop.
struct ScopedSession {
    session: Session,
    address: String,
    timeout: Duration,
}

impl ScopedSession {
    fn open(target: &ConnectionParams) -> Result<Self, ConnectionError> {
        let address = target.address();

        // Checked before dialing so a typo in the config never costs a
        // connection attempt.
        if !target.private_key_path.is_file() {
            return Err(ConnectionError::Auth(format!(
                "private key {} does not exist",
                target.private_key_path.display()
            )));
        }

        let socket = address
            .to_socket_addrs()
            .map_err(|e| ConnectionError::Resolve(format!("{address}: {e}")))?
            .next()
            .ok_or_else(|| ConnectionError::Resolve(format!("{address}: no addresses")))?;

        let tcp = TcpStream::connect_timeout(&socket, target.timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                ConnectionError::ConnectTimeout(address.clone())
            } else {
                ConnectionError::Connect(format!("{address}: {e}"))
            }
        })?;

        let mut session =
            Session::new().map_err(|e| ConnectionError::Handshake(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(timeout_millis(target.timeout));

        // From here on the guard owns the session and disconnects it on any
        // early return below.
        let mut scoped = ScopedSession {
            session,
            address,
            timeout: target.timeout,
        };
        scoped.session.handshake().map_err(|e| {
            if is_timeout(&e) {
                ConnectionError::ConnectTimeout(scoped.address.clone())
            } else {
                ConnectionError::Handshake(format!("{}: {e}", scoped.address))
            }
        })?;

        scoped.check_host_key(target)?;
        scoped.authenticate(&target.username, &target.private_key_path)?;
        Ok(scoped)
    }

    fn check_host_key(&self, target: &ConnectionParams) -> Result<(), ConnectionError> {
        let (key, _key_type) = self
            .session
            .host_key()
            .ok_or_else(|| ConnectionError::HostKeyRejected("host presented no key".to_string()))?;
        let fingerprint = fingerprint(key);

        match &target.host_key {
            HostKeyPolicy::AcceptNew => {
                info!(address = %self.address, %fingerprint, "accepting host key without verification");
                Ok(())
            }
            HostKeyPolicy::Verify { known_hosts } => {
                let mut hosts = self
                    .session
                    .known_hosts()
                    .map_err(|e| ConnectionError::HostKeyRejected(e.to_string()))?;
                hosts
                    .read_file(known_hosts, KnownHostFileKind::OpenSSH)
                    .map_err(|e| {
                        ConnectionError::HostKeyRejected(format!(
                            "cannot read {}: {e}",
                            known_hosts.display()
                        ))
                    })?;

                known_host_result(
                    hosts.check_port(&target.host, target.port, key),
                    &self.address,
                    known_hosts,
                    &fingerprint,
                )
            }
        }
    }

    fn authenticate(&self, username: &str, key_path: &Path) -> Result<(), ConnectionError> {
        self.session
            .userauth_pubkey_file(username, None, key_path, None)
            .map_err(|e| {
                if is_timeout(&e) {
                    ConnectionError::ConnectTimeout(self.address.clone())
                } else {
                    ConnectionError::Auth(format!("{username}@{}: {e}", self.address))
                }
            })?;

        if !self.session.authenticated() {
            return Err(ConnectionError::Auth(format!(
                "{username}@{}: rejected by server",
                self.address
            )));
        }
        Ok(())
    }

    fn run(&self, command: &str) -> Result<ExecResult, ConnectionError> {
        let mut channel = self.session.channel_session().map_err(channel_error)?;
        channel.exec(command).map_err(channel_error)?;

        // Both streams share one flow-control window, so they are drained
        // together: a command flooding stderr must not stall on an unread
        // stdout.
        let mut stderr_stream = channel.stderr();
        self.session.set_blocking(false);
        let output = collect_output(
            &mut channel,
            &mut stderr_stream,
            |channel: &Channel| channel.eof(),
            self.timeout,
        );
        self.session.set_blocking(true);
        let (stdout, stderr) = output?;

        channel.wait_close().map_err(channel_error)?;
        let status = channel.exit_status().map_err(channel_error)?;
        let signal = channel
            .exit_signal()
            .map_err(channel_error)?
            .exit_signal;

        if let Some(signal) = &signal {
            debug!(address = %self.address, %signal, "remote command terminated by signal");
        }

        Ok(ExecResult {
            exit_code: resolve_exit_code(status, signal.as_deref()),
            stdout: decode_output(&stdout),
            stderr: decode_output(&stderr),
        })
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.disconnect(None, "fleetmend: done", None) {
            debug!(address = %self.address, error = %e, "ssh disconnect failed");
        }
    }
}

/// Map a known_hosts lookup onto accept/reject.
fn known_host_result(
    check: CheckResult,
    address: &str,
    known_hosts: &Path,
    fingerprint: &str,
) -> Result<(), ConnectionError> {
    match check {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => Err(ConnectionError::HostKeyRejected(format!(
            "{address} not listed in {} ({fingerprint})",
            known_hosts.display()
        ))),
        CheckResult::Mismatch => {
            warn!(%address, %fingerprint, "host key mismatch");
            Err(ConnectionError::HostKeyRejected(format!(
                "{address} presented a different key ({fingerprint})"
            )))
        }
        CheckResult::Failure => Err(ConnectionError::HostKeyRejected(format!(
            "known_hosts lookup failed for {address}"
        ))),
    }
}

/// Read `stdout` and `stderr` alternately until `finished` reports the
/// remote end is done, or `timeout` passes without it.
///
/// Both readers are expected to be non-blocking and report
/// [`io::ErrorKind::WouldBlock`] when nothing is ready.
fn collect_output<O: Read, E: Read>(
    stdout: &mut O,
    stderr: &mut E,
    mut finished: impl FnMut(&O) -> bool,
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>), ConnectionError> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    let mut err = Vec::new();

    loop {
        let progressed = drain(stdout, &mut out)? | drain(stderr, &mut err)?;
        if finished(stdout) {
            // Pick up anything queued behind the EOF.
            drain(stdout, &mut out)?;
            drain(stderr, &mut err)?;
            return Ok((out, err));
        }
        if !progressed {
            if Instant::now() >= deadline {
                return Err(ConnectionError::CommandTimeout(format!(
                    "no output or exit within {}s",
                    timeout.as_secs()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Append everything currently readable; `true` if anything was read.
fn drain(reader: &mut impl Read, buf: &mut Vec<u8>) -> Result<bool, ConnectionError> {
    let mut chunk = [0u8; 8192];
    let mut progressed = false;
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(progressed),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(progressed),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(read_error(e)),
        }
    }
}

/// OpenSSH-style `SHA256:<base64>` fingerprint of a raw host key.
fn fingerprint(host_key: &[u8]) -> String {
    let digest = Sha256::digest(host_key);
    format!("SHA256:{}", STANDARD_NO_PAD.encode(digest))
}

/// A signal-terminated process reports status 0 through libssh2; it must
/// never count as success.
fn resolve_exit_code(status: i32, signal: Option<&str>) -> i32 {
    match signal {
        Some(_) => NO_EXIT_STATUS,
        None => status,
    }
}

fn decode_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

fn is_timeout(e: &ssh2::Error) -> bool {
    matches!(e.code(), ErrorCode::Session(LIBSSH2_ERROR_TIMEOUT))
}

fn channel_error(e: ssh2::Error) -> ConnectionError {
    if is_timeout(&e) {
        ConnectionError::CommandTimeout(e.to_string())
    } else {
        ConnectionError::Channel(e.to_string())
    }
}

fn read_error(e: io::Error) -> ConnectionError {
    if e.kind() == io::ErrorKind::TimedOut {
        ConnectionError::CommandTimeout(e.to_string())
    } else {
        ConnectionError::Channel(e.to_string())
    }
}
