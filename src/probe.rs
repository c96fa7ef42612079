//! Bounded TCP liveness probes for SSH and WinRM endpoints.
//!
//! Each probe call makes exactly one bounded connection attempt and reports
//! a boolean; the caller owns the retry loop. Recognised transport failures
//! never escape this module — they degrade to "not ready", optionally after
//! a short fixed backoff for failure modes that indicate the network stack
//! is still coming up.

use std::io;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const BANNER_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// Remote-execution channel the instance is probed for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    /// Plain TCP liveness plus banner read against an SSH daemon.
    Ssh,
    /// Connect-only liveness against a WinRM endpoint.
    Winrm,
}

impl Protocol {
    /// Returns the lowercase protocol label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Winrm => "winrm",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FailureClass {
    /// Back off briefly before reporting not-ready; the caller will retry.
    RetryableBackoff,
    /// Report not-ready immediately.
    NotReady,
}

fn classify(kind: io::ErrorKind, protocol: Protocol) -> FailureClass {
    match kind {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::HostUnreachable
        | io::ErrorKind::NetworkUnreachable => FailureClass::RetryableBackoff,
        io::ErrorKind::TimedOut | io::ErrorKind::PermissionDenied => FailureClass::NotReady,
        // WinRM targets are often addressed by hostname before DNS converges,
        // so unrecognised failures (name resolution included) stay retryable.
        _ => match protocol {
            Protocol::Winrm => FailureClass::RetryableBackoff,
            Protocol::Ssh => FailureClass::NotReady,
        },
    }
}

/// Performs single bounded liveness attempts against a `(host, port)` pair.
#[derive(Clone, Debug)]
pub struct ReadinessProbe {
    connect_timeout: Duration,
    banner_timeout: Duration,
    backoff: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessProbe {
    /// Creates a probe with production timeouts.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            banner_timeout: BANNER_TIMEOUT,
            backoff: RETRY_BACKOFF,
        }
    }

    /// Overrides the connect timeout.
    ///
    /// This is primarily used by tests to keep failure scenarios fast.
    #[must_use]
    pub const fn with_connect_timeout(mut self, value: Duration) -> Self {
        self.connect_timeout = value;
        self
    }

    /// Overrides the backoff applied after retryable failures.
    ///
    /// This is primarily used by tests to keep failure scenarios fast.
    #[must_use]
    pub const fn with_backoff(mut self, value: Duration) -> Self {
        self.backoff = value;
        self
    }

    /// Makes one bounded liveness attempt and reports readiness.
    ///
    /// Recognised transport failures degrade to `false`; retryable ones
    /// (connection refused, host or network unreachable, and for WinRM name
    /// resolution) sleep the configured backoff first so the caller's loop
    /// does not spin.
    pub async fn probe(&self, host: &str, port: u16, protocol: Protocol) -> bool {
        match protocol {
            Protocol::Ssh => self.probe_ssh(host, port).await,
            Protocol::Winrm => self.probe_winrm(host, port).await,
        }
    }

    async fn probe_ssh(&self, host: &str, port: u16) -> bool {
        let stream = match self.connect(host, port, Protocol::Ssh).await {
            Ok(stream) => stream,
            Err(()) => return false,
        };

        // sshd is considered up once the socket turns readable; the banner
        // is read and discarded so the daemon does not log a protocol error.
        match timeout(self.banner_timeout, stream.readable()).await {
            Ok(Ok(())) => {
                let mut banner = [0_u8; 256];
                if let Ok(len) = stream.try_read(&mut banner) {
                    debug!(host, port, banner_len = len, "sshd accepting connections");
                }
                true
            }
            Ok(Err(_)) | Err(_) => false,
        }
    }

    async fn probe_winrm(&self, host: &str, port: u16) -> bool {
        self.connect(host, port, Protocol::Winrm).await.is_ok()
    }

    /// Connects with a bounded wait, classifying failures. The stream is
    /// dropped by the caller on every exit path.
    async fn connect(&self, host: &str, port: u16, protocol: Protocol) -> Result<TcpStream, ()> {
        let attempt = timeout(self.connect_timeout, TcpStream::connect((host, port))).await;
        let error_kind = match attempt {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(err)) => err.kind(),
            Err(_) => io::ErrorKind::TimedOut,
        };

        debug!(host, port, kind = ?error_kind, "connection attempt failed");
        if classify(error_kind, protocol) == FailureClass::RetryableBackoff {
            sleep(self.backoff).await;
        }
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tokio::net::TcpListener;

    #[rstest]
    #[case(io::ErrorKind::ConnectionRefused, Protocol::Ssh, FailureClass::RetryableBackoff)]
    #[case(io::ErrorKind::HostUnreachable, Protocol::Ssh, FailureClass::RetryableBackoff)]
    #[case(io::ErrorKind::NetworkUnreachable, Protocol::Ssh, FailureClass::RetryableBackoff)]
    #[case(io::ErrorKind::TimedOut, Protocol::Ssh, FailureClass::NotReady)]
    #[case(io::ErrorKind::PermissionDenied, Protocol::Ssh, FailureClass::NotReady)]
    #[case(io::ErrorKind::Other, Protocol::Ssh, FailureClass::NotReady)]
    #[case(io::ErrorKind::Other, Protocol::Winrm, FailureClass::RetryableBackoff)]
    #[case(io::ErrorKind::TimedOut, Protocol::Winrm, FailureClass::NotReady)]
    fn classification_matches_policy(
        #[case] kind: io::ErrorKind,
        #[case] protocol: Protocol,
        #[case] expected: FailureClass,
    ) {
        assert_eq!(classify(kind, protocol), expected);
    }

    fn fast_probe() -> ReadinessProbe {
        ReadinessProbe::new()
            .with_connect_timeout(Duration::from_millis(250))
            .with_backoff(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn winrm_probe_reports_ready_on_plain_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        assert!(fast_probe().probe("127.0.0.1", port, Protocol::Winrm).await);
    }

    #[tokio::test]
    async fn ssh_probe_reads_banner_when_server_writes_one() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            stream.writable().await.expect("writable");
            stream.try_write(b"SSH-2.0-OpenSSH_9.6\r\n").expect("write banner");
            // Hold the socket open until the probe finishes.
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        assert!(fast_probe().probe("127.0.0.1", port, Protocol::Ssh).await);
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn refused_connection_reports_not_ready() {
        // Bind then drop to obtain a port that actively refuses connections.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        assert!(!fast_probe().probe("127.0.0.1", port, Protocol::Ssh).await);
        assert!(!fast_probe().probe("127.0.0.1", port, Protocol::Winrm).await);
    }
}
