use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::config;
use crate::{Error, Result};

/// Captured result of one remote command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    /// Converts a nonzero exit into [`Error::RemoteCommand`], for call sites
    /// that do not inspect the exit code themselves.
    pub fn into_result(self) -> Result<CommandOutput> {
        if self.succeeded() {
            Ok(self)
        } else {
            Err(Error::RemoteCommand {
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Per-session timeout configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub transfer_timeout: Duration,
    pub keepalive: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: config::get_connect_timeout(),
            command_timeout: config::get_remote_command_timeout(),
            transfer_timeout: config::get_file_transfer_timeout(),
            keepalive: Some(Duration::from_secs(30)),
        }
    }
}

/// One authenticated connection to a remote host, exposing the primitive
/// remote operations everything else is built from.
///
/// A session is not safe for concurrent command execution from multiple
/// flows; implementations serialize operations internally, and callers that
/// need parallelism open one session per flow (bounded per host by
/// [`crate::common::limiter::HostLimiter`]).
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Runs a command, capturing stdout/stderr/exit code. A nonzero exit is
    /// reported inside the returned [`CommandOutput`], not as an error;
    /// exceeding the per-call budget returns [`Error::Timeout`].
    async fn execute(&self, command: &str, workdir: Option<&str>) -> Result<CommandOutput>;

    async fn upload_file(&self, local: &Path, remote: &str) -> Result<()>;

    async fn download_file(&self, remote: &str, local: &Path) -> Result<()>;

    /// Creates a directory including missing parents. Idempotent: an already
    /// existing directory is success.
    async fn make_directory(&self, path: &str) -> Result<()>;

    async fn list_directory(&self, path: &str) -> Result<Vec<String>>;

    /// Releases the connection. Must be called on every exit path; closing
    /// an already closed session is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Opens authenticated sessions. A seam so that submission flows can be
/// exercised against an in-memory transport.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(
        &self,
        server: &crate::cluster::server::ServerInfo,
        auth: &crate::cluster::server::AuthMethod,
    ) -> Result<Box<dyn RemoteSession>>;
}

/// Applies a wall-clock budget to one remote operation.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(limit)),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CommandOutput, with_timeout};
    use crate::Error;

    #[test]
    fn nonzero_exit_becomes_remote_command_error() {
        let output = CommandOutput {
            exit_code: 127,
            stdout: String::new(),
            stderr: "qsub: command not found".into(),
        };
        match output.into_result() {
            Err(Error::RemoteCommand { exit_code, stderr }) => {
                assert_eq!(exit_code, 127);
                assert!(stderr.contains("not found"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unresponsive_transport_times_out() {
        let limit = Duration::from_secs(60);
        let result: crate::Result<()> =
            with_timeout(limit, futures::future::pending()).await;
        assert!(matches!(result, Err(Error::Timeout(d)) if d == limit));
    }
}
