use std::time::Duration;

use thiserror::Error;

use crate::common::error::GangwayError::Generic;

#[derive(Debug, Error)]
pub enum GangwayError {
    /// Network or authentication failure while talking to a remote host.
    /// Retryable with backoff.
    #[error("Connection error: {0}")]
    Connection(String),
    /// A remote command ran and exited with a nonzero code. Not retryable
    /// without operator intervention.
    #[error("Remote command exited with code {exit_code}: {stderr}")]
    RemoteCommand { exit_code: i32, stderr: String },
    /// A remote operation exceeded its time budget.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// Scheduler output did not match the expected shape.
    #[error("Cannot parse scheduler output: {0}")]
    Parse(String),
    /// The compute target never became ready. Fatal to the submission flow.
    #[error("Provisioning failed: {0}")]
    Provisioning(String),
    /// Credential fetch or renewal failed. Fatal to the flow and surfaced
    /// distinctly because operator action is usually required.
    #[error("Credential error: {0}")]
    Credential(String),
    /// The operation was interrupted by a cancellation request.
    #[error("Operation cancelled")]
    Cancelled,
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Error: {0}")]
    Generic(String),
}

impl GangwayError {
    /// Transient errors that a caller may retry per its retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GangwayError::Connection(_) | GangwayError::Timeout(_)
        )
    }
}

impl From<anyhow::Error> for GangwayError {
    fn from(error: anyhow::Error) -> Self {
        Generic(format!("{error:#}"))
    }
}

impl From<String> for GangwayError {
    fn from(e: String) -> Self {
        Generic(e)
    }
}
