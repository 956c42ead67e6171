use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized job state across scheduler dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    Queued,
    Active,
    Complete,
    Failed,
    Canceled,
    Unknown,
}

impl JobState {
    /// Terminal states are never left once entered; the monitor enforces
    /// this when reconciling poll results.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed | JobState::Canceled)
    }

    /// Lifecycle position: SUBMITTED before QUEUED before ACTIVE before the
    /// terminal states. UNKNOWN has no position.
    fn rank(&self) -> u8 {
        match self {
            JobState::Unknown => 0,
            JobState::Submitted => 1,
            JobState::Queued => 2,
            JobState::Active => 3,
            JobState::Complete | JobState::Failed | JobState::Canceled => 4,
        }
    }

    /// Whether a transition from `self` to `next` may be recorded. Statuses
    /// only move forward; a poll that reports an earlier state is stale.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            JobState::Submitted => "SUBMITTED",
            JobState::Queued => "QUEUED",
            JobState::Active => "ACTIVE",
            JobState::Complete => "COMPLETE",
            JobState::Failed => "FAILED",
            JobState::Canceled => "CANCELED",
            JobState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// One observed/derived status of a job. `inferred` marks statuses derived
/// from policy (e.g. the scheduler stopped reporting a previously active
/// job) rather than from an explicit scheduler signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub reason: Option<String>,
    pub time_of_state_change: DateTime<Utc>,
    pub inferred: bool,
}

impl JobStatus {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            reason: None,
            time_of_state_change: Utc::now(),
            inferred: false,
        }
    }

    pub fn with_reason(state: JobState, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(state)
        }
    }

    pub fn inferred(state: JobState, reason: impl Into<String>) -> Self {
        Self {
            inferred: true,
            ..Self::with_reason(state, reason)
        }
    }
}

/// Result of one batch-job submission attempt, as observed on the remote
/// side. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmissionOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub command: String,
    pub job_id: Option<String>,
    pub submission_failed: bool,
    pub failure_reason: Option<String>,
}

/// The job record persisted through the external registry. The scheduler-
/// assigned `job_id` is distinct from the internal task/experiment ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobModel {
    pub job_id: String,
    pub job_name: String,
    pub task_id: String,
    pub experiment_id: String,
    pub working_dir: String,
    pub description: Option<String>,
    pub creation_time: DateTime<Utc>,
}

impl JobModel {
    pub fn new(
        job_name: impl Into<String>,
        task_id: impl Into<String>,
        experiment_id: impl Into<String>,
        working_dir: impl Into<String>,
    ) -> Self {
        Self {
            job_id: String::new(),
            job_name: job_name.into(),
            task_id: task_id.into(),
            experiment_id: experiment_id.into(),
            working_dir: working_dir.into(),
            description: None,
            creation_time: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::JobState;

    #[test]
    fn terminal_states() {
        assert!(JobState::Complete.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Canceled.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(!JobState::Unknown.is_terminal());
    }

    #[test]
    fn no_transition_out_of_terminal_state() {
        assert!(!JobState::Complete.can_transition_to(JobState::Active));
        assert!(!JobState::Failed.can_transition_to(JobState::Queued));
        assert!(JobState::Queued.can_transition_to(JobState::Active));
        assert!(!JobState::Active.can_transition_to(JobState::Active));
    }

    #[test]
    fn stale_polls_do_not_move_status_backwards() {
        assert!(!JobState::Active.can_transition_to(JobState::Queued));
        assert!(!JobState::Queued.can_transition_to(JobState::Submitted));
        assert!(JobState::Active.can_transition_to(JobState::Complete));
        assert!(!JobState::Active.can_transition_to(JobState::Unknown));
    }
}
