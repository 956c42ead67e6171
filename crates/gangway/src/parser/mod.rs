pub mod cloud;
pub mod lsf;
pub mod pbs;
pub mod sge;
pub mod slurm;

use std::collections::HashMap;

use crate::cluster::dialect::SchedulerDialect;
use crate::cluster::session::CommandOutput;
use crate::model::status::JobState;

/// Turns raw scheduler output into normalized results. Implementations are
/// pure string transformations; anything they cannot interpret maps to
/// [`JobState::Unknown`], never to a terminal state.
pub trait OutputParser: Send + Sync {
    /// Extracts the scheduler-assigned job id from submission stdout.
    fn parse_job_submission(&self, stdout: &str) -> Option<String>;

    /// Scheduler-specific failure heuristics beyond a nonzero exit code,
    /// e.g. an error banner printed on stdout with exit 0.
    fn is_job_submission_failed(&self, output: &CommandOutput) -> bool {
        !output.succeeded() || self.parse_job_submission(&output.stdout).is_none()
    }

    /// State of a single job from the single-job monitor command output.
    fn parse_job_status(&self, job_id: &str, raw: &str) -> JobState;

    /// States of every job visible in the per-user monitor command output,
    /// keyed by the id the scheduler reports. Jobs the scheduler no longer
    /// lists are simply absent.
    fn parse_job_statuses(&self, user: &str, raw: &str) -> HashMap<String, JobState>;

    /// Reverse lookup of a job id by job name from the lookup command
    /// output.
    fn parse_job_id(&self, job_name: &str, raw: &str) -> Option<String>;
}

pub fn for_dialect(dialect: SchedulerDialect) -> Box<dyn OutputParser> {
    match dialect {
        SchedulerDialect::Pbs => Box::new(pbs::PbsParser),
        SchedulerDialect::Slurm => Box::new(slurm::SlurmParser),
        SchedulerDialect::Sge => Box::new(sge::SgeParser),
        SchedulerDialect::Lsf => Box::new(lsf::LsfParser),
        SchedulerDialect::Cloud => Box::new(cloud::CloudParser),
    }
}

/// Two PBS-style ids refer to the same job when their numeric parts match;
/// schedulers truncate the server suffix in tabular output.
pub(crate) fn same_job_id(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let prefix = |id: &str| id.split('.').next().unwrap_or(id).to_string();
    prefix(a) == prefix(b)
}
