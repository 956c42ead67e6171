use std::collections::HashMap;

use crate::model::status::JobState;
use crate::parser::OutputParser;

/// Slurm. Single-job queries use `scontrol show job`, batched queries
/// `squeue -h -o "%i %T"`.
pub struct SlurmParser;

fn state_from_name(name: &str) -> JobState {
    // scontrol may append a reason, e.g. `CANCELLED by 1000`.
    let name = name.split_whitespace().next().unwrap_or(name);
    match name {
        "PENDING" | "CONFIGURING" | "REQUEUED" | "REQUEUE_HOLD" | "SUSPENDED" => JobState::Queued,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" => JobState::Active,
        "COMPLETED" => JobState::Complete,
        "FAILED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "BOOT_FAIL" | "DEADLINE" => {
            JobState::Failed
        }
        "CANCELLED" => JobState::Canceled,
        _ => JobState::Unknown,
    }
}

impl OutputParser for SlurmParser {
    fn parse_job_submission(&self, stdout: &str) -> Option<String> {
        // `Submitted batch job 1234`
        let line = stdout
            .lines()
            .find(|l| l.trim_start().starts_with("Submitted batch job"))?;
        let id = line.split_whitespace().last()?;
        if id.chars().all(|c| c.is_ascii_digit()) {
            Some(id.to_string())
        } else {
            None
        }
    }

    fn parse_job_status(&self, job_id: &str, raw: &str) -> JobState {
        let mut job_seen = false;
        let mut state = JobState::Unknown;
        for item in raw.split_whitespace() {
            if let Some(value) = item.strip_prefix("JobId=") {
                job_seen = crate::parser::same_job_id(value, job_id);
            } else if job_seen && let Some(value) = item.strip_prefix("JobState=") {
                state = state_from_name(value);
            }
        }
        state
    }

    fn parse_job_statuses(&self, _user: &str, raw: &str) -> HashMap<String, JobState> {
        let mut statuses = HashMap::new();
        for line in raw.lines() {
            let mut fields = line.split_whitespace();
            let (Some(id), Some(state)) = (fields.next(), fields.next()) else {
                continue;
            };
            if id.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                statuses.insert(id.to_string(), state_from_name(state));
            }
        }
        statuses
    }

    fn parse_job_id(&self, job_name: &str, raw: &str) -> Option<String> {
        // `squeue ... -o "%i %j"` rows
        for line in raw.lines() {
            let mut fields = line.split_whitespace();
            let (Some(id), Some(name)) = (fields.next(), fields.next()) else {
                continue;
            };
            if name == job_name && id.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                return Some(id.to_string());
            }
        }
        None
    }
}
