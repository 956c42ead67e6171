use std::collections::HashMap;

use crate::model::status::JobState;
use crate::parser::OutputParser;

/// Bare VMs without a scheduler: the forked process PID is the job id and
/// `ps` is the status source. A vanished PID is reported as Unknown here;
/// the monitor infers completion from repeated absence.
pub struct CloudParser;

fn state_from_stat(stat: &str) -> JobState {
    match stat.chars().next() {
        Some('R') | Some('S') | Some('D') | Some('I') => JobState::Active,
        Some('T') => JobState::Queued,
        Some('Z') => JobState::Complete,
        _ => JobState::Unknown,
    }
}

fn pid_rows(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.lines().filter_map(|line| {
        let mut fields = line.split_whitespace();
        let pid = fields.next()?;
        let stat = fields.next()?;
        if pid.chars().all(|c| c.is_ascii_digit()) && !pid.is_empty() {
            Some((pid, stat))
        } else {
            None
        }
    })
}

impl OutputParser for CloudParser {
    fn parse_job_submission(&self, stdout: &str) -> Option<String> {
        // The submit command echoes the PID of the forked process.
        let pid = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
        if pid.chars().all(|c| c.is_ascii_digit()) {
            Some(pid.to_string())
        } else {
            None
        }
    }

    fn parse_job_status(&self, job_id: &str, raw: &str) -> JobState {
        pid_rows(raw)
            .find(|(pid, _)| *pid == job_id)
            .map(|(_, stat)| state_from_stat(stat))
            .unwrap_or(JobState::Unknown)
    }

    fn parse_job_statuses(&self, _user: &str, raw: &str) -> HashMap<String, JobState> {
        pid_rows(raw)
            .map(|(pid, stat)| (pid.to_string(), state_from_stat(stat)))
            .collect()
    }

    fn parse_job_id(&self, _job_name: &str, raw: &str) -> Option<String> {
        // pgrep prints one PID per line.
        self.parse_job_submission(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::CloudParser;
    use crate::model::status::JobState;
    use crate::parser::OutputParser;

    #[test]
    fn forked_pid_is_the_job_id() {
        let parser = CloudParser;
        assert_eq!(parser.parse_job_submission("48213\n"), Some("48213".to_string()));
        assert_eq!(parser.parse_job_submission("bash: run.sh: Permission denied\n"), None);
    }

    #[test]
    fn running_process_is_active() {
        let parser = CloudParser;
        assert_eq!(parser.parse_job_status("48213", "48213 S\n"), JobState::Active);
        assert_eq!(parser.parse_job_status("48213", ""), JobState::Unknown);
        assert_eq!(parser.parse_job_status("48213", "48213 Z\n"), JobState::Complete);
    }

    #[test]
    fn batched_process_listing() {
        let parser = CloudParser;
        let statuses = parser.parse_job_statuses("ubuntu", "48213 S\n48300 R\n48400 T\n");
        assert_eq!(statuses.get("48213"), Some(&JobState::Active));
        assert_eq!(statuses.get("48400"), Some(&JobState::Queued));
        assert_eq!(statuses.len(), 3);
    }
}
