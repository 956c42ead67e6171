use std::collections::HashMap;

use crate::model::status::JobState;
use crate::parser::OutputParser;

/// Grid Engine (SGE/UGE). Both single and batched queries read the `qstat`
/// table; SGE drops finished jobs from it entirely.
pub struct SgeParser;

fn state_from_code(code: &str) -> JobState {
    match code {
        "qw" | "hqw" | "hRwq" | "w" => JobState::Queued,
        "r" | "t" | "Rr" | "Rt" => JobState::Active,
        "s" | "ts" | "S" | "tS" | "T" | "tT" => JobState::Queued,
        "Eqw" | "Ehqw" | "EhRqw" => JobState::Failed,
        "dr" | "dt" | "dRr" | "ds" => JobState::Canceled,
        _ => JobState::Unknown,
    }
}

/// Data rows of the qstat table: job id, priority, name, user, state, ...
fn table_rows(raw: &str) -> impl Iterator<Item = Vec<&str>> {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<&str>>())
        .filter(|fields| {
            fields.len() >= 5
                && fields[0].chars().all(|c| c.is_ascii_digit())
                && !fields[0].is_empty()
        })
}

impl OutputParser for SgeParser {
    fn parse_job_submission(&self, stdout: &str) -> Option<String> {
        // `Your job 1234 ("name") has been submitted`
        let line = stdout.lines().find(|l| l.trim_start().starts_with("Your job"))?;
        let id = line.split_whitespace().nth(2)?;
        if id.chars().all(|c| c.is_ascii_digit()) {
            Some(id.to_string())
        } else {
            None
        }
    }

    fn parse_job_status(&self, job_id: &str, raw: &str) -> JobState {
        table_rows(raw)
            .find(|fields| fields[0] == job_id)
            .map(|fields| state_from_code(fields[4]))
            .unwrap_or(JobState::Unknown)
    }

    fn parse_job_statuses(&self, _user: &str, raw: &str) -> HashMap<String, JobState> {
        table_rows(raw)
            .map(|fields| (fields[0].to_string(), state_from_code(fields[4])))
            .collect()
    }

    fn parse_job_id(&self, job_name: &str, raw: &str) -> Option<String> {
        table_rows(raw)
            .find(|fields| job_name.starts_with(fields[2]) || fields[2] == job_name)
            .map(|fields| fields[0].to_string())
    }
}
