use std::collections::HashMap;

use crate::model::status::JobState;
use crate::parser::OutputParser;

/// IBM LSF. Queries read the `bjobs` table.
pub struct LsfParser;

fn state_from_code(code: &str) -> JobState {
    match code {
        "PEND" | "PSUSP" | "USUSP" | "SSUSP" | "WAIT" | "PROV" => JobState::Queued,
        "RUN" => JobState::Active,
        "DONE" => JobState::Complete,
        "EXIT" | "ZOMBI" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

/// Data rows of the bjobs table: jobid, user, stat, queue, ..., job_name, ...
fn table_rows(raw: &str) -> impl Iterator<Item = Vec<&str>> {
    raw.lines()
        .map(|line| line.split_whitespace().collect::<Vec<&str>>())
        .filter(|fields| {
            fields.len() >= 4 && fields[0].chars().all(|c| c.is_ascii_digit()) && !fields[0].is_empty()
        })
}

impl OutputParser for LsfParser {
    fn parse_job_submission(&self, stdout: &str) -> Option<String> {
        // `Job <1234> is submitted to queue <normal>.`
        let line = stdout.lines().find(|l| l.contains("is submitted"))?;
        let start = line.find('<')? + 1;
        let end = line[start..].find('>')? + start;
        let id = &line[start..end];
        if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
            Some(id.to_string())
        } else {
            None
        }
    }

    fn parse_job_status(&self, job_id: &str, raw: &str) -> JobState {
        if raw.contains("is not found") {
            return JobState::Unknown;
        }
        table_rows(raw)
            .find(|fields| fields[0] == job_id)
            .map(|fields| state_from_code(fields[2]))
            .unwrap_or(JobState::Unknown)
    }

    fn parse_job_statuses(&self, _user: &str, raw: &str) -> HashMap<String, JobState> {
        table_rows(raw)
            .map(|fields| (fields[0].to_string(), state_from_code(fields[2])))
            .collect()
    }

    // The lookup command already filters on the name (`bjobs -J`), so the
    // first data row is the match.
    fn parse_job_id(&self, _job_name: &str, raw: &str) -> Option<String> {
        table_rows(raw).next().map(|fields| fields[0].to_string())
    }
}
