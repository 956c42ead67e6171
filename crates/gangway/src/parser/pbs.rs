use std::collections::HashMap;

use serde_json::Value;

use crate::model::status::JobState;
use crate::parser::OutputParser;

/// PBS Professional / Torque. Single-job queries use `qstat -f -F json -x`,
/// batched queries the classic `qstat -u` table.
pub struct PbsParser;

fn state_from_code(code: &str) -> JobState {
    match code {
        "Q" | "H" | "W" | "T" => JobState::Queued,
        "R" | "E" => JobState::Active,
        "S" => JobState::Queued,
        "F" | "C" => JobState::Complete,
        _ => JobState::Unknown,
    }
}

impl OutputParser for PbsParser {
    fn parse_job_submission(&self, stdout: &str) -> Option<String> {
        let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
        // qsub prints exactly the job id, e.g. `1234.pbs.example.org`.
        let numeric_prefix = line.split('.').next()?;
        if !numeric_prefix.is_empty()
            && numeric_prefix.chars().all(|c| c.is_ascii_digit())
            && !line.contains(char::is_whitespace)
        {
            Some(line.to_string())
        } else {
            None
        }
    }

    fn parse_job_status(&self, job_id: &str, raw: &str) -> JobState {
        let Ok(document) = serde_json::from_str::<Value>(raw) else {
            return JobState::Unknown;
        };
        let Some(jobs) = document.get("Jobs").and_then(Value::as_object) else {
            return JobState::Unknown;
        };
        for (id, job) in jobs {
            if !crate::parser::same_job_id(id, job_id) {
                continue;
            }
            return job
                .get("job_state")
                .and_then(Value::as_str)
                .map(state_from_code)
                .unwrap_or(JobState::Unknown);
        }
        JobState::Unknown
    }

    fn parse_job_statuses(&self, _user: &str, raw: &str) -> HashMap<String, JobState> {
        let mut statuses = HashMap::new();
        for line in raw.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // Data rows: job id first, single-letter state second to last.
            if fields.len() < 10 {
                continue;
            }
            let id = fields[0];
            if !id.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            let state = fields[fields.len() - 2];
            if state.len() == 1 {
                statuses.insert(id.to_string(), state_from_code(state));
            }
        }
        statuses
    }

    fn parse_job_id(&self, job_name: &str, raw: &str) -> Option<String> {
        for line in raw.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                continue;
            }
            let id = fields[0];
            if !id.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                continue;
            }
            // The Jobname column is truncated to 16 characters in qstat
            // output, so match on prefix.
            let name = fields[3];
            if job_name.starts_with(name) || name == job_name {
                return Some(id.to_string());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::PbsParser;
    use crate::model::status::JobState;
    use crate::parser::OutputParser;

    const QSTAT_USER: &str = r#"
pbs.example.org:
                                                            Req'd  Req'd   Elap
Job ID          Username Queue    Jobname    SessID NDS TSK Memory Time  S Time
--------------- -------- -------- ---------- ------ --- --- ------ ----- - -----
2039.pbs        testuser normal   A203954245  12345   2  16    4gb 00:30 R 00:10
2040.pbs        testuser normal   A203954246    --    1   8    2gb 01:00 Q   --
"#;

    #[test]
    fn submission_output_yields_full_job_id() {
        let parser = PbsParser;
        assert_eq!(
            parser.parse_job_submission("2039.pbs.example.org\n"),
            Some("2039.pbs.example.org".to_string())
        );
        assert_eq!(parser.parse_job_submission("qsub: would exceed queue limit\n"), None);
        assert_eq!(parser.parse_job_submission(""), None);
    }

    #[test]
    fn single_job_json_status() {
        let parser = PbsParser;
        let raw = r#"{"Jobs":{"2039.pbs.example.org":{"Job_Name":"A2039","job_state":"R"}}}"#;
        assert_eq!(parser.parse_job_status("2039.pbs.example.org", raw), JobState::Active);
        assert_eq!(parser.parse_job_status("2039.pbs", raw), JobState::Active);
        assert_eq!(parser.parse_job_status("9999.pbs", raw), JobState::Unknown);
        assert_eq!(parser.parse_job_status("2039.pbs", "not json"), JobState::Unknown);
    }

    #[test]
    fn batched_table_statuses() {
        let parser = PbsParser;
        let statuses = parser.parse_job_statuses("testuser", QSTAT_USER);
        assert_eq!(statuses.get("2039.pbs"), Some(&JobState::Active));
        assert_eq!(statuses.get("2040.pbs"), Some(&JobState::Queued));
        assert_eq!(statuses.len(), 2);
    }

    #[test]
    fn job_id_by_truncated_name() {
        let parser = PbsParser;
        assert_eq!(
            parser.parse_job_id("A2039542453333", QSTAT_USER),
            Some("2039.pbs".to_string())
        );
        assert_eq!(parser.parse_job_id("NoSuchJob", QSTAT_USER), None);
    }
}
