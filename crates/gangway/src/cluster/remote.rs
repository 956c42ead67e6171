use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::cluster::dialect::JobManagerConfiguration;
use crate::cluster::session::RemoteSession;
use crate::cluster::server::ServerInfo;
use crate::model::status::{JobState, JobStatus, JobSubmissionOutput};
use crate::monitor::StatusProbe;
use crate::parser::{OutputParser, same_job_id};
use crate::{Error, Result};

/// High-level operations against one scheduler installation, combining a
/// session, the dialect's command templates and its output parser. Owns the
/// session; callers release it through [`RemoteCluster::close`].
pub struct RemoteCluster {
    server: ServerInfo,
    session: Box<dyn RemoteSession>,
    config: JobManagerConfiguration,
    parser: Box<dyn OutputParser>,
}

impl RemoteCluster {
    pub fn new(
        server: ServerInfo,
        session: Box<dyn RemoteSession>,
        config: JobManagerConfiguration,
    ) -> Self {
        let parser = crate::parser::for_dialect(config.dialect);
        Self {
            server,
            session,
            config,
            parser,
        }
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    pub fn session(&self) -> &dyn RemoteSession {
        self.session.as_ref()
    }

    /// Uploads a rendered job script into `working_dir` and submits it.
    /// Submission failure is reported inside the returned output, not as an
    /// error; transport problems are errors.
    pub async fn submit_batch_job(
        &self,
        local_script: &Path,
        working_dir: &str,
    ) -> Result<JobSubmissionOutput> {
        let file_name = local_script
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Generic(format!("Bad script path {}", local_script.display())))?;
        let remote_script = format!("{}/{file_name}", working_dir.trim_end_matches('/'));
        self.session.upload_file(local_script, &remote_script).await?;

        let command = format!(
            "chmod +x {} && {}",
            crate::common::strutils::sh_quote(&remote_script),
            self.config.submit_command(&remote_script)
        );
        let output = self.session.execute(&command, Some(working_dir)).await?;

        let job_id = self.parser.parse_job_submission(&output.stdout);
        let submission_failed = self.parser.is_job_submission_failed(&output);
        let failure_reason = submission_failed.then(|| {
            if output.stderr.trim().is_empty() {
                format!("Submission produced no job id (exit {})", output.exit_code)
            } else {
                output.stderr.trim().to_string()
            }
        });
        if let Some(reason) = &failure_reason {
            log::warn!("Submission on {} failed: {reason}", self.server.addr());
        }
        Ok(JobSubmissionOutput {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            command,
            job_id,
            submission_failed,
            failure_reason,
        })
    }

    /// Requests cancellation. A rejected cancel command means the scheduler
    /// no longer knows the job; that degrades to Canceled with the
    /// scheduler's message as the reason.
    pub async fn cancel_job(&self, job_id: &str) -> Result<JobStatus> {
        let command = self.config.cancel_command(job_id);
        let output = self.session.execute(&command, None).await?;
        if output.succeeded() {
            Ok(JobStatus::new(JobState::Canceled))
        } else {
            log::debug!(
                "Cancel of {job_id} on {} rejected: {}",
                self.server.addr(),
                output.stderr.trim()
            );
            Ok(JobStatus::with_reason(
                JobState::Canceled,
                output.stderr.trim().to_string(),
            ))
        }
    }

    /// Polls a single job. A rejected status query maps to Unknown because
    /// most schedulers drop finished jobs from their tables.
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobState> {
        let command = self.config.monitor_command(job_id);
        let output = self.session.execute(&command, None).await?;
        if !output.succeeded() {
            log::debug!(
                "Status query for {job_id} on {} exited {}",
                self.server.addr(),
                output.exit_code
            );
            return Ok(JobState::Unknown);
        }
        Ok(self.parser.parse_job_status(job_id, &output.stdout))
    }

    /// Polls every requested job with one remote command. Every requested id
    /// gets an entry; jobs the scheduler no longer lists map to Unknown.
    pub async fn get_job_statuses(
        &self,
        user: &str,
        job_ids: &[String],
    ) -> Result<HashMap<String, JobState>> {
        let command = self.config.user_monitor_command(user);
        let output = self.session.execute(&command, None).await?;
        let reported = if output.succeeded() {
            self.parser.parse_job_statuses(user, &output.stdout)
        } else {
            log::debug!(
                "Batched status query on {} exited {}",
                self.server.addr(),
                output.exit_code
            );
            HashMap::new()
        };
        Ok(job_ids
            .iter()
            .map(|id| {
                let state = reported
                    .iter()
                    .find(|(reported_id, _)| same_job_id(reported_id, id))
                    .map(|(_, state)| *state)
                    .unwrap_or(JobState::Unknown);
                (id.clone(), state)
            })
            .collect())
    }

    /// Recovers a scheduler job id from the job name.
    pub async fn get_job_id_by_name(&self, job_name: &str, user: &str) -> Result<Option<String>> {
        let command = self.config.job_id_by_name_command(job_name, user);
        let output = self.session.execute(&command, None).await?;
        if !output.succeeded() {
            return Ok(None);
        }
        Ok(self.parser.parse_job_id(job_name, &output.stdout))
    }

    pub async fn make_directory(&self, path: &str) -> Result<()> {
        self.session.make_directory(path).await
    }

    pub async fn close(&self) -> Result<()> {
        self.session.close().await
    }
}

#[async_trait]
impl StatusProbe for RemoteCluster {
    async fn poll(&self, user: &str, job_ids: &[String]) -> Result<HashMap<String, JobState>> {
        self.get_job_statuses(user, job_ids).await
    }

    async fn close(&self) -> Result<()> {
        self.session.close().await
    }
}
