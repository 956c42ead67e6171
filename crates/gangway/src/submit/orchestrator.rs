use std::sync::Arc;
use std::time::SystemTime;

use tokio_util::sync::CancellationToken;

use crate::cluster::dialect::{JobManagerConfiguration, SchedulerDialect, ScriptSpec};
use crate::cluster::remote::RemoteCluster;
use crate::cluster::server::{AuthMethod, ServerInfo};
use crate::cluster::session::SessionFactory;
use crate::common::config;
use crate::common::limiter::HostLimiter;
use crate::common::retry::RetryPolicy;
use crate::external::{CredentialClient, RegistryClient};
use crate::model::status::{JobModel, JobState, JobStatus};
use crate::monitor::registry::{MonitorEntry, MonitorRegistry};
use crate::submit::target::ComputeTarget;
use crate::{Error, Result};

/// Which kind of secret the credential token resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    Ssh,
    Password,
}

/// Everything needed to run one job submission flow.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub task_id: String,
    pub experiment_id: String,
    pub gateway_id: String,
    pub job_name: String,
    pub script: ScriptSpec,
    pub server: ServerInfo,
    pub dialect: SchedulerDialect,
    pub scheduler_path: String,
    pub credential: CredentialKind,
}

/// How a submission flow ended when it did not fail.
#[derive(Debug)]
pub enum SubmissionOutcome {
    /// The job is on the scheduler and registered with the monitor.
    /// `warnings` records post-submission persistence problems that must not
    /// mask the fact that the job is running.
    Submitted { job_id: String, warnings: Vec<String> },
    /// The flow was cancelled; any already submitted job received one
    /// best-effort remote cancel and the CANCELED status was recorded.
    Cancelled,
}

/// Per-flow handles that the cleanup paths need. Tracks how far the flow got.
#[derive(Default)]
struct FlowState {
    cluster: Option<Arc<RemoteCluster>>,
    job_id: Option<String>,
    monitored: bool,
}

/// Runs submission flows end to end: credential resolution, target
/// provisioning, staging, scheduler submission and monitor hand-off.
///
/// Every externally visible action is persisted through the registry before
/// or immediately after it happens, so a restart can always reconstruct what
/// was done remotely.
pub struct JobSubmissionOrchestrator {
    registry: Arc<dyn RegistryClient>,
    credentials: Arc<dyn CredentialClient>,
    sessions: Arc<dyn SessionFactory>,
    monitor: Arc<MonitorRegistry>,
    limiter: HostLimiter,
    connect_retry: RetryPolicy,
    directory_retry: RetryPolicy,
    submit_retry: RetryPolicy,
}

impl JobSubmissionOrchestrator {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        credentials: Arc<dyn CredentialClient>,
        sessions: Arc<dyn SessionFactory>,
        monitor: Arc<MonitorRegistry>,
    ) -> Self {
        Self {
            registry,
            credentials,
            sessions,
            monitor,
            limiter: HostLimiter::new(config::get_max_sessions_per_host()),
            connect_retry: config::get_submit_retry(),
            directory_retry: config::get_directory_retry(),
            submit_retry: config::get_submit_retry(),
        }
    }

    #[cfg(test)]
    fn with_retries(mut self, connect: RetryPolicy, directory: RetryPolicy, submit: RetryPolicy) -> Self {
        self.connect_retry = connect;
        self.directory_retry = directory;
        self.submit_retry = submit;
        self
    }

    /// Drives one submission to completion, cancellation or failure.
    pub async fn run(
        &self,
        request: SubmissionRequest,
        target: &dyn ComputeTarget,
        cancel: &CancellationToken,
    ) -> Result<SubmissionOutcome> {
        let mut flow = FlowState::default();
        match self.execute(&request, target, cancel, &mut flow).await {
            Ok(outcome) => Ok(outcome),
            Err(Error::Cancelled) => {
                self.abandon(&request, flow).await;
                Ok(SubmissionOutcome::Cancelled)
            }
            Err(error) => {
                self.record_failure(&request, &flow, &error).await;
                if let Some(cluster) = &flow.cluster
                    && !flow.monitored
                    && let Err(close_error) = cluster.close().await
                {
                    log::debug!("Session close after failure: {close_error:?}");
                }
                Err(error)
            }
        }
    }

    async fn execute(
        &self,
        request: &SubmissionRequest,
        target: &dyn ComputeTarget,
        cancel: &CancellationToken,
        flow: &mut FlowState,
    ) -> Result<SubmissionOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        log::info!(
            "Submitting job {} (task {}) to a {} target",
            request.job_name,
            request.task_id,
            request.dialect
        );

        let (auth, credential_expiry) = self.resolve_credential(request).await?;
        let address = target.resolve(cancel).await?;
        let server = ServerInfo {
            host: address.host,
            port: address.port,
            ..request.server.clone()
        };
        let user_name = auth.username(&server.username).to_string();

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.limiter.acquire(&server.host) => permit,
        };

        let session = self
            .connect_retry
            .retry(cancel, || self.sessions.open(&server, &auth))
            .await?;
        let manager = JobManagerConfiguration::new(request.dialect, request.scheduler_path.clone());
        let cluster = Arc::new(RemoteCluster::new(server.clone(), session, manager.clone()));
        flow.cluster = Some(cluster.clone());

        // Persist-then-act: the job record and every lifecycle status land
        // in the registry before the action they precede, so a crash never
        // leaves remote state without a persisted trail. Until the
        // scheduler assigns an id, statuses are keyed by the job name.
        let working_dir = request.script.working_dir.clone();
        let mut job = JobModel::new(
            &request.job_name,
            &request.task_id,
            &request.experiment_id,
            &working_dir,
        );
        self.registry.add_job(&job).await?;
        self.persist_status(JobState::Queued, &request.task_id, &request.job_name)
            .await?;

        self.directory_retry
            .retry(cancel, || cluster.make_directory(&working_dir))
            .await?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir
            .path()
            .join(format!("{}{}", request.job_name, manager.script_extension()));
        tokio::fs::write(&script_path, request.script.render(request.dialect)).await?;

        self.persist_status(JobState::Active, &request.task_id, &request.job_name)
            .await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let output = self
            .submit_retry
            .retry(cancel, || cluster.submit_batch_job(&script_path, &working_dir))
            .await?;
        let job_id = match output.job_id {
            Some(job_id) if !output.submission_failed => job_id,
            _ => {
                return Err(Error::Generic(format!(
                    "Job submission rejected: {}",
                    output
                        .failure_reason
                        .as_deref()
                        .unwrap_or("no job id in scheduler output")
                )));
            }
        };
        flow.job_id = Some(job_id.clone());
        log::info!("Job {} submitted as {job_id}", request.job_name);

        // The job is live on the scheduler now; persistence problems from
        // here on are warnings, never a reason to report the flow failed.
        let mut warnings = Vec::new();
        job.job_id = job_id.clone();
        if let Err(error) = self.registry.add_job(&job).await {
            warn_and_keep(
                &mut warnings,
                format!("Cannot persist scheduler job id: {error:?}"),
            );
        }

        self.monitor
            .register(
                MonitorEntry {
                    job_id: job_id.clone(),
                    job_name: request.job_name.clone(),
                    task_id: request.task_id.clone(),
                    experiment_id: request.experiment_id.clone(),
                    user_name,
                    server,
                    initial_state: JobState::Active,
                },
                cluster,
                credential_expiry,
            )
            .await;
        flow.monitored = true;

        Ok(SubmissionOutcome::Submitted { job_id, warnings })
    }

    async fn persist_status(&self, state: JobState, task_id: &str, job_id: &str) -> Result<()> {
        self.registry
            .add_job_status(&JobStatus::new(state), task_id, job_id)
            .await
    }

    async fn resolve_credential(
        &self,
        request: &SubmissionRequest,
    ) -> Result<(AuthMethod, Option<SystemTime>)> {
        match request.credential {
            CredentialKind::Ssh => {
                let credential = self
                    .credentials
                    .ssh_credential(&request.server.credential_token, &request.gateway_id)
                    .await?;
                let expiry = credential.expires_at;
                Ok((credential.into_auth(), expiry))
            }
            CredentialKind::Password => {
                let credential = self
                    .credentials
                    .password_credential(&request.server.credential_token, &request.gateway_id)
                    .await?;
                Ok((credential.into_auth(), None))
            }
        }
    }

    /// Cancellation path: stop monitoring, fire exactly one best-effort
    /// remote cancel for an already submitted job, release the session and
    /// record CANCELED. None of these steps may raise.
    async fn abandon(&self, request: &SubmissionRequest, flow: FlowState) {
        log::info!("Submission of {} cancelled", request.job_name);
        if let Some(job_id) = &flow.job_id {
            self.monitor.unregister(job_id).await;
        }
        if let Some(cluster) = &flow.cluster {
            if let Some(job_id) = &flow.job_id
                && let Err(error) = cluster.cancel_job(job_id).await
            {
                log::warn!("Remote cancel of {job_id} failed: {error:?}");
            }
            if let Err(error) = cluster.close().await {
                log::debug!("Session close after cancel: {error:?}");
            }
        }
        let status = JobStatus::with_reason(JobState::Canceled, "Cancelled by user request");
        let job_id = flow.job_id.as_deref().unwrap_or(&request.job_name);
        if let Err(error) = self
            .registry
            .add_job_status(&status, &request.task_id, job_id)
            .await
        {
            log::error!("Cannot persist CANCELED status for {}: {error:?}", request.task_id);
        }
    }

    /// Records a failed flow in the registry. Logs and never raises, so the
    /// original error stays the one reported to the caller.
    async fn record_failure(&self, request: &SubmissionRequest, flow: &FlowState, error: &Error) {
        log::error!(
            "Submission of {} (task {}) failed: {error:?}",
            request.job_name,
            request.task_id
        );
        let status = JobStatus::with_reason(JobState::Failed, format!("{error}"));
        let job_id = flow.job_id.as_deref().unwrap_or(&request.job_name);
        if let Err(persist_error) = self
            .registry
            .add_job_status(&status, &request.task_id, job_id)
            .await
        {
            log::error!(
                "Cannot persist FAILED status for {}: {persist_error:?}",
                request.task_id
            );
        }
    }
}

fn warn_and_keep(warnings: &mut Vec<String>, message: String) {
    log::warn!("{message}");
    warnings.push(message);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{
        CredentialKind, JobSubmissionOrchestrator, SubmissionOutcome, SubmissionRequest,
    };
    use crate::cluster::dialect::{SchedulerDialect, ScriptSpec};
    use crate::cluster::server::ServerInfo;
    use crate::cluster::session::CommandOutput;
    use crate::common::retry::RetryPolicy;
    use crate::model::status::JobState;
    use crate::monitor::registry::MonitorRegistry;
    use crate::submit::target::StaticTarget;
    use crate::tests::utils::{FakeCredentialClient, FakeRegistry, FakeSessionFactory};

    fn request() -> SubmissionRequest {
        SubmissionRequest {
            task_id: "task-1".into(),
            experiment_id: "exp-1".into(),
            gateway_id: "gw".into(),
            job_name: "A2039542453".into(),
            script: ScriptSpec {
                job_name: "A2039542453".into(),
                executable: "/opt/app/run".into(),
                arguments: vec![],
                working_dir: "/scratch/testuser/exp-1".into(),
                queue: None,
                node_count: 1,
                cpu_count: 4,
                wall_time: Duration::from_secs(600),
                stdout_path: "/scratch/testuser/exp-1/stdout".into(),
                stderr_path: "/scratch/testuser/exp-1/stderr".into(),
                pre_commands: vec![],
            },
            server: ServerInfo::new("hpc.example.org", 22, "testuser", "token-1"),
            dialect: SchedulerDialect::Pbs,
            scheduler_path: String::new(),
            credential: CredentialKind::Ssh,
        }
    }

    fn orchestrator(
        registry: Arc<FakeRegistry>,
        sessions: Arc<FakeSessionFactory>,
    ) -> (JobSubmissionOrchestrator, Arc<MonitorRegistry>) {
        let (monitor, _rx) = MonitorRegistry::new(Arc::new(FakeCredentialClient::default()), "gw");
        let fast = RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(20));
        let orchestrator = JobSubmissionOrchestrator::new(
            registry,
            Arc::new(FakeCredentialClient::default()),
            sessions,
            monitor.clone(),
        )
        .with_retries(fast, fast, fast);
        (orchestrator, monitor)
    }

    fn submit_ok() -> CommandOutput {
        CommandOutput {
            exit_code: 0,
            stdout: "2039.pbs.example.org\n".into(),
            stderr: String::new(),
        }
    }

    #[tokio::test]
    async fn successful_flow_persists_and_registers_monitoring() {
        crate::tests::utils::init_logging();
        let registry = Arc::new(FakeRegistry::default());
        let sessions = Arc::new(FakeSessionFactory::default());
        sessions.push_response(submit_ok());
        let (orchestrator, monitor) = orchestrator(registry.clone(), sessions.clone());

        let outcome = orchestrator
            .run(request(), &StaticTarget::new("hpc.example.org", 22), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            SubmissionOutcome::Submitted { job_id, warnings } => {
                assert_eq!(job_id, "2039.pbs.example.org");
                assert!(warnings.is_empty());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Lifecycle statuses were persisted ahead of the actions they
        // precede: QUEUED before staging, ACTIVE before the submit command.
        let states: Vec<_> = registry.statuses().iter().map(|(s, _, _)| s.state).collect();
        assert_eq!(states, vec![JobState::Queued, JobState::Active]);
        assert_eq!(registry.jobs().first().unwrap().job_id, "");
        assert_eq!(
            registry.jobs().last().unwrap().job_id,
            "2039.pbs.example.org"
        );
        assert!(monitor.is_monitored("2039.pbs.example.org"));
        // The working directory was created and the script staged before
        // the submit command ran.
        assert!(
            sessions
                .directories()
                .contains(&"/scratch/testuser/exp-1".to_string())
        );
        let uploads = sessions.uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, "/scratch/testuser/exp-1/A2039542453.pbs");
        assert!(sessions.commands().iter().any(|c| c.contains("qsub")));
    }

    #[tokio::test]
    async fn rejected_submission_fails_and_records_failed_status() {
        let registry = Arc::new(FakeRegistry::default());
        let sessions = Arc::new(FakeSessionFactory::default());
        sessions.push_response(CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "qsub: queue disabled\n".into(),
        });
        let (orchestrator, monitor) = orchestrator(registry.clone(), sessions.clone());

        let result = orchestrator
            .run(request(), &StaticTarget::new("hpc.example.org", 22), &CancellationToken::new())
            .await;

        assert!(result.is_err());
        // The record of what was attempted exists even though the submit
        // was rejected: the pre-action statuses precede the failure.
        let states: Vec<_> = registry.statuses().iter().map(|(s, _, _)| s.state).collect();
        assert_eq!(
            states,
            vec![JobState::Queued, JobState::Active, JobState::Failed]
        );
        let (_, task_id, _) = registry.statuses().last().unwrap().clone();
        assert_eq!(task_id, "task-1");
        assert_eq!(monitor.job_count(), 0);
        assert!(sessions.all_closed());
    }

    #[tokio::test]
    async fn pre_submission_cancel_skips_remote_cancel() {
        let registry = Arc::new(FakeRegistry::default());
        let sessions = Arc::new(FakeSessionFactory::default());
        let (orchestrator, _monitor) = orchestrator(registry.clone(), sessions.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = orchestrator
            .run(request(), &StaticTarget::new("hpc.example.org", 22), &cancel)
            .await
            .unwrap();

        assert!(matches!(outcome, SubmissionOutcome::Cancelled));
        let (status, _, _) = registry.statuses().last().unwrap().clone();
        assert_eq!(status.state, JobState::Canceled);
        // Nothing was submitted, so no session was ever opened.
        assert_eq!(sessions.open_count(), 0);
    }

    #[tokio::test]
    async fn cancel_during_staging_closes_session_without_remote_cancel() {
        let registry = Arc::new(FakeRegistry::default());
        let sessions = Arc::new(FakeSessionFactory::default());
        let cancel = CancellationToken::new();
        sessions.fail_directories_and_cancel(cancel.clone());
        let (orchestrator, monitor) = orchestrator(registry.clone(), sessions.clone());

        let outcome = orchestrator
            .run(request(), &StaticTarget::new("hpc.example.org", 22), &cancel)
            .await
            .unwrap();

        assert!(matches!(outcome, SubmissionOutcome::Cancelled));
        let states: Vec<_> = registry.statuses().iter().map(|(s, _, _)| s.state).collect();
        assert_eq!(states, vec![JobState::Queued, JobState::Canceled]);
        // No job was submitted, so no cancel command went to the scheduler.
        assert!(sessions.commands().is_empty());
        assert!(sessions.all_closed());
        assert_eq!(monitor.job_count(), 0);
    }

    #[tokio::test]
    async fn persistence_failure_after_submission_is_a_warning_not_an_error() {
        // The registry serves the pre-action writes (job record, QUEUED,
        // ACTIVE) and then goes down, right as the scheduler accepts the
        // job. That must not turn a live job into a reported failure.
        let registry = Arc::new(FakeRegistry::failing_after(3));
        let sessions = Arc::new(FakeSessionFactory::default());
        sessions.push_response(submit_ok());
        let (orchestrator, monitor) = orchestrator(registry, sessions);

        let outcome = orchestrator
            .run(request(), &StaticTarget::new("hpc.example.org", 22), &CancellationToken::new())
            .await
            .unwrap();

        match outcome {
            SubmissionOutcome::Submitted { warnings, .. } => assert_eq!(warnings.len(), 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(monitor.is_monitored("2039.pbs.example.org"));
    }

    #[tokio::test]
    async fn unreachable_registry_stops_the_flow_before_any_remote_action() {
        let registry = Arc::new(FakeRegistry::failing());
        let sessions = Arc::new(FakeSessionFactory::default());
        let (orchestrator, monitor) = orchestrator(registry, sessions.clone());

        let result = orchestrator
            .run(request(), &StaticTarget::new("hpc.example.org", 22), &CancellationToken::new())
            .await;

        assert!(result.is_err());
        // Nothing was staged or submitted without a persisted record.
        assert!(sessions.directories().is_empty());
        assert!(sessions.commands().is_empty());
        assert_eq!(monitor.job_count(), 0);
    }
}
