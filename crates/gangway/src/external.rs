//! Traits for the external collaborators this crate talks to but does not
//! implement: the job registry and the credential store. Deployments plug in
//! their own clients; tests use in-memory fakes.

use async_trait::async_trait;

use crate::Result;
use crate::cluster::server::{PasswordCredential, SshCredential};
use crate::model::status::{JobModel, JobStatus};

/// Persistent job catalog. Writes must land before the action they describe
/// is taken, so a crash never leaves an untracked remote job.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn add_job(&self, job: &JobModel) -> Result<()>;

    async fn add_job_status(&self, status: &JobStatus, task_id: &str, job_id: &str) -> Result<()>;

    async fn get_job(&self, task_id: &str) -> Result<Option<JobModel>>;
}

/// Credential store resolving opaque tokens into secrets. Results are
/// short-lived capabilities and are never persisted by this crate.
#[async_trait]
pub trait CredentialClient: Send + Sync {
    async fn ssh_credential(&self, token: &str, gateway_id: &str) -> Result<SshCredential>;

    async fn password_credential(&self, token: &str, gateway_id: &str)
    -> Result<PasswordCredential>;
}
