pub mod process;
pub mod registry;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::Result;
use crate::model::status::JobState;

/// Source of job states for one host, polled in batches. Implemented by
/// [`crate::cluster::remote::RemoteCluster`]; tests script their own.
///
/// `close` releases whatever connection backs the probe. The registry calls
/// it when a probe is replaced or its last job leaves monitoring.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn poll(&self, user: &str, job_ids: &[String]) -> Result<HashMap<String, JobState>>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
