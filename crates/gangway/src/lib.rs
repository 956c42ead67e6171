pub mod cluster;
pub mod common;
pub mod external;
pub mod model;
pub mod monitor;
pub mod parser;
pub mod submit;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::GangwayError;
pub type Result<T> = std::result::Result<T, Error>;

// Re-exports of the types most consumers touch.
pub use crate::cluster::remote::RemoteCluster;
pub use crate::cluster::server::{AuthMethod, ServerInfo};
pub use crate::model::status::{JobState, JobStatus, JobSubmissionOutput};
pub use crate::monitor::registry::MonitorRegistry;
pub use crate::submit::orchestrator::JobSubmissionOrchestrator;
