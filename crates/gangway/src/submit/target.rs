use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::common::config;
use crate::common::retry::RetryPolicy;
use crate::{Error, Result};

/// Reachable SSH endpoint of a compute target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub host: String,
    pub port: u16,
}

/// Where a job will run. Static clusters resolve immediately; on-demand
/// targets (cloud instances) may need to be provisioned first.
#[async_trait]
pub trait ComputeTarget: Send + Sync {
    async fn resolve(&self, cancel: &CancellationToken) -> Result<TargetAddress>;
}

/// An always-available cluster endpoint.
pub struct StaticTarget {
    address: TargetAddress,
}

impl StaticTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            address: TargetAddress {
                host: host.into(),
                port,
            },
        }
    }
}

#[async_trait]
impl ComputeTarget for StaticTarget {
    async fn resolve(&self, _cancel: &CancellationToken) -> Result<TargetAddress> {
        Ok(self.address.clone())
    }
}

/// One readiness check against a provisioning backend. `Ok(None)` means the
/// target exists but is not reachable yet.
#[async_trait]
pub trait TargetProbe: Send + Sync {
    async fn probe(&self) -> Result<Option<TargetAddress>>;
}

/// A target that becomes reachable some time after being requested, e.g. a
/// freshly launched instance. Resolution polls the probe under a hard
/// ceiling instead of sleeping in a loop.
pub struct PolledTarget {
    name: String,
    policy: RetryPolicy,
    probe: Box<dyn TargetProbe>,
}

impl PolledTarget {
    pub fn new(name: impl Into<String>, probe: Box<dyn TargetProbe>) -> Self {
        Self {
            name: name.into(),
            policy: RetryPolicy::new(
                config::get_poll_interval(),
                config::get_provisioning_ceiling(),
            ),
            probe,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl ComputeTarget for PolledTarget {
    async fn resolve(&self, cancel: &CancellationToken) -> Result<TargetAddress> {
        let address = self
            .policy
            .poll_until(cancel, || self.probe.probe())
            .await
            .map_err(|error| match error {
                Error::Timeout(limit) => Error::Provisioning(format!(
                    "Target {} did not become reachable within {}",
                    self.name,
                    humantime::format_duration(limit)
                )),
                other => other,
            })?;
        log::info!("Target {} is reachable at {}:{}", self.name, address.host, address.port);
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use super::{ComputeTarget, PolledTarget, StaticTarget, TargetAddress, TargetProbe};
    use crate::Error;
    use crate::common::retry::RetryPolicy;

    struct ScriptedProbe {
        responses: Mutex<Vec<Option<TargetAddress>>>,
    }

    #[async_trait]
    impl TargetProbe for ScriptedProbe {
        async fn probe(&self) -> crate::Result<Option<TargetAddress>> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(None)
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    #[tokio::test]
    async fn static_target_resolves_immediately() {
        let target = StaticTarget::new("hpc.example.org", 22);
        let address = target.resolve(&CancellationToken::new()).await.unwrap();
        assert_eq!(address.host, "hpc.example.org");
    }

    #[tokio::test(start_paused = true)]
    async fn polled_target_waits_for_readiness() {
        let probe = ScriptedProbe {
            responses: Mutex::new(vec![
                None,
                None,
                Some(TargetAddress {
                    host: "10.0.0.5".into(),
                    port: 22,
                }),
            ]),
        };
        let target = PolledTarget::new("vm-1", Box::new(probe))
            .with_policy(RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(300)));
        let address = target.resolve(&CancellationToken::new()).await.unwrap();
        assert_eq!(address.host, "10.0.0.5");
    }

    #[tokio::test(start_paused = true)]
    async fn polled_target_reports_provisioning_failure_at_ceiling() {
        let probe = ScriptedProbe {
            responses: Mutex::new(vec![]),
        };
        let target = PolledTarget::new("vm-2", Box::new(probe))
            .with_policy(RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(20)));
        let result = target.resolve(&CancellationToken::new()).await;
        match result {
            Err(Error::Provisioning(message)) => assert!(message.contains("vm-2")),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
