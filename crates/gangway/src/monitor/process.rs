use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::external::RegistryClient;
use crate::monitor::registry::{MonitorRegistry, StatusEvent};

/// Drives the registry's poll cycles until cancelled. Cycles that overrun
/// the interval are not stacked up behind each other.
pub async fn monitor_process(
    registry: Arc<MonitorRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    log::info!("Job monitor started, polling every {}", humantime::format_duration(interval));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => registry.poll_cycle().await,
        }
    }
    log::info!("Job monitor stopped");
}

/// Forwards status events to the registry client. Persistence failures are
/// logged and never stop the stream.
pub async fn drive_status_persistence(
    mut events: UnboundedReceiver<StatusEvent>,
    registry_client: Arc<dyn RegistryClient>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if let Err(error) = registry_client
            .add_job_status(&event.status, &event.task_id, &event.job_id)
            .await
        {
            log::error!(
                "Cannot persist status {} of job {}: {error:?}",
                event.status.state,
                event.job_id
            );
        }
    }
}
