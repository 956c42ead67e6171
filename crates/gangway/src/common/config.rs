use std::time::Duration;

use crate::common::retry::RetryPolicy;

/// Consecutive UNKNOWN poll results tolerated for an in-flight job before it
/// is reclassified as complete (see [`crate::monitor::registry`]).
pub const UNKNOWN_ESCALATION_THRESHOLD: u32 = 3;

/// How often the monitor registry polls remote schedulers.
pub fn get_poll_interval() -> Duration {
    get_duration_from_env("GANGWAY_MONITOR_POLL_INTERVAL_MS")
        .unwrap_or_else(|| Duration::from_secs(30))
}

/// Per-call budget for a single remote command execution.
pub fn get_remote_command_timeout() -> Duration {
    get_duration_from_env("GANGWAY_REMOTE_COMMAND_TIMEOUT_MS")
        .unwrap_or_else(|| Duration::from_secs(60))
}

/// Budget for one file transfer. Larger than the command budget because
/// staging may move sizable inputs.
pub fn get_file_transfer_timeout() -> Duration {
    get_duration_from_env("GANGWAY_FILE_TRANSFER_TIMEOUT_MS")
        .unwrap_or_else(|| Duration::from_secs(10 * 60))
}

/// Budget for establishing an SSH connection.
pub fn get_connect_timeout() -> Duration {
    get_duration_from_env("GANGWAY_CONNECT_TIMEOUT_MS").unwrap_or_else(|| Duration::from_secs(30))
}

/// Wall-clock ceiling for a compute target to become reachable. This is a
/// hard ceiling for the whole provisioning wait, distinct from the per-call
/// timeout of each probe.
pub fn get_provisioning_ceiling() -> Duration {
    get_duration_from_env("GANGWAY_PROVISIONING_CEILING_MS")
        .unwrap_or_else(|| Duration::from_secs(5 * 60))
}

/// Retry policy for remote working-directory creation: every 10 s for up to
/// 5 minutes, matching the cadence SSH daemons on freshly booted instances
/// need to come up.
pub fn get_directory_retry() -> RetryPolicy {
    RetryPolicy::new(
        get_duration_from_env("GANGWAY_DIRECTORY_RETRY_INTERVAL_MS")
            .unwrap_or_else(|| Duration::from_secs(10)),
        get_duration_from_env("GANGWAY_DIRECTORY_RETRY_CEILING_MS")
            .unwrap_or_else(|| Duration::from_secs(5 * 60)),
    )
}

/// Retry policy for the scheduler submit command itself.
pub fn get_submit_retry() -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(15))
}

/// Remaining credential lifetime below which a renewal is triggered before
/// the next poll against that host.
pub fn get_credential_renewal_threshold() -> Duration {
    get_duration_from_env("GANGWAY_CREDENTIAL_RENEWAL_THRESHOLD_MS")
        .unwrap_or_else(|| Duration::from_secs(10 * 60))
}

/// Maximum concurrent sessions opened against a single remote host.
pub fn get_max_sessions_per_host() -> usize {
    std::env::var("GANGWAY_MAX_SESSIONS_PER_HOST")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(4)
}

fn get_duration_from_env(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn default_poll_interval() {
        assert_eq!(get_poll_interval(), Duration::from_secs(30));
    }

    #[test]
    fn directory_retry_defaults() {
        let policy = get_directory_retry();
        assert_eq!(policy.interval, Duration::from_secs(10));
        assert_eq!(policy.max_elapsed, Duration::from_secs(5 * 60));
    }

    #[test]
    fn env_override_is_read_in_millis() {
        // Var name is unique to this test to avoid races with parallel tests.
        unsafe { std::env::set_var("GANGWAY_CONNECT_TIMEOUT_MS", "1500") };
        assert_eq!(get_connect_timeout(), Duration::from_millis(1500));
        unsafe { std::env::remove_var("GANGWAY_CONNECT_TIMEOUT_MS") };
    }
}
