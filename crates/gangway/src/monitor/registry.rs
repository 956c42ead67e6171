use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

use crate::cluster::server::ServerInfo;
use crate::common::config;
use crate::external::CredentialClient;
use crate::model::status::{JobState, JobStatus};
use crate::monitor::StatusProbe;

/// One job handed over to the monitor after successful submission.
#[derive(Debug, Clone)]
pub struct MonitorEntry {
    pub job_id: String,
    pub job_name: String,
    pub task_id: String,
    pub experiment_id: String,
    pub user_name: String,
    pub server: ServerInfo,
    pub initial_state: JobState,
}

/// A recorded status change, ordered by `seq`. Consumers persist events in
/// seq order and may drop any event whose seq is behind what they have seen.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub job_id: String,
    pub task_id: String,
    pub experiment_id: String,
    pub status: JobStatus,
    pub seq: u64,
}

struct TrackedJob {
    entry: MonitorEntry,
    last_state: JobState,
    consecutive_unknown: u32,
}

struct HostGroup {
    server: ServerInfo,
    probe: Arc<dyn StatusProbe>,
    credential_expiry: Option<SystemTime>,
    jobs: HashMap<String, TrackedJob>,
}

type HostKey = (String, String);

#[derive(Default)]
struct RegistryState {
    hosts: HashMap<HostKey, HostGroup>,
    next_seq: u64,
}

struct GroupSnapshot {
    key: HostKey,
    user: String,
    credential_token: String,
    credential_expiry: Option<SystemTime>,
    probe: Arc<dyn StatusProbe>,
    job_ids: Vec<String>,
}

/// Tracks all submitted jobs grouped by (host, user) and reconciles their
/// states with one batched probe per group per cycle. Emits [`StatusEvent`]s
/// on the channel handed out at construction.
///
/// The lock is never held across an await; each cycle snapshots the groups,
/// runs the probes, then reacquires the lock to apply results.
pub struct MonitorRegistry {
    state: Mutex<RegistryState>,
    events: UnboundedSender<StatusEvent>,
    credentials: Arc<dyn CredentialClient>,
    gateway_id: String,
    unknown_threshold: u32,
    renewal_threshold: Duration,
}

impl MonitorRegistry {
    pub fn new(
        credentials: Arc<dyn CredentialClient>,
        gateway_id: impl Into<String>,
    ) -> (Arc<Self>, UnboundedReceiver<StatusEvent>) {
        let (events, receiver) = unbounded_channel();
        let registry = Arc::new(Self {
            state: Mutex::default(),
            events,
            credentials,
            gateway_id: gateway_id.into(),
            unknown_threshold: config::UNKNOWN_ESCALATION_THRESHOLD,
            renewal_threshold: config::get_credential_renewal_threshold(),
        });
        (registry, receiver)
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a job to its (host, user) group. The freshly opened `probe`
    /// replaces the group's previous one, which is closed, so polling always
    /// runs over the newest session and credential expiry.
    pub async fn register(
        &self,
        entry: MonitorEntry,
        probe: Arc<dyn StatusProbe>,
        credential_expiry: Option<SystemTime>,
    ) {
        let replaced = {
            let mut state = self.lock();
            let key = (entry.server.host.clone(), entry.user_name.clone());
            let group = state.hosts.entry(key).or_insert_with(|| HostGroup {
                server: entry.server.clone(),
                probe: probe.clone(),
                credential_expiry,
                jobs: HashMap::new(),
            });
            let replaced = if Arc::ptr_eq(&group.probe, &probe) {
                None
            } else {
                group.credential_expiry = credential_expiry;
                Some(std::mem::replace(&mut group.probe, probe))
            };
            log::info!(
                "Monitoring job {} ({}) on {}",
                entry.job_id,
                entry.job_name,
                entry.server.addr()
            );
            group.jobs.insert(
                entry.job_id.clone(),
                TrackedJob {
                    last_state: entry.initial_state,
                    consecutive_unknown: 0,
                    entry,
                },
            );
            replaced
        };
        if let Some(probe) = replaced {
            close_probe(&probe).await;
        }
    }

    /// Removes a job from monitoring, e.g. on cancellation. Closes the
    /// group's probe when its last job leaves. Returns the entry if it was
    /// still tracked.
    pub async fn unregister(&self, job_id: &str) -> Option<MonitorEntry> {
        let mut removed = None;
        let mut orphaned = Vec::new();
        {
            let mut state = self.lock();
            state.hosts.retain(|_, group| {
                if let Some(job) = group.jobs.remove(job_id) {
                    removed = Some(job.entry);
                }
                let keep = !group.jobs.is_empty();
                if !keep {
                    orphaned.push(group.probe.clone());
                }
                keep
            });
        }
        for probe in orphaned {
            close_probe(&probe).await;
        }
        removed
    }

    pub fn is_monitored(&self, job_id: &str) -> bool {
        self.lock()
            .hosts
            .values()
            .any(|group| group.jobs.contains_key(job_id))
    }

    pub fn job_count(&self) -> usize {
        self.lock().hosts.values().map(|g| g.jobs.len()).sum()
    }

    /// One monitoring pass: for every (host, user) group, renew the
    /// credential if it is about to expire, run the batched probe, and
    /// reconcile the reported states. A failure on one host never affects
    /// the others.
    pub async fn poll_cycle(&self) {
        let snapshots: Vec<GroupSnapshot> = {
            let state = self.lock();
            state
                .hosts
                .iter()
                .map(|(key, group)| GroupSnapshot {
                    key: key.clone(),
                    user: key.1.clone(),
                    credential_token: group.server.credential_token.clone(),
                    credential_expiry: group.credential_expiry,
                    probe: group.probe.clone(),
                    job_ids: group.jobs.keys().cloned().collect(),
                })
                .collect()
        };

        for snapshot in snapshots {
            if !self.ensure_credential(&snapshot).await {
                continue;
            }
            match snapshot.probe.poll(&snapshot.user, &snapshot.job_ids).await {
                Ok(results) => {
                    if let Some(probe) = self.apply_results(&snapshot.key, &results) {
                        close_probe(&probe).await;
                    }
                }
                Err(error) => {
                    log::warn!(
                        "Status poll for {}@{} failed: {error:?}",
                        snapshot.user,
                        snapshot.key.0
                    );
                }
            }
        }
    }

    /// Renews the group's credential when it is within the renewal window.
    /// Returns false when renewal fails, which skips this group's poll for
    /// the cycle.
    async fn ensure_credential(&self, snapshot: &GroupSnapshot) -> bool {
        let Some(expiry) = snapshot.credential_expiry else {
            return true;
        };
        let remaining = expiry
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);
        if remaining >= self.renewal_threshold {
            return true;
        }
        match self
            .credentials
            .ssh_credential(&snapshot.credential_token, &self.gateway_id)
            .await
        {
            Ok(credential) => {
                let mut state = self.lock();
                if let Some(group) = state.hosts.get_mut(&snapshot.key) {
                    group.credential_expiry = credential.expires_at;
                }
                true
            }
            Err(error) => {
                log::warn!(
                    "Credential renewal for {}@{} failed, skipping poll: {error:?}",
                    snapshot.user,
                    snapshot.key.0
                );
                false
            }
        }
    }

    /// Reconciles one group's poll results into events. Returns the group's
    /// probe when the group emptied out, so the caller can close it outside
    /// the lock.
    fn apply_results(
        &self,
        key: &HostKey,
        results: &HashMap<String, JobState>,
    ) -> Option<Arc<dyn StatusProbe>> {
        let mut state = self.lock();
        let mut events = Vec::new();
        let mut empty_group = false;
        if let Some(group) = state.hosts.get_mut(key) {
            let mut finished = Vec::new();
            for (job_id, job) in &mut group.jobs {
                let reported = results.get(job_id).copied().unwrap_or(JobState::Unknown);
                if reported == JobState::Unknown {
                    job.consecutive_unknown += 1;
                    if job.consecutive_unknown > self.unknown_threshold
                        && matches!(job.last_state, JobState::Active | JobState::Queued)
                    {
                        let status = JobStatus::inferred(
                            JobState::Complete,
                            format!(
                                "No scheduler record for {} consecutive polls",
                                job.consecutive_unknown
                            ),
                        );
                        events.push((job.entry.clone(), status));
                        finished.push(job_id.clone());
                    }
                    continue;
                }
                job.consecutive_unknown = 0;
                if job.last_state.can_transition_to(reported) {
                    job.last_state = reported;
                    events.push((job.entry.clone(), JobStatus::new(reported)));
                    if reported.is_terminal() {
                        finished.push(job_id.clone());
                    }
                }
            }
            for job_id in finished {
                group.jobs.remove(&job_id);
            }
            empty_group = group.jobs.is_empty();
        }
        let orphaned = if empty_group {
            state.hosts.remove(key).map(|group| group.probe)
        } else {
            None
        };
        for (entry, status) in events {
            let seq = state.next_seq;
            state.next_seq += 1;
            log::info!(
                "Job {} ({}) is now {}{}",
                entry.job_id,
                entry.task_id,
                status.state,
                if status.inferred { " (inferred)" } else { "" }
            );
            let event = StatusEvent {
                job_id: entry.job_id,
                task_id: entry.task_id,
                experiment_id: entry.experiment_id,
                status,
                seq,
            };
            if self.events.send(event).is_err() {
                log::debug!("Status event receiver dropped");
            }
        }
        orphaned
    }
}

async fn close_probe(probe: &Arc<dyn StatusProbe>) {
    if let Err(error) = probe.close().await {
        log::debug!("Closing a monitoring session failed: {error:?}");
    }
}
