use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::db::{JobDatabase, JobRecord};
use crate::error::OrchestratorError;
use crate::orchestrator::{EventStream, JobHandle, Orchestrator, WatchEvent};
use crate::policy::should_escalate;
use crate::watcher::{request_job_deletion, watch_loop, ResourceWatcher};

/// Derive a job id from a pod name by dropping the generated suffix
/// (`build-123-abcde` belongs to `build-123`).
///
/// This relies on the job controller's naming scheme and breaks if it ever
/// changes; [`owning_job_id`] prefers the owner reference when present.
pub fn job_id_from_pod_name(pod_name: &str) -> Option<&str> {
    pod_name
        .rsplit_once('-')
        .map(|(prefix, _)| prefix)
        .filter(|prefix| !prefix.is_empty())
}

/// Job id owning `pod`: the name of its `Job` owner reference, falling back
/// to the pod naming convention.
///
/// The two can disagree for pods not created by the Kubernetes job
/// controller: a pod named `job-0-abcde` owned by Job `job` belongs to `job`
/// here, while name parsing alone would pick `job-0`.
pub fn owning_job_id(pod: &Pod) -> Option<String> {
    let owner = pod
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.iter().find(|r| r.kind == "Job"));
    if let Some(owner) = owner {
        return Some(owner.name.clone());
    }
    pod.metadata
        .name
        .as_deref()
        .and_then(job_id_from_pod_name)
        .map(str::to_string)
}

/// Restart and termination data read from a pod's first container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodObservation {
    pub restart_count: u32,
    /// Exit code of the last termination, if the container is terminated
    pub exit_code: Option<i32>,
}

impl PodObservation {
    /// Returns `None` while the container status is not populated yet.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let container = pod.status.as_ref()?.container_statuses.as_ref()?.first()?;
        let state = container.state.as_ref()?;
        Some(Self {
            restart_count: u32::try_from(container.restart_count).ok()?,
            exit_code: state.terminated.as_ref().map(|t| t.exit_code),
        })
    }
}

/// What a pod event did to its job's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodDecision {
    /// The job is deleted or already failed
    Inactive,
    /// Container status not available yet
    Skipped,
    Tracked,
    /// The failure policy fired; the caller captures the log and then marks
    /// the record failed
    Escalate(JobHandle),
}

/// Apply a pod event to its job's record. Runs under the record lock.
///
/// An escalation leaves the record pending. Pod events are handled one at a
/// time, so the watcher marks it failed before the next event is reconciled.
pub fn reconcile(
    record: &mut JobRecord,
    pod: &Pod,
    observation: Option<PodObservation>,
) -> PodDecision {
    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();

    if record.attach_pod(pod) {
        tracing::info!(job_id = %record.job_id, pod = pod_name, "Storing pod as job pod");
    }
    if !record.is_active() {
        return PodDecision::Inactive;
    }

    let Some(observation) = observation else {
        tracing::debug!(
            job_id = %record.job_id,
            pod = pod_name,
            "Skipping pod event, container status not available"
        );
        return PodDecision::Skipped;
    };

    if record.observe_restarts(observation.restart_count) {
        tracing::info!(
            job_id = %record.job_id,
            pod = pod_name,
            restarts = observation.restart_count,
            exit_code = ?observation.exit_code,
            "Updating pod restarts"
        );
    }

    if should_escalate(
        record.restart_count,
        record.max_restart_count,
        observation.exit_code,
    ) {
        tracing::info!(
            job_id = %record.job_id,
            restarts = record.restart_count,
            max_restarts = record.max_restart_count,
            "Job reached max restarts"
        );
        return PodDecision::Escalate(record.handle.clone());
    }

    PodDecision::Tracked
}

/// Watches pods across all namespaces.
pub struct PodWatcher {
    db: Arc<JobDatabase>,
    orchestrator: Arc<dyn Orchestrator>,
    config: WatchConfig,
}

impl PodWatcher {
    pub fn new(db: Arc<JobDatabase>, orchestrator: Arc<dyn Orchestrator>, config: WatchConfig) -> Self {
        Self {
            db,
            orchestrator,
            config,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        watch_loop(self, &self.config, &shutdown).await;
    }

    pub async fn handle_event(&self, event: WatchEvent<Pod>) -> Option<PodDecision> {
        let event_type = event.event_type();
        let pod = event.into_object();

        let Some(job_id) = owning_job_id(&pod) else {
            tracing::trace!(event = event_type, "Pod does not belong to a job");
            return None;
        };

        let observation = PodObservation::from_pod(&pod);
        let decision = self
            .db
            .update(&job_id, |record| reconcile(record, &pod, observation))
            .ok()?;

        if let PodDecision::Escalate(handle) = &decision {
            self.escalate(&job_id, &pod, handle).await;
        }
        Some(decision)
    }

    /// Capture the pod's output, mark the record failed together with it,
    /// then delete the job.
    async fn escalate(&self, job_id: &str, pod: &Pod, handle: &JobHandle) {
        let pod_name = pod.metadata.name.as_deref().unwrap_or_default();

        tracing::info!(job_id, pod = pod_name, "Getting pod logs");
        let log = match self.orchestrator.fetch_pod_logs(pod).await {
            Ok(log) => Some(log),
            Err(e) => {
                tracing::warn!(job_id, pod = pod_name, error = %e, "Failed to fetch pod logs");
                None
            }
        };

        match self.db.update(job_id, |r| r.fail_with_log(log)) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(job_id, "Job ended before the failure was recorded");
                return;
            }
            Err(e) => {
                tracing::debug!(job_id, error = %e, "Job record gone before the failure was recorded");
                return;
            }
        }

        tracing::info!(job_id, "Cleaning up failed job");
        request_job_deletion(self.orchestrator.as_ref(), handle).await;
    }
}

#[async_trait]
impl ResourceWatcher for PodWatcher {
    type Resource = Pod;

    fn kind(&self) -> &'static str {
        "pod"
    }

    async fn list(&self) -> Result<Vec<Pod>, OrchestratorError> {
        self.orchestrator.list_pods().await
    }

    async fn subscribe(&self) -> Result<EventStream<Pod>, OrchestratorError> {
        self.orchestrator.watch_pods().await
    }

    async fn handle_event(&self, event: WatchEvent<Pod>) {
        PodWatcher::handle_event(self, event).await;
    }
}
