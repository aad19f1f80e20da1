//! Ordered, per-job cleanup of cluster resources.
//!
//! After a job resource is reported deleted, its pod is removed in this
//! order:
//!
//! 1. wait until the pod watcher has attached the job's pod to the record
//! 2. wait until the orchestrator no longer knows the job
//! 3. delete the pod
//! 4. mark the record deleted
//!
//! Every cleanup runs in its own task so a job that is slow to disappear
//! never holds up the event loops. An attempt that exceeds the configured
//! timeout is logged and started over after the retry delay, so a pod is
//! never left behind; a task only gives up when the controller shuts down.

use std::sync::Arc;

use dashmap::DashSet;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::config::CleanupConfig;
use crate::db::JobDatabase;
use crate::orchestrator::{JobHandle, Orchestrator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Pod deleted and record marked deleted
    Completed,
    /// Another path already marked the record deleted
    AlreadyDeleted,
    /// The job id is not in the database
    Untracked,
    TimedOut,
    Cancelled,
}

#[derive(Clone)]
pub struct CleanupScheduler {
    db: Arc<JobDatabase>,
    orchestrator: Arc<dyn Orchestrator>,
    config: CleanupConfig,
    in_flight: Arc<DashSet<String>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl CleanupScheduler {
    pub fn new(
        db: Arc<JobDatabase>,
        orchestrator: Arc<dyn Orchestrator>,
        config: CleanupConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            db,
            orchestrator,
            config,
            in_flight: Arc::new(DashSet::new()),
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Start cleaning up `job_id` in the background.
    ///
    /// Returns false when a cleanup for the job is already running or the
    /// scheduler has been shut down.
    pub fn schedule(&self, job_id: &str) -> bool {
        if self.shutdown.is_cancelled() || self.tracker.is_closed() {
            return false;
        }
        if !self.in_flight.insert(job_id.to_string()) {
            tracing::debug!(job_id, "Cleanup already in progress");
            return false;
        }

        let this = self.clone();
        let job_id = job_id.to_string();
        let span = tracing::info_span!("cleanup", job_id = %job_id);
        self.tracker.spawn(
            async move {
                this.run_until_done(&job_id).await;
                this.in_flight.remove(&job_id);
            }
            .instrument(span),
        );
        true
    }

    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.in_flight.contains(job_id)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stop accepting new cleanups and wait for running ones to exit.
    ///
    /// Running cleanups only exit early if the shutdown token was cancelled.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Repeat timed out attempts until one finishes or shutdown is requested.
    async fn run_until_done(&self, job_id: &str) {
        loop {
            match self.run(job_id).await {
                CleanupOutcome::Completed => {
                    tracing::info!("Job cleanup finished");
                    return;
                }
                CleanupOutcome::TimedOut => {
                    tracing::error!(
                        timeout_ms = self.config.timeout_ms,
                        retry_delay_ms = self.config.retry_delay_ms,
                        "Job cleanup timed out, retrying"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            tracing::warn!("Shutdown during cleanup retry, job pod may remain");
                            return;
                        }
                        _ = tokio::time::sleep(self.config.retry_delay()) => {}
                    }
                }
                other => {
                    tracing::debug!(outcome = ?other, "Job cleanup stopped");
                    return;
                }
            }
        }
    }

    async fn run(&self, job_id: &str) -> CleanupOutcome {
        tokio::select! {
            _ = self.shutdown.cancelled() => CleanupOutcome::Cancelled,
            result = tokio::time::timeout(self.config.timeout(), self.clean(job_id)) => {
                result.unwrap_or(CleanupOutcome::TimedOut)
            }
        }
    }

    async fn clean(&self, job_id: &str) -> CleanupOutcome {
        let interval = self.config.poll_interval();

        let (pod, handle) = match self.wait_for_pod(job_id).await {
            Ok(found) => found,
            Err(outcome) => return outcome,
        };
        let pod_name = pod.metadata.name.clone().unwrap_or_default();

        loop {
            match self.orchestrator.job_exists(&handle).await {
                Ok(false) => break,
                Ok(true) => tracing::warn!(job = %handle, "Waiting for job to be cleaned"),
                Err(e) => tracing::warn!(job = %handle, error = %e, "Failed to check job existence"),
            }
            tokio::time::sleep(interval).await;
        }

        tracing::info!(pod = %pod_name, "Deleting job pod");
        loop {
            match self.orchestrator.delete_pod(&pod).await {
                Ok(()) => break,
                Err(e) if e.is_not_found() => {
                    tracing::debug!(pod = %pod_name, "Pod already gone");
                    break;
                }
                Err(e) => tracing::warn!(pod = %pod_name, error = %e, "Failed to delete pod"),
            }
            tokio::time::sleep(interval).await;
        }

        match self.db.update(job_id, |r| r.mark_deleted()) {
            Ok(true) => CleanupOutcome::Completed,
            Ok(false) => CleanupOutcome::AlreadyDeleted,
            Err(_) => CleanupOutcome::Untracked,
        }
    }

    /// Poll the database until the pod watcher has attached the job's pod.
    async fn wait_for_pod(&self, job_id: &str) -> Result<(Pod, JobHandle), CleanupOutcome> {
        loop {
            match self.db.get(job_id) {
                Err(_) => return Err(CleanupOutcome::Untracked),
                Ok(record) if record.deleted => return Err(CleanupOutcome::AlreadyDeleted),
                Ok(record) => {
                    if let Some(pod) = record.pod {
                        return Ok((pod, record.handle));
                    }
                    tracing::warn!("Job pod still not known");
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}
