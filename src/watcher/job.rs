use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use tokio_util::sync::CancellationToken;

use crate::cleanup::CleanupScheduler;
use crate::config::WatchConfig;
use crate::db::{JobDatabase, JobStatus};
use crate::error::OrchestratorError;
use crate::orchestrator::{EventStream, Orchestrator, WatchEvent};
use crate::watcher::{request_job_deletion, watch_loop, ResourceWatcher};

/// Watches job resources across all namespaces.
pub struct JobWatcher {
    db: Arc<JobDatabase>,
    orchestrator: Arc<dyn Orchestrator>,
    cleanup: CleanupScheduler,
    config: WatchConfig,
}

impl JobWatcher {
    pub fn new(
        db: Arc<JobDatabase>,
        orchestrator: Arc<dyn Orchestrator>,
        cleanup: CleanupScheduler,
        config: WatchConfig,
    ) -> Self {
        Self {
            db,
            orchestrator,
            cleanup,
            config,
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        watch_loop(self, &self.config, &shutdown).await;
    }

    /// Apply one job event to the database.
    ///
    /// - `DELETED`: schedule the ordered pod cleanup
    /// - reports succeeded: mark succeeded and delete the job
    /// - reports failed: mark failed and delete the job
    ///
    /// Events for unknown or already cleaned up jobs are ignored.
    pub async fn handle_event(&self, event: WatchEvent<Job>) {
        let event_type = event.event_type();
        let is_deletion = matches!(event, WatchEvent::Deleted(_));
        let job = event.into_object();

        let Some(job_id) = job.metadata.name.as_deref() else {
            tracing::debug!(event = event_type, "Skipping job event without a name");
            return;
        };

        let handle = match self.db.get(job_id) {
            Ok(record) if !record.deleted => record.handle,
            _ => return,
        };
        tracing::info!(job_id, event = event_type, "Job event received");

        if is_deletion {
            self.cleanup.schedule(job_id);
            return;
        }

        let status = job.status.as_ref();
        let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0) > 0;
        let failed = status.and_then(|s| s.failed).unwrap_or(0) > 0;

        let target = if succeeded {
            JobStatus::Succeeded
        } else if failed {
            // The restart policy detects failures before the job controller
            // ever reports one, so this branch is not expected to fire.
            JobStatus::Failed
        } else {
            return;
        };

        let reached = self
            .db
            .update(job_id, |record| {
                if record.deleted {
                    return false;
                }
                match target {
                    JobStatus::Succeeded => record.mark_succeeded(),
                    _ => record.mark_failed(),
                };
                record.status == target
            })
            .unwrap_or(false);

        if !reached {
            return;
        }
        if job.metadata.deletion_timestamp.is_some() {
            tracing::debug!(job_id, "Job deletion already in progress");
            return;
        }

        match target {
            JobStatus::Succeeded => tracing::info!(job_id, "Job successfully ended, cleaning up"),
            _ => tracing::info!(job_id, "Job failed, cleaning up"),
        }
        request_job_deletion(self.orchestrator.as_ref(), &handle).await;
    }

    /// Schedule cleanup for every unended record whose job is absent from
    /// `jobs`. A job deleted while the stream was down never produces a
    /// `DELETED` event, so this is the only path that reaches its pod.
    ///
    /// A record whose job is still being created is also absent; its cleanup
    /// simply waits for the job to appear and go away again.
    pub async fn resync(&self, jobs: &[Job]) {
        let listed: HashSet<(&str, &str)> = jobs
            .iter()
            .filter_map(|job| {
                Some((
                    job.metadata.namespace.as_deref()?,
                    job.metadata.name.as_deref()?,
                ))
            })
            .collect();

        for job_id in self.db.unended_job_ids() {
            let Ok(record) = self.db.get(&job_id) else {
                continue;
            };
            let key = (record.handle.namespace.as_str(), record.handle.name.as_str());
            if record.deleted || listed.contains(&key) {
                continue;
            }
            if self.cleanup.schedule(&job_id) {
                tracing::info!(job_id = %job_id, "Job missing from cluster, cleaning up");
            }
        }
    }
}

#[async_trait]
impl ResourceWatcher for JobWatcher {
    type Resource = Job;

    fn kind(&self) -> &'static str {
        "job"
    }

    async fn list(&self) -> Result<Vec<Job>, OrchestratorError> {
        self.orchestrator.list_jobs().await
    }

    async fn subscribe(&self) -> Result<EventStream<Job>, OrchestratorError> {
        self.orchestrator.watch_jobs().await
    }

    async fn handle_event(&self, event: WatchEvent<Job>) {
        JobWatcher::handle_event(self, event).await
    }

    async fn resync(&self, jobs: &[Job]) {
        JobWatcher::resync(self, jobs).await
    }
}
