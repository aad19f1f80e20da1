use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::cleanup::CleanupScheduler;
use crate::config::ControllerConfig;
use crate::db::JobDatabase;
use crate::error::{ControllerError, OrchestratorError, Result};
use crate::manifest::{JobRequest, ManifestBuilder};
use crate::orchestrator::{JobHandle, Orchestrator};
use crate::watcher::{JobWatcher, PodWatcher};

/// Owns the job database and wires the submission path, both watchers, the
/// cleanup scheduler and the HTTP API together.
pub struct Controller {
    config: ControllerConfig,
    db: Arc<JobDatabase>,
    orchestrator: Arc<dyn Orchestrator>,
    manifests: ManifestBuilder,
}

impl Controller {
    pub fn new(config: ControllerConfig, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            manifests: ManifestBuilder::new(&config),
            config,
            db: Arc::new(JobDatabase::new()),
            orchestrator,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn db(&self) -> &Arc<JobDatabase> {
        &self.db
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    pub fn manifests(&self) -> &ManifestBuilder {
        &self.manifests
    }

    /// Register the job in the database and create it in the cluster.
    ///
    /// The record is inserted before the create call so that watch events
    /// for the new job, which may arrive before the call returns, always find
    /// it. If the create fails the record is removed again.
    ///
    /// # Errors
    ///
    /// - [`ControllerError::InvalidRequest`] if the manifest cannot be built
    /// - [`ControllerError::Conflict`] if the job id is already in use, either
    ///   in the database or in the cluster
    /// - [`ControllerError::Orchestrator`] if the create call fails otherwise
    ///
    /// A failed submission leaves no record behind.
    pub async fn submit(&self, request: JobRequest) -> Result<JobHandle> {
        let manifest = self.manifests.build(&request)?;
        let job_id = request.job_id.clone();
        let namespace = self.manifests.namespace_for(&request).to_string();
        let max_restart_count = request
            .max_restart_count
            .unwrap_or(self.config.default_max_restart_count);

        self.db
            .insert(
                &job_id,
                max_restart_count,
                JobHandle::new(&job_id, &namespace),
            )
            .map_err(|_| ControllerError::Conflict(job_id.clone()))?;

        let handle = match self.orchestrator.create_job(&manifest).await {
            Ok(handle) => handle,
            Err(e) => {
                self.db.remove(&job_id);
                return Err(match e {
                    OrchestratorError::Conflict(_) => ControllerError::Conflict(job_id),
                    other => ControllerError::Orchestrator(other),
                });
            }
        };

        if let Err(e) = self.db.update(&job_id, |r| r.handle = handle.clone()) {
            tracing::warn!(job_id = %job_id, error = %e, "Job record vanished during submission");
        }

        tracing::info!(
            job_id = %job_id,
            namespace = %handle.namespace,
            image = %request.image,
            max_restarts = max_restart_count,
            "Job submitted"
        );
        Ok(handle)
    }

    /// Run the controller until `shutdown` is cancelled.
    ///
    /// Spawns:
    /// 1. the job watcher
    /// 2. the pod watcher
    /// 3. the HTTP API, if `api_addr` is configured
    ///
    /// On shutdown, waits for the watchers, in-flight cleanups and the API to stop.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP API cannot bind its address.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let cleanup = CleanupScheduler::new(
            self.db.clone(),
            self.orchestrator.clone(),
            self.config.cleanup.clone(),
            shutdown.child_token(),
        );

        let api_listener = match self.config.api_addr {
            Some(addr) => Some(tokio::net::TcpListener::bind(addr).await?),
            None => None,
        };

        let job_watcher = JobWatcher::new(
            self.db.clone(),
            self.orchestrator.clone(),
            cleanup.clone(),
            self.config.watch.clone(),
        );
        let job_token = shutdown.clone();
        let job_task = tokio::spawn(async move { job_watcher.run(job_token).await });

        let pod_watcher = PodWatcher::new(
            self.db.clone(),
            self.orchestrator.clone(),
            self.config.watch.clone(),
        );
        let pod_token = shutdown.clone();
        let pod_task = tokio::spawn(async move { pod_watcher.run(pod_token).await });

        let api_task = api_listener.map(|listener| {
            let state = ApiState {
                controller: self.clone(),
            };
            let token = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = api::serve(listener, state, token).await {
                    tracing::error!(error = %e, "HTTP API failed");
                }
            })
        });

        tracing::info!(
            namespace = %self.config.namespace,
            api_addr = ?self.config.api_addr,
            "Controller started"
        );

        shutdown.cancelled().await;
        tracing::info!("Shutting down controller");

        for task in [Some(job_task), Some(pod_task), api_task].into_iter().flatten() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Controller task panicked");
            }
        }
        cleanup.shutdown().await;

        tracing::info!(
            in_flight_cleanups = cleanup.in_flight(),
            unended_jobs = self.db.unended_job_ids().len(),
            "Controller stopped"
        );
        Ok(())
    }
}
