//! Long-running consumers of the orchestrator's watch streams.
//!
//! - [`JobWatcher`]: moves records to succeeded/failed and hands deleted jobs
//!   to the cleanup scheduler
//! - [`PodWatcher`]: correlates pods to jobs, tracks restarts and applies
//!   the failure policy
//!
//! Both run inside [`watch_loop`], which resubscribes whenever a stream
//! fails or ends. Each new subscription starts with a resync: the current
//! object list is handed to [`ResourceWatcher::resync`] and then replayed as
//! `MODIFIED` events. Objects that disappeared while the stream was down
//! produce no event of their own; watchers that care detect them in
//! `resync` by comparing the list against the database.

pub mod job;
pub mod pod;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::error::OrchestratorError;
use crate::orchestrator::{EventStream, JobHandle, Orchestrator, WatchEvent};

pub use job::JobWatcher;
pub use pod::PodWatcher;

#[async_trait]
pub trait ResourceWatcher: Send + Sync {
    type Resource: Send + Sync + 'static;

    /// Resource kind, used in log fields
    fn kind(&self) -> &'static str;

    async fn list(&self) -> Result<Vec<Self::Resource>, OrchestratorError>;

    async fn subscribe(&self) -> Result<EventStream<Self::Resource>, OrchestratorError>;

    async fn handle_event(&self, event: WatchEvent<Self::Resource>);

    /// Inspect the full object list of a fresh subscription before it is
    /// replayed.
    async fn resync(&self, _objects: &[Self::Resource]) {}
}

/// Resubscribe delay with random jitter.
pub fn resubscribe_delay(config: &WatchConfig) -> Duration {
    let jitter_ms = if config.resubscribe_jitter_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=config.resubscribe_jitter_ms)
    };
    Duration::from_millis(config.resubscribe_delay_ms + jitter_ms)
}

/// Keep `watcher` subscribed until `shutdown` is cancelled.
pub async fn watch_loop<W: ResourceWatcher>(
    watcher: &W,
    config: &WatchConfig,
    shutdown: &CancellationToken,
) {
    let kind = watcher.kind();
    while !shutdown.is_cancelled() {
        tracing::debug!(kind, "Starting a new stream request");
        if let Err(e) = watch_once(watcher, shutdown).await {
            tracing::warn!(kind, error = %e, "Watch stream failed");
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(resubscribe_delay(config)) => {}
        }
    }
    tracing::info!(kind, "Watcher stopped");
}

async fn watch_once<W: ResourceWatcher>(
    watcher: &W,
    shutdown: &CancellationToken,
) -> Result<(), OrchestratorError> {
    // Subscribe before listing so changes made during the resync are still delivered.
    let mut stream = watcher.subscribe().await?;

    let objects = watcher.list().await?;
    watcher.resync(&objects).await;
    for object in objects {
        if shutdown.is_cancelled() {
            return Ok(());
        }
        watcher.handle_event(WatchEvent::Modified(object)).await;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            next = stream.next() => match next {
                Some(Ok(event)) => watcher.handle_event(event).await,
                Some(Err(e)) => return Err(e),
                None => {
                    tracing::debug!(kind = watcher.kind(), "Watch stream closed");
                    return Ok(());
                }
            }
        }
    }
}

/// Ask the orchestrator to delete a job. A job that is already gone counts
/// as deleted.
pub(crate) async fn request_job_deletion(orchestrator: &dyn Orchestrator, handle: &JobHandle) {
    match orchestrator.delete_job(handle).await {
        Ok(()) => tracing::info!(job = %handle, "Requested job deletion"),
        Err(e) if e.is_not_found() => tracing::debug!(job = %handle, "Job already deleted"),
        Err(e) => tracing::warn!(job = %handle, error = %e, "Failed to delete job"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resubscribe_delay_without_jitter() {
        let cfg = WatchConfig {
            resubscribe_delay_ms: 250,
            resubscribe_jitter_ms: 0,
        };
        assert_eq!(resubscribe_delay(&cfg), Duration::from_millis(250));
    }

    #[test]
    fn resubscribe_delay_stays_in_range() {
        let cfg = WatchConfig {
            resubscribe_delay_ms: 100,
            resubscribe_jitter_ms: 50,
        };
        for _ in 0..100 {
            let delay = resubscribe_delay(&cfg);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }
}
