//! Boundary to the cluster orchestrator.
//!
//! The reconciliation engine only talks to the cluster through the
//! [`Orchestrator`] trait. [`kubernetes::KubeOrchestrator`] is the production
//! implementation; tests plug in an in-memory fake.

pub mod kubernetes;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::error::OrchestratorError;

pub use self::kubernetes::KubeOrchestrator;

/// Reference to an orchestrator-side job object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    pub name: String,
    pub namespace: String,
}

impl JobHandle {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A single change delivered by a watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl<K> WatchEvent<K> {
    pub fn object(&self) -> &K {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }

    pub fn into_object(self) -> K {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "ADDED",
            WatchEvent::Modified(_) => "MODIFIED",
            WatchEvent::Deleted(_) => "DELETED",
        }
    }
}

pub type EventStream<K> =
    Pin<Box<dyn Stream<Item = Result<WatchEvent<K>, OrchestratorError>> + Send>>;

/// Capabilities the controller needs from the cluster.
///
/// Listing and watching always cover every namespace.
#[async_trait]
pub trait Orchestrator: Send + Sync + 'static {
    async fn create_job(&self, manifest: &Job) -> Result<JobHandle, OrchestratorError>;

    async fn list_jobs(&self) -> Result<Vec<Job>, OrchestratorError>;

    async fn watch_jobs(&self) -> Result<EventStream<Job>, OrchestratorError>;

    async fn list_pods(&self) -> Result<Vec<Pod>, OrchestratorError>;

    async fn watch_pods(&self) -> Result<EventStream<Pod>, OrchestratorError>;

    async fn delete_job(&self, handle: &JobHandle) -> Result<(), OrchestratorError>;

    async fn delete_pod(&self, pod: &Pod) -> Result<(), OrchestratorError>;

    async fn fetch_pod_logs(&self, pod: &Pod) -> Result<String, OrchestratorError>;

    async fn job_exists(&self, handle: &JobHandle) -> Result<bool, OrchestratorError>;
}
