use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, LogParams, PostParams};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tokio_stream::StreamExt;

use super::{EventStream, JobHandle, Orchestrator, WatchEvent};
use crate::error::OrchestratorError;

impl From<kube::Error> for OrchestratorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 409 => OrchestratorError::Conflict(resp.message),
            kube::Error::Api(resp) if resp.code == 404 => OrchestratorError::NotFound(resp.message),
            other => OrchestratorError::Transport(other.to_string()),
        }
    }
}

/// Orchestrator backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster service account or the local kubeconfig.
    pub async fn try_default() -> Result<Self, OrchestratorError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods_for(&self, pod: &Pod) -> Result<Api<Pod>, OrchestratorError> {
        let namespace = pod.namespace().ok_or_else(|| {
            OrchestratorError::NotFound(format!("pod {} has no namespace", pod.name_any()))
        })?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }
}

/// Convert a runtime watcher into the controller's event stream.
///
/// Initial-list objects are reported as `Added` and live updates as
/// `Modified`; the init markers carry no object and are dropped.
fn into_event_stream<K, S>(stream: S) -> EventStream<K>
where
    K: Send + 'static,
    S: tokio_stream::Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
{
    let events = stream.filter_map(|item| match item {
        Ok(watcher::Event::InitApply(obj)) => Some(Ok(WatchEvent::Added(obj))),
        Ok(watcher::Event::Apply(obj)) => Some(Ok(WatchEvent::Modified(obj))),
        Ok(watcher::Event::Delete(obj)) => Some(Ok(WatchEvent::Deleted(obj))),
        Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
        Err(e) => Some(Err(OrchestratorError::Transport(e.to_string()))),
    });
    Box::pin(events)
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn create_job(&self, manifest: &Job) -> Result<JobHandle, OrchestratorError> {
        let namespace = manifest
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let created = self
            .jobs(&namespace)
            .create(&PostParams::default(), manifest)
            .await?;
        Ok(JobHandle::new(
            created.name_any(),
            created.namespace().unwrap_or(namespace),
        ))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, OrchestratorError> {
        let api: Api<Job> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn watch_jobs(&self) -> Result<EventStream<Job>, OrchestratorError> {
        let api: Api<Job> = Api::all(self.client.clone());
        Ok(into_event_stream(watcher(api, watcher::Config::default())))
    }

    async fn list_pods(&self) -> Result<Vec<Pod>, OrchestratorError> {
        let api: Api<Pod> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn watch_pods(&self) -> Result<EventStream<Pod>, OrchestratorError> {
        let api: Api<Pod> = Api::all(self.client.clone());
        Ok(into_event_stream(watcher(api, watcher::Config::default())))
    }

    async fn delete_job(&self, handle: &JobHandle) -> Result<(), OrchestratorError> {
        // Default propagation leaves the pod behind; the cleanup sequence
        // removes it once the job is confirmed gone.
        self.jobs(&handle.namespace)
            .delete(&handle.name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn delete_pod(&self, pod: &Pod) -> Result<(), OrchestratorError> {
        self.pods_for(pod)?
            .delete(&pod.name_any(), &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn fetch_pod_logs(&self, pod: &Pod) -> Result<String, OrchestratorError> {
        let logs = self
            .pods_for(pod)?
            .logs(&pod.name_any(), &LogParams::default())
            .await?;
        Ok(logs)
    }

    async fn job_exists(&self, handle: &JobHandle) -> Result<bool, OrchestratorError> {
        let job = self.jobs(&handle.namespace).get_opt(&handle.name).await?;
        Ok(job.is_some())
    }
}
