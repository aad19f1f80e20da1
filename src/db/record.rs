use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

use crate::orchestrator::JobHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle record of one submitted job.
///
/// Fields are read freely, but every mutation goes through the methods below
/// so the record's invariants hold:
/// - once `deleted` is set the record is frozen;
/// - `status` only leaves `Pending`, never moves between terminal states;
/// - `pod` is written at most once;
/// - `restart_count` never decreases.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub deleted: bool,
    pub pod: Option<Pod>,
    pub restart_count: u32,
    pub max_restart_count: u32,
    pub log: Option<String>,
    pub handle: JobHandle,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>, max_restart_count: u32, handle: JobHandle) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
            deleted: false,
            pod: None,
            restart_count: 0,
            max_restart_count,
            log: None,
            handle,
            created_at: Utc::now(),
        }
    }

    /// Not deleted and not failed: the pod watcher still tracks restarts.
    pub fn is_active(&self) -> bool {
        !self.deleted && self.status != JobStatus::Failed
    }

    pub fn pod_name(&self) -> Option<&str> {
        self.pod.as_ref().and_then(|p| p.metadata.name.as_deref())
    }

    /// Attach the job's pod. Returns false if a pod is already attached or
    /// the record is deleted.
    pub fn attach_pod(&mut self, pod: &Pod) -> bool {
        if self.deleted || self.pod.is_some() {
            return false;
        }
        self.pod = Some(pod.clone());
        true
    }

    /// Record an observed restart count. Lower values than the current one
    /// are ignored.
    pub fn observe_restarts(&mut self, restart_count: u32) -> bool {
        if self.deleted || restart_count < self.restart_count {
            return false;
        }
        self.restart_count = restart_count;
        true
    }

    pub fn mark_succeeded(&mut self) -> bool {
        self.transition(JobStatus::Succeeded)
    }

    pub fn mark_failed(&mut self) -> bool {
        self.transition(JobStatus::Failed)
    }

    fn transition(&mut self, to: JobStatus) -> bool {
        if self.deleted || self.status != JobStatus::Pending {
            return false;
        }
        self.status = to;
        true
    }

    /// Mark failed and store the captured output in one step, so the
    /// record is never observed as failed without the log it was escalated
    /// with. Returns false, storing nothing, if the record is not pending.
    pub fn fail_with_log(&mut self, log: Option<String>) -> bool {
        if !self.mark_failed() {
            return false;
        }
        self.log = log;
        true
    }

    /// Store captured pod output. Only the failure path records logs.
    pub fn record_log(&mut self, log: String) -> bool {
        if self.deleted || self.status != JobStatus::Failed {
            return false;
        }
        self.log = Some(log);
        true
    }

    pub fn mark_deleted(&mut self) -> bool {
        if self.deleted {
            return false;
        }
        self.deleted = true;
        true
    }
}
