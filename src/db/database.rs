use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::db::record::{JobRecord, JobStatus};
use crate::error::{ControllerError, Result};
use crate::orchestrator::JobHandle;

/// In-memory table of job lifecycle records, shared by the submission path
/// and both watchers.
///
/// Each entry is guarded by its shard lock for the duration of an
/// [`update`](JobDatabase::update) closure, so a read-decide-write on one
/// record is atomic while other records stay available.
#[derive(Debug, Default)]
pub struct JobDatabase {
    jobs: DashMap<String, JobRecord>,
}

impl JobDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job id. Fails if the id is already taken.
    pub fn insert(
        &self,
        job_id: impl Into<String>,
        max_restart_count: u32,
        handle: JobHandle,
    ) -> Result<()> {
        let job_id = job_id.into();
        match self.jobs.entry(job_id) {
            Entry::Occupied(entry) => Err(ControllerError::DuplicateKey(entry.key().clone())),
            Entry::Vacant(entry) => {
                let record = JobRecord::new(entry.key().clone(), max_restart_count, handle);
                entry.insert(record);
                Ok(())
            }
        }
    }

    /// Snapshot of a record.
    pub fn get(&self, job_id: &str) -> Result<JobRecord> {
        self.jobs
            .get(job_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| ControllerError::JobNotFound(job_id.to_string()))
    }

    /// Apply `mutation` to a record while holding its entry lock.
    ///
    /// The closure must not block; it runs with the shard locked.
    pub fn update<R>(&self, job_id: &str, mutation: impl FnOnce(&mut JobRecord) -> R) -> Result<R> {
        let mut record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ControllerError::JobNotFound(job_id.to_string()))?;
        Ok(mutation(record.value_mut()))
    }

    /// Drop a record. Only used to roll back a reservation whose job was
    /// never created.
    pub fn remove(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.remove(job_id).map(|(_, record)| record)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    /// Ids of the records that satisfy `predicate`.
    pub fn active_job_ids(&self, predicate: impl Fn(&JobRecord) -> bool) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Jobs whose cleanup has not completed yet.
    pub fn unended_job_ids(&self) -> Vec<String> {
        self.active_job_ids(|r| !r.deleted)
    }

    /// Jobs the pod watcher still tracks restarts for.
    pub fn trackable_job_ids(&self) -> Vec<String> {
        self.active_job_ids(|r| !r.deleted && r.status != JobStatus::Failed)
    }

    /// Snapshot of all records sorted chronologically by submission time
    pub fn all(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.jobs.iter().map(|e| e.value().clone()).collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        records
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
