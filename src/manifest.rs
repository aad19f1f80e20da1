//! Translation of a job request into a `batch/v1` Job manifest.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::config::{ControllerConfig, RepositoryMountConfig, SharedVolumeConfig};
use crate::error::{ControllerError, Result};

/// A batch job to submit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Filled in by the HTTP API when left empty
    #[serde(default)]
    pub job_id: String,
    pub image: String,
    /// Command line, split shell-style into the container command
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Mount the shared network filesystem
    #[serde(default)]
    pub shared_file_system: bool,
    /// Read-only repositories to mount
    #[serde(default)]
    pub repositories: Vec<String>,
    /// Restart ceiling; the controller default applies when unset
    #[serde(default)]
    pub max_restart_count: Option<u32>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl JobRequest {
    pub fn new(job_id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn with_shared_file_system(mut self) -> Self {
        self.shared_file_system = true;
        self
    }

    pub fn with_repository(mut self, repo: impl Into<String>) -> Self {
        self.repositories.push(repo.into());
        self
    }

    pub fn with_max_restart_count(mut self, max_restart_count: u32) -> Self {
        self.max_restart_count = Some(max_restart_count);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_id.trim().is_empty() {
            return Err(ControllerError::InvalidRequest("job_id is empty".to_string()));
        }
        if self.image.trim().is_empty() {
            return Err(ControllerError::InvalidRequest("image is empty".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    namespace: String,
    shared_volume: SharedVolumeConfig,
    repositories: RepositoryMountConfig,
}

impl ManifestBuilder {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            shared_volume: config.shared_volume.clone(),
            repositories: config.repositories.clone(),
        }
    }

    pub fn namespace_for<'a>(&'a self, request: &'a JobRequest) -> &'a str {
        request.namespace.as_deref().unwrap_or(&self.namespace)
    }

    pub fn build(&self, request: &JobRequest) -> Result<Job> {
        request.validate()?;

        let command = match request.command.as_deref() {
            Some(cmd) if !cmd.trim().is_empty() => Some(shlex::split(cmd).ok_or_else(|| {
                ControllerError::InvalidRequest(format!("cannot parse command: {cmd}"))
            })?),
            _ => None,
        };

        let env: Vec<EnvVar> = request
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            })
            .collect();

        let mut volumes = Vec::new();
        let mut mounts = Vec::new();

        if request.shared_file_system {
            volumes.push(Volume {
                name: self.shared_volume.volume_name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: self.shared_volume.claim_name.clone(),
                    read_only: Some(false),
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name: self.shared_volume.volume_name.clone(),
                mount_path: self.shared_volume.mount_path.clone(),
                ..Default::default()
            });
        }

        for (index, repo) in request.repositories.iter().enumerate() {
            let name = format!(
                "{}-{}-{}",
                self.repositories.volume_prefix,
                volume_safe(repo),
                index
            );
            volumes.push(Volume {
                name: name.clone(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: self.repositories.claim_name(repo),
                    read_only: Some(true),
                }),
                ..Default::default()
            });
            mounts.push(VolumeMount {
                name,
                mount_path: self.repositories.mount_point(repo),
                read_only: Some(true),
                ..Default::default()
            });
        }

        let container = Container {
            name: request.job_id.clone(),
            image: Some(request.image.clone()),
            command,
            env: Some(env),
            volume_mounts: Some(mounts),
            ..Default::default()
        };

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(request.job_id.clone()),
                namespace: Some(self.namespace_for(request).to_string()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        name: Some(request.job_id.clone()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        volumes: Some(volumes),
                        restart_policy: Some("OnFailure".to_string()),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

/// Volume names must be DNS labels.
fn volume_safe(repo: &str) -> String {
    repo.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect()
}
