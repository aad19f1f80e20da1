use std::net::SocketAddr;
use std::time::Duration;

/// Settings for the watch-stream subscriptions.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Delay before resubscribing after a stream ends or fails
    pub resubscribe_delay_ms: u64,
    /// Maximum random jitter added on top of the resubscribe delay
    pub resubscribe_jitter_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            resubscribe_delay_ms: 1000,
            resubscribe_jitter_ms: 500,
        }
    }
}

/// Settings for the per-job cleanup tasks.
///
/// Each cleanup polls the job database and the orchestrator at
/// `poll_interval_ms`. An attempt that has not finished after `timeout_ms`
/// is reported and restarted after `retry_delay_ms`; only shutdown stops it.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub poll_interval_ms: u64,
    pub timeout_ms: u64,
    pub retry_delay_ms: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            timeout_ms: 10 * 60 * 1000,
            retry_delay_ms: 30_000,
        }
    }
}

impl CleanupConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Shared network filesystem mounted into jobs that request it.
#[derive(Debug, Clone)]
pub struct SharedVolumeConfig {
    /// Volume name inside the pod spec
    pub volume_name: String,
    /// PersistentVolumeClaim backing the shared filesystem
    pub claim_name: String,
    /// Mount path inside the container
    pub mount_path: String,
}

impl Default for SharedVolumeConfig {
    fn default() -> Self {
        Self {
            volume_name: "default-shared-volume".to_string(),
            claim_name: "shared-volume-pvc".to_string(),
            mount_path: "/shared".to_string(),
        }
    }
}

/// Read-only repository volumes (one claim per repository).
///
/// For repository `atlas` with the defaults, the claim is `csi-cvmfs-atlas-pvc`
/// and the mount point is `/cvmfs/atlas.cern.ch`.
#[derive(Debug, Clone)]
pub struct RepositoryMountConfig {
    pub volume_prefix: String,
    pub claim_prefix: String,
    pub claim_suffix: String,
    pub mount_root: String,
    pub mount_suffix: String,
}

impl Default for RepositoryMountConfig {
    fn default() -> Self {
        Self {
            volume_prefix: "cvmfs".to_string(),
            claim_prefix: "csi-cvmfs-".to_string(),
            claim_suffix: "-pvc".to_string(),
            mount_root: "/cvmfs".to_string(),
            mount_suffix: ".cern.ch".to_string(),
        }
    }
}

impl RepositoryMountConfig {
    pub fn claim_name(&self, repo: &str) -> String {
        format!("{}{}{}", self.claim_prefix, repo, self.claim_suffix)
    }

    pub fn mount_point(&self, repo: &str) -> String {
        format!("{}/{}{}", self.mount_root, repo, self.mount_suffix)
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace used for submissions that do not name one
    pub namespace: String,
    /// Restart ceiling used for submissions that do not set one
    pub default_max_restart_count: u32,
    /// Address of the HTTP API, disabled when `None`
    pub api_addr: Option<SocketAddr>,
    pub watch: WatchConfig,
    pub cleanup: CleanupConfig,
    pub shared_volume: SharedVolumeConfig,
    pub repositories: RepositoryMountConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            default_max_restart_count: 3,
            api_addr: None,
            watch: WatchConfig::default(),
            cleanup: CleanupConfig::default(),
            shared_volume: SharedVolumeConfig::default(),
            repositories: RepositoryMountConfig::default(),
        }
    }
}

impl ControllerConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn with_api_addr(mut self, addr: SocketAddr) -> Self {
        self.api_addr = Some(addr);
        self
    }

    /// Cleanup polling and timeout; timed out attempts retry after one poll interval.
    pub fn with_cleanup(mut self, poll_interval_ms: u64, timeout_ms: u64) -> Self {
        self.cleanup = CleanupConfig {
            poll_interval_ms,
            timeout_ms,
            retry_delay_ms: poll_interval_ms,
        };
        self
    }

    pub fn with_resubscribe_delay(mut self, delay_ms: u64, jitter_ms: u64) -> Self {
        self.watch = WatchConfig {
            resubscribe_delay_ms: delay_ms,
            resubscribe_jitter_ms: jitter_ms,
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_config_default() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.namespace, "default");
        assert_eq!(cfg.default_max_restart_count, 3);
        assert!(cfg.api_addr.is_none());
        assert_eq!(cfg.watch.resubscribe_delay_ms, 1000);
        assert_eq!(cfg.watch.resubscribe_jitter_ms, 500);
        assert_eq!(cfg.cleanup.poll_interval_ms, 5000);
        assert_eq!(cfg.cleanup.timeout_ms, 600_000);
        assert_eq!(cfg.cleanup.retry_delay_ms, 30_000);
    }

    #[test]
    fn controller_config_new() {
        let cfg = ControllerConfig::new("batch");
        assert_eq!(cfg.namespace, "batch");
        assert_eq!(cfg.default_max_restart_count, 3);
    }

    #[test]
    fn controller_config_builders() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let cfg = ControllerConfig::default()
            .with_api_addr(addr)
            .with_cleanup(10, 200)
            .with_resubscribe_delay(5, 0);
        assert_eq!(cfg.api_addr, Some(addr));
        assert_eq!(cfg.cleanup.poll_interval(), Duration::from_millis(10));
        assert_eq!(cfg.cleanup.timeout(), Duration::from_millis(200));
        assert_eq!(cfg.cleanup.retry_delay(), Duration::from_millis(10));
        assert_eq!(cfg.watch.resubscribe_delay_ms, 5);
        assert_eq!(cfg.watch.resubscribe_jitter_ms, 0);
    }

    #[test]
    fn shared_volume_default() {
        let cfg = SharedVolumeConfig::default();
        assert_eq!(cfg.volume_name, "default-shared-volume");
        assert_eq!(cfg.claim_name, "shared-volume-pvc");
        assert_eq!(cfg.mount_path, "/shared");
    }

    #[test]
    fn repository_mount_names() {
        let cfg = RepositoryMountConfig::default();
        assert_eq!(cfg.claim_name("atlas"), "csi-cvmfs-atlas-pvc");
        assert_eq!(cfg.mount_point("atlas"), "/cvmfs/atlas.cern.ch");
    }

    #[test]
    fn repository_mount_custom_suffix() {
        let cfg = RepositoryMountConfig {
            mount_root: "/repos".to_string(),
            mount_suffix: String::new(),
            ..Default::default()
        };
        assert_eq!(cfg.mount_point("sft"), "/repos/sft");
    }
}
