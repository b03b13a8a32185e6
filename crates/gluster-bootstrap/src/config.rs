use crate::error::ReconcileError;
use cmd_lib::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/gluster-bootstrap/config.toml";
pub const DEFAULT_FILESYSTEM: &str = "xfs";
pub const DEFAULT_MOUNT_OPTIONS: &str = "defaults,_netdev";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeType {
    Distributed,
    Replicated,
    DistributedReplicated,
    Striped,
    DistributedStriped,
}

impl VolumeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolumeType::Distributed => "distributed",
            VolumeType::Replicated => "replicated",
            VolumeType::DistributedReplicated => "distributed-replicated",
            VolumeType::Striped => "striped",
            VolumeType::DistributedStriped => "distributed-striped",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired state of one volume. The first peer is the volume's master.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    pub peers: Vec<String>,
    pub volume_type: VolumeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<String>,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl VolumeConfig {
    pub fn master(&self) -> Option<&str> {
        self.peers.first().map(String::as_str)
    }

    pub fn filesystem(&self, volume: &str) -> &str {
        match self.filesystem.as_deref() {
            Some(fs) => fs,
            None => {
                warn!(
                    "No filesystem specified for volume {volume}, defaulting to {DEFAULT_FILESYSTEM}"
                );
                DEFAULT_FILESYSTEM
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_brick_mount_path")]
    pub brick_mount_path: PathBuf,
    #[serde(default = "default_brick_dir")]
    pub brick_dir: String,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default)]
    pub disks: Vec<String>,
    #[serde(default = "default_mount_root")]
    pub mount_root: PathBuf,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default)]
    pub peer_wait_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_true")]
    pub require_all_peer_bricks: bool,
    #[serde(default)]
    pub volumes: BTreeMap<String, VolumeConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            brick_mount_path: default_brick_mount_path(),
            brick_dir: default_brick_dir(),
            ssh_user: default_ssh_user(),
            disks: Vec::new(),
            mount_root: default_mount_root(),
            probe_timeout_secs: default_probe_timeout_secs(),
            peer_wait_timeout_secs: 0,
            poll_interval_secs: default_poll_interval_secs(),
            require_all_peer_bricks: true,
            volumes: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Mount point of the volume's backing filesystem on this node.
    pub fn volume_path(&self, volume: &str) -> PathBuf {
        self.brick_mount_path.join(volume)
    }

    pub fn brick_path(&self, volume: &str) -> PathBuf {
        self.volume_path(volume).join(&self.brick_dir)
    }

    /// Where every server mounts the volume for its own use.
    pub fn self_mount_point(&self, volume: &str) -> PathBuf {
        self.mount_root.join(volume)
    }
}

/// Backend holding the per-peer brick records the master aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RegistryConfig {
    Dir {
        path: PathBuf,
    },
    S3 {
        bucket: String,
        #[serde(default = "default_registry_prefix")]
        prefix: String,
    },
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig::Dir {
            path: PathBuf::from("/var/lib/gluster-bootstrap/registry"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientVolumeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_server: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_mount_options")]
    pub mount_options: String,
    #[serde(default)]
    pub volumes: BTreeMap<String, ClientVolumeConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mount_options: default_mount_options(),
            volumes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

impl BootstrapConfig {
    pub fn from_toml(s: &str) -> Result<Self, ReconcileError> {
        let config: Self = toml::from_str(s).map_err(|e| ReconcileError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn load(path: &Path) -> Result<Self, ReconcileError> {
        info!("Loading bootstrap config from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            ReconcileError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> Result<(), ReconcileError> {
        if self.server.brick_dir.is_empty() || self.server.brick_dir.contains('/') {
            return Err(ReconcileError::Config(format!(
                "brick_dir must be a single path component, got {:?}",
                self.server.brick_dir
            )));
        }
        for (name, volume) in &self.server.volumes {
            if name.is_empty() || name.contains('/') {
                return Err(ReconcileError::Config(format!(
                    "invalid volume name {name:?}"
                )));
            }
            if volume.peers.is_empty() {
                return Err(ReconcileError::Config(format!(
                    "volume {name} declares no peers"
                )));
            }
            if let Some(peer) = volume.peers.iter().find(|p| p.trim().is_empty()) {
                return Err(ReconcileError::Config(format!(
                    "volume {name} declares an empty peer entry {peer:?}"
                )));
            }
        }
        if let RegistryConfig::S3 { bucket, .. } = &self.registry
            && bucket.is_empty()
        {
            return Err(ReconcileError::Config(
                "s3 registry requires a bucket".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_brick_mount_path() -> PathBuf {
    PathBuf::from("/gluster")
}

fn default_brick_dir() -> String {
    "brick".to_string()
}

fn default_ssh_user() -> String {
    "gluster".to_string()
}

fn default_mount_root() -> PathBuf {
    PathBuf::from("/mnt/gluster")
}

fn default_probe_timeout_secs() -> u64 {
    30
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_registry_prefix() -> String {
    "gluster-bootstrap".to_string()
}

fn default_mount_options() -> String {
    DEFAULT_MOUNT_OPTIONS.to_string()
}
