use crate::config::RegistryConfig;
use crate::error::ReconcileError;
use cmd_lib::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bricks a peer contributes to one volume, published by that peer's own run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickRecord {
    pub volume: String,
    pub peer: String,
    pub bricks: Vec<String>,
    pub timestamp: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl BrickRecord {
    pub fn new(volume: &str, peer: &str, bricks: Vec<String>) -> Self {
        Self {
            volume: volume.to_string(),
            peer: peer.to_string(),
            bricks,
            timestamp: now_secs(),
        }
    }

    /// Seconds since the peer last published this record.
    pub fn age_secs(&self) -> u64 {
        now_secs().saturating_sub(self.timestamp)
    }
}

pub trait BrickRegistry {
    fn publish(&self, record: &BrickRecord) -> Result<(), ReconcileError>;

    fn lookup(&self, volume: &str, peer: &str) -> Result<Option<BrickRecord>, ReconcileError>;
}

pub fn open(config: &RegistryConfig) -> Box<dyn BrickRegistry> {
    match config {
        RegistryConfig::Dir { path } => Box::new(DirRegistry::new(path.clone())),
        RegistryConfig::S3 { bucket, prefix } => Box::new(S3Registry::new(bucket, prefix)),
    }
}

fn record_key(peer: &str) -> String {
    format!("{}.json", peer.replace('/', "_"))
}

/// Records kept as `<root>/<volume>/<peer>.json` on a directory shared by all peers.
pub struct DirRegistry {
    root: PathBuf,
}

impl DirRegistry {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn record_path(&self, volume: &str, peer: &str) -> PathBuf {
        self.root.join(volume).join(record_key(peer))
    }
}

impl BrickRegistry for DirRegistry {
    fn publish(&self, record: &BrickRecord) -> Result<(), ReconcileError> {
        let path = self.record_path(&record.volume, &record.peer);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| ReconcileError::Registry(format!("failed to serialize record: {e}")))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        debug!(
            "Published bricks of {} for volume {} to {}",
            record.peer,
            record.volume,
            path.display()
        );
        Ok(())
    }

    fn lookup(&self, volume: &str, peer: &str) -> Result<Option<BrickRecord>, ReconcileError> {
        let path = self.record_path(volume, peer);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map(Some).map_err(|e| {
            ReconcileError::Registry(format!("failed to parse {}: {e}", path.display()))
        })
    }
}

/// Records kept as `s3://<bucket>/<prefix>/<volume>/<peer>.json`.
pub struct S3Registry {
    bucket: String,
    prefix: String,
}

impl S3Registry {
    pub fn new(bucket: &str, prefix: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn s3_path(&self, volume: &str, peer: &str) -> String {
        format!(
            "s3://{}/{}/{}/{}",
            self.bucket,
            self.prefix,
            volume,
            record_key(peer)
        )
    }
}

impl BrickRegistry for S3Registry {
    fn publish(&self, record: &BrickRecord) -> Result<(), ReconcileError> {
        let json = serde_json::to_string(record)
            .map_err(|e| ReconcileError::Registry(format!("failed to serialize record: {e}")))?;
        let s3_path = self.s3_path(&record.volume, &record.peer);
        info!("Registering bricks of {} at {s3_path}", record.peer);
        run_cmd!(echo $json | aws s3 cp - $s3_path --quiet)
            .map_err(|e| ReconcileError::Registry(format!("failed to upload {s3_path}: {e}")))
    }

    fn lookup(&self, volume: &str, peer: &str) -> Result<Option<BrickRecord>, ReconcileError> {
        let s3_path = self.s3_path(volume, peer);
        let content = match run_fun!(aws s3 cp $s3_path - 2>/dev/null) {
            Ok(content) if !content.trim().is_empty() => content,
            _ => return Ok(None),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ReconcileError::Registry(format!("failed to parse {s3_path}: {e}")))
    }
}
