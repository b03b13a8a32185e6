#![allow(dead_code)]

use cmd_lib::CmdResult;
use gluster_bootstrap::config::{ServerConfig, VolumeConfig, VolumeType};
use gluster_bootstrap::error::ReconcileError;
use gluster_bootstrap::gluster::{ClusterManager, LiveBrick, VolumeStatus};
use gluster_bootstrap::host::LocalHost;
use gluster_bootstrap::membership::RemoteShell;
use gluster_bootstrap::mount::{MountAction, MountManager, MountRequest};
use gluster_bootstrap::peer::NodeIdentity;
use gluster_bootstrap::reconciler::Collaborators;
use gluster_bootstrap::registry::{BrickRecord, BrickRegistry};
use gluster_bootstrap::topology::CreateVariant;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

/// Mutating cluster-manager commands observed by the fake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create {
        volume: String,
        args: Vec<String>,
        variant: CreateVariant,
    },
    Start(String),
    AddBrick(String, String),
    Rebalance(String),
    Set(String, String, String),
    Reset(String, String),
    EnableQuota(String),
    LimitUsage(String, String),
}

#[derive(Default)]
struct ClusterState {
    volumes: HashMap<String, VolumeStatus>,
    calls: Vec<Call>,
    fail_create: bool,
    create_race: bool,
    fail_start: bool,
    fail_status: bool,
    fail_rebalance: bool,
}

/// In-memory cluster shared between the fakes of several nodes.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Rc<RefCell<ClusterState>>,
}

impl FakeCluster {
    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create { .. }))
            .count()
    }

    pub fn status(&self, volume: &str) -> VolumeStatus {
        self.state
            .borrow()
            .volumes
            .get(volume)
            .cloned()
            .unwrap_or_default()
    }

    pub fn put_volume(&self, volume: &str, status: VolumeStatus) {
        self.state
            .borrow_mut()
            .volumes
            .insert(volume.to_string(), status);
    }

    /// Create fails outright.
    pub fn fail_create(&self) {
        self.state.borrow_mut().fail_create = true;
    }

    /// Create fails because another peer created the volume first.
    pub fn lose_create_race(&self) {
        self.state.borrow_mut().create_race = true;
    }

    pub fn fail_start(&self) {
        self.state.borrow_mut().fail_start = true;
    }

    /// Live status queries fail, as when glusterd is unreachable.
    pub fn fail_status(&self) {
        self.state.borrow_mut().fail_status = true;
    }

    pub fn fail_rebalance(&self) {
        self.state.borrow_mut().fail_rebalance = true;
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn with_volume<F: FnOnce(&mut VolumeStatus)>(&self, volume: &str, f: F) -> CmdResult {
        let mut state = self.state.borrow_mut();
        match state.volumes.get_mut(volume) {
            Some(status) => {
                f(status);
                Ok(())
            }
            None => Err(io::Error::other(format!("Volume {volume} does not exist"))),
        }
    }
}

fn parse_brick(arg: &str) -> Option<LiveBrick> {
    let (host, path) = arg.split_once(':')?;
    Some(LiveBrick {
        host: host.to_string(),
        path: path.to_string(),
    })
}

impl ClusterManager for FakeCluster {
    fn volume_status(&self, volume: &str) -> io::Result<VolumeStatus> {
        if self.state.borrow().fail_status {
            return Err(io::Error::other(
                "Connection failed. Please check if gluster daemon is operational.",
            ));
        }
        Ok(self.status(volume))
    }

    fn get_option(&self, volume: &str, key: &str) -> io::Result<Option<String>> {
        Ok(self.status(volume).options.get(key).cloned())
    }

    fn create_volume(&self, volume: &str, args: &[String], variant: CreateVariant) -> CmdResult {
        self.record(Call::Create {
            volume: volume.to_string(),
            args: args.to_vec(),
            variant,
        });
        let mut state = self.state.borrow_mut();
        if state.fail_create {
            return Err(io::Error::other("volume create: failed"));
        }
        let status = VolumeStatus {
            exists: true,
            started: false,
            bricks: args.iter().filter_map(|a| parse_brick(a)).collect(),
            ..VolumeStatus::default()
        };
        let race = state.create_race;
        state.volumes.insert(volume.to_string(), status);
        if race {
            return Err(io::Error::other(format!(
                "volume create: {volume}: failed: Volume {volume} already exists"
            )));
        }
        Ok(())
    }

    fn start_volume(&self, volume: &str) -> CmdResult {
        self.record(Call::Start(volume.to_string()));
        if self.state.borrow().fail_start {
            return Err(io::Error::other("volume start: failed"));
        }
        self.with_volume(volume, |s| s.started = true)
    }

    fn add_brick(&self, volume: &str, brick: &str) -> CmdResult {
        self.record(Call::AddBrick(volume.to_string(), brick.to_string()));
        let brick = parse_brick(brick).ok_or_else(|| io::Error::other("bad brick"))?;
        self.with_volume(volume, |s| s.bricks.push(brick))
    }

    fn start_rebalance(&self, volume: &str) -> CmdResult {
        self.record(Call::Rebalance(volume.to_string()));
        if self.state.borrow().fail_rebalance {
            return Err(io::Error::other("volume rebalance: failed"));
        }
        Ok(())
    }

    fn set_option(&self, volume: &str, key: &str, value: &str) -> CmdResult {
        self.record(Call::Set(volume.to_string(), key.to_string(), value.to_string()));
        self.with_volume(volume, |s| {
            s.options.insert(key.to_string(), value.to_string());
        })
    }

    fn reset_option(&self, volume: &str, key: &str) -> CmdResult {
        self.record(Call::Reset(volume.to_string(), key.to_string()));
        self.with_volume(volume, |s| {
            s.options.remove(key);
        })
    }

    fn enable_quota(&self, volume: &str) -> CmdResult {
        self.record(Call::EnableQuota(volume.to_string()));
        self.with_volume(volume, |s| {
            s.persisted
                .insert("features.quota".to_string(), "on".to_string());
        })
    }

    fn limit_usage(&self, volume: &str, limit: &str) -> CmdResult {
        self.record(Call::LimitUsage(volume.to_string(), limit.to_string()));
        self.with_volume(volume, |s| {
            s.persisted
                .insert("features.limit-usage".to_string(), format!("/:{limit}"));
        })
    }
}

type RecordKey = (String, String);

#[derive(Clone, Default)]
pub struct MemoryRegistry {
    records: Rc<RefCell<BTreeMap<RecordKey, BrickRecord>>>,
    /// Records that become visible after the given number of lookups.
    pending: Rc<RefCell<Vec<(BrickRecord, usize)>>>,
}

impl MemoryRegistry {
    /// Simulates a peer that finishes its own run while the master is polling.
    pub fn seed_after_lookups(&self, volume: &str, peer: &str, bricks: &[&str], lookups: usize) {
        let record = BrickRecord::new(volume, peer, bricks.iter().map(|b| b.to_string()).collect());
        self.pending.borrow_mut().push((record, lookups));
    }

    fn release_pending(&self, volume: &str, peer: &str) {
        let mut pending = self.pending.borrow_mut();
        for (record, remaining) in pending.iter_mut() {
            if record.volume == volume && record.peer == peer {
                *remaining = remaining.saturating_sub(1);
            }
        }
        let mut records = self.records.borrow_mut();
        pending.retain(|(record, remaining)| {
            if *remaining > 0 {
                return true;
            }
            records.insert((record.volume.clone(), record.peer.clone()), record.clone());
            false
        });
    }

    pub fn seed(&self, volume: &str, peer: &str, bricks: &[&str]) {
        let record = BrickRecord::new(volume, peer, bricks.iter().map(|b| b.to_string()).collect());
        self.publish(&record).unwrap();
    }
}

impl BrickRegistry for MemoryRegistry {
    fn publish(&self, record: &BrickRecord) -> Result<(), ReconcileError> {
        self.records.borrow_mut().insert(
            (record.volume.clone(), record.peer.clone()),
            record.clone(),
        );
        Ok(())
    }

    fn lookup(&self, volume: &str, peer: &str) -> Result<Option<BrickRecord>, ReconcileError> {
        self.release_pending(volume, peer);
        Ok(self
            .records
            .borrow()
            .get(&(volume.to_string(), peer.to_string()))
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeShell {
    pub fail: bool,
    pub probes: RefCell<Vec<(String, String, String)>>,
}

impl RemoteShell for FakeShell {
    fn probe_from(&self, master: &str, user: &str, target: &str, _timeout: Duration) -> CmdResult {
        self.probes
            .borrow_mut()
            .push((master.to_string(), user.to_string(), target.to_string()));
        if self.fail {
            return Err(io::Error::other("ssh: connect to host: Connection timed out"));
        }
        Ok(())
    }
}

pub struct FakeHost {
    pub fqdn: String,
    pub hostname: String,
    pub users: HashSet<String>,
    pub root_target: bool,
    pub df_fails: bool,
    pub dirs: RefCell<HashSet<PathBuf>>,
}

impl FakeHost {
    pub fn new(fqdn: &str) -> Self {
        let hostname = fqdn.split('.').next().unwrap_or(fqdn).to_string();
        Self {
            fqdn: fqdn.to_string(),
            hostname,
            users: ["gluster".to_string()].into_iter().collect(),
            root_target: false,
            df_fails: false,
            dirs: RefCell::new(HashSet::new()),
        }
    }
}

impl LocalHost for FakeHost {
    fn identity(&self) -> Result<NodeIdentity, ReconcileError> {
        NodeIdentity::new(&self.fqdn, &self.hostname)
    }

    fn user_exists(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    fn path_exists(&self, path: &Path) -> bool {
        self.dirs.borrow().contains(path)
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        self.dirs.borrow_mut().insert(path.to_path_buf());
        Ok(())
    }

    fn mount_target(&self, path: &Path) -> io::Result<String> {
        if self.df_fails {
            return Err(io::Error::other("df: cannot access path"));
        }
        if self.root_target {
            Ok("/".to_string())
        } else {
            Ok(path.display().to_string())
        }
    }
}

#[derive(Default)]
pub struct FakeMounts {
    pub fail: bool,
    pub applied: RefCell<Vec<(MountRequest, MountAction)>>,
}

impl MountManager for FakeMounts {
    fn apply(&self, request: &MountRequest, action: MountAction) -> CmdResult {
        self.applied.borrow_mut().push((request.clone(), action));
        if self.fail {
            return Err(io::Error::other("mount: connection refused"));
        }
        Ok(())
    }
}

/// One simulated node attached to a shared cluster and registry.
pub struct Node {
    pub cluster: FakeCluster,
    pub registry: MemoryRegistry,
    pub shell: FakeShell,
    pub host: FakeHost,
    pub mounts: FakeMounts,
}

impl Node {
    pub fn new(fqdn: &str, cluster: &FakeCluster, registry: &MemoryRegistry) -> Self {
        Self {
            cluster: cluster.clone(),
            registry: registry.clone(),
            shell: FakeShell::default(),
            host: FakeHost::new(fqdn),
            mounts: FakeMounts::default(),
        }
    }

    pub fn deps(&self) -> Collaborators<'_> {
        Collaborators {
            cluster: &self.cluster,
            registry: &self.registry,
            shell: &self.shell,
            host: &self.host,
            mounts: &self.mounts,
        }
    }
}

pub fn volume(peers: &[&str], volume_type: VolumeType) -> VolumeConfig {
    VolumeConfig {
        peers: peers.iter().map(|p| p.to_string()).collect(),
        volume_type,
        replica_count: None,
        size: Some("1G".to_string()),
        filesystem: Some("xfs".to_string()),
        quota: None,
        allowed_hosts: Vec::new(),
        options: BTreeMap::new(),
    }
}

pub fn server(volumes: &[(&str, VolumeConfig)]) -> ServerConfig {
    ServerConfig {
        volumes: volumes
            .iter()
            .map(|(name, v)| (name.to_string(), v.clone()))
            .collect(),
        ..ServerConfig::default()
    }
}

pub const BRICK: &str = "/gluster/gv0/brick";
