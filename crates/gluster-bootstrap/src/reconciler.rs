//! Per-volume convergence: publish local bricks, join the master's pool,
//! and on the master create, start and configure the volume.
//!
//! Nodes run independently with no cross-node locking. Every mutating
//! command is gated on a fresh query of live state, and a create that
//! loses a race against another peer is accepted once the volume exists.

use crate::config::{ServerConfig, VolumeConfig};
use crate::error::{ReconcileError, Severity};
use crate::gluster::{ClusterManager, VolumeStatus};
use crate::host::LocalHost;
use crate::membership::{ClusterMembership, JoinOutcome, RemoteShell};
use crate::mount::{MountAction, MountManager, self_mount_request};
use crate::options::OptionReconciler;
use crate::peer::NodeIdentity;
use crate::planner::{self, BrickLayout};
use crate::registry::{BrickRecord, BrickRegistry};
use crate::topology::{self, CreatePlan, CreateVariant, ForceReason, Topology};
use cmd_lib::*;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    NotCreated,
    Created,
    Started,
}

impl VolumeState {
    pub fn from_status(status: &VolumeStatus) -> Self {
        match (status.exists, status.started) {
            (false, _) => VolumeState::NotCreated,
            (true, false) => VolumeState::Created,
            (true, true) => VolumeState::Started,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeOutcome {
    /// Master pass finished; flags tell which mutations this run issued.
    Converged {
        created: bool,
        started: bool,
        option_changes: usize,
    },
    /// Non-master pass finished.
    Joined(JoinOutcome),
    Skipped { reason: String },
    MembershipDeferred { reason: String },
    Failed { reason: String },
}

impl VolumeOutcome {
    fn from_error(err: &ReconcileError) -> Self {
        let reason = err.to_string();
        match err.severity() {
            Severity::Skip => VolumeOutcome::Skipped { reason },
            Severity::Transient => VolumeOutcome::MembershipDeferred { reason },
            Severity::Fatal => VolumeOutcome::Failed { reason },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            VolumeOutcome::Failed { .. } | VolumeOutcome::MembershipDeferred { .. }
        )
    }
}

impl fmt::Display for VolumeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeOutcome::Converged {
                created,
                started,
                option_changes,
            } => write!(
                f,
                "converged (created: {created}, started: {started}, option changes: {option_changes})"
            ),
            VolumeOutcome::Joined(join) => write!(f, "joined ({join:?})"),
            VolumeOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            VolumeOutcome::MembershipDeferred { reason } => {
                write!(f, "membership deferred: {reason}")
            }
            VolumeOutcome::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeReport {
    pub volume: String,
    pub outcome: VolumeOutcome,
    pub mount_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub volumes: Vec<VolumeReport>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        !self.volumes.iter().any(|v| v.outcome.is_failure())
    }

    pub fn get(&self, volume: &str) -> Option<&VolumeReport> {
        self.volumes.iter().find(|v| v.volume == volume)
    }

    pub fn log_summary(&self) {
        for report in &self.volumes {
            match &report.outcome {
                VolumeOutcome::Failed { .. } | VolumeOutcome::MembershipDeferred { .. } => {
                    error!("Volume {}: {}", report.volume, report.outcome)
                }
                VolumeOutcome::Skipped { .. } => {
                    warn!("Volume {}: {}", report.volume, report.outcome)
                }
                _ => info!("Volume {}: {}", report.volume, report.outcome),
            }
            if let Some(e) = &report.mount_error {
                warn!("Volume {}: self-mount failed: {e}", report.volume);
            }
        }
    }
}

/// External systems the reconciler reads and drives.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub cluster: &'a dyn ClusterManager,
    pub registry: &'a dyn BrickRegistry,
    pub shell: &'a dyn RemoteShell,
    pub host: &'a dyn LocalHost,
    pub mounts: &'a dyn MountManager,
}

/// Read-only description of what the master would do for a volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumePlan {
    pub volume: String,
    pub is_master: bool,
    pub local_bricks: Vec<String>,
    pub layout: BrickLayout,
    pub topology: Result<Topology, String>,
    /// Create command the master would issue; `None` when it cannot be decided.
    pub command: Option<String>,
    /// Set when the root-filesystem check failed, leaving the force variant unknown.
    pub root_fs_error: Option<String>,
}

pub struct VolumeReconciler<'a> {
    server: &'a ServerConfig,
    deps: Collaborators<'a>,
    identity: NodeIdentity,
}

impl<'a> VolumeReconciler<'a> {
    /// Resolves the local identity up front; a failure aborts the run
    /// rather than leaving every volume silently unmastered.
    pub fn new(server: &'a ServerConfig, deps: Collaborators<'a>) -> Result<Self, ReconcileError> {
        let identity = deps.host.identity()?;
        info!("Local node identity: {} ({})", identity.fqdn, identity.hostname);
        Ok(Self {
            server,
            deps,
            identity,
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn run(&self) -> RunReport {
        let mut report = RunReport::default();
        for (name, volume) in &self.server.volumes {
            info!("Processing volume {name} ({})", volume.volume_type);
            let outcome = match self.reconcile_volume(name, volume) {
                Ok(outcome) => outcome,
                Err(e) => VolumeOutcome::from_error(&e),
            };
            let mount_error = self.self_mount(name).err().map(|e| e.to_string());
            report.volumes.push(VolumeReport {
                volume: name.clone(),
                outcome,
                mount_error,
            });
        }
        report
    }

    pub fn reconcile_volume(
        &self,
        name: &str,
        volume: &VolumeConfig,
    ) -> Result<VolumeOutcome, ReconcileError> {
        self.prepare_local_bricks(name, volume)?;

        if !self.identity.is_master(volume) {
            let membership = ClusterMembership::new(
                self.server,
                self.deps.cluster,
                self.deps.shell,
                self.deps.host,
            );
            return membership
                .ensure_joined(name, volume, &self.identity)
                .map(VolumeOutcome::Joined);
        }

        let mut status = self.query(name)?;
        let mut created = false;
        if VolumeState::from_status(&status) == VolumeState::NotCreated {
            self.create_volume(name, volume)?;
            created = true;
            status = self.query(name)?;
        }

        let mut started = false;
        if VolumeState::from_status(&status) != VolumeState::Started {
            info!("Starting volume {name}");
            self.deps.cluster.start_volume(name).map_err(|e| {
                ReconcileError::operational(name, format!("volume exists but failed to start: {e}"))
            })?;
            started = true;
        }

        let changes = OptionReconciler::new(self.deps.cluster).reconcile(name, volume, &status)?;
        Ok(VolumeOutcome::Converged {
            created,
            started,
            option_changes: changes.len(),
        })
    }

    /// Provisions this node's brick location and publishes it for the master.
    fn prepare_local_bricks(
        &self,
        name: &str,
        volume: &VolumeConfig,
    ) -> Result<(), ReconcileError> {
        let volume_path = self.server.volume_path(name);
        if self.server.disks.is_empty() {
            warn!("No disks defined for LVM, creating volume {name} on the existing filesystem");
            self.deps.host.ensure_dir(&volume_path)?;
        } else if !self.deps.host.path_exists(&volume_path) {
            return Err(ReconcileError::BrickPathMissing {
                volume: name.to_string(),
                path: volume_path.display().to_string(),
            });
        } else {
            debug!(
                "Volume {name}: using {} filesystem at {}",
                volume.filesystem(name),
                volume_path.display()
            );
        }

        let bricks = planner::plan_bricks(self.server, name);
        let peer = self.identity.local_peer(volume);
        if !volume.peers.iter().any(|p| p == peer) {
            warn!("Volume {name}: this node ({peer}) is not among the declared peers");
        }
        self.deps
            .registry
            .publish(&BrickRecord::new(name, peer, bricks))
    }

    fn create_volume(&self, name: &str, volume: &VolumeConfig) -> Result<(), ReconcileError> {
        let layout = planner::await_peer_bricks(
            self.deps.registry,
            name,
            &volume.peers,
            Duration::from_secs(self.server.peer_wait_timeout_secs),
            Duration::from_secs(self.server.poll_interval_secs.max(1)),
        )?;
        if !layout.is_complete() {
            if self.server.require_all_peer_bricks {
                return Err(ReconcileError::MissingPeerBricks {
                    volume: name.to_string(),
                    missing: layout.missing,
                });
            }
            warn!(
                "Volume {name}: proceeding with {} brick(s), peers without bricks: {}",
                layout.brick_count(),
                layout.missing.join(", ")
            );
        }

        let topology =
            topology::validate(volume.volume_type, layout.brick_count(), volume.replica_count)
                .map_err(|source| ReconcileError::InvalidTopology {
                    volume: name.to_string(),
                    source,
                })?;
        if let Some(notice) = topology.notice {
            warn!("Volume {name}: {notice}");
        }

        let plan = topology::build_create_plan(name, &topology, &layout);
        let variant = topology::choose_create_variant(plan.force, self.root_fs_collision(name)?);
        match variant {
            CreateVariant::Forced(ForceReason::MultipleBricksPerPeer) => {
                warn!(
                    "Volume {name}: multiple bricks on the same peer, adding force flag to volume create"
                )
            }
            CreateVariant::Forced(ForceReason::RootFilesystem) => warn!(
                "Directory {} is on the root filesystem, force creating volume {name}",
                self.server.volume_path(name).display()
            ),
            CreateVariant::Standard => {}
        }

        self.issue_create(name, &plan, variant)
    }

    fn issue_create(
        &self,
        name: &str,
        plan: &CreatePlan,
        variant: CreateVariant,
    ) -> Result<(), ReconcileError> {
        info!("Creating volume {name}: {}", plan.command_line(variant));
        match self.deps.cluster.create_volume(name, &plan.args, variant) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.query(name)?.exists {
                    warn!(
                        "Volume {name}: create reported {e} but the volume exists, treating as created"
                    );
                    Ok(())
                } else {
                    Err(ReconcileError::operational(name, format!("volume create failed: {e}")))
                }
            }
        }
    }

    fn root_fs_collision(&self, name: &str) -> Result<bool, ReconcileError> {
        if !self.server.disks.is_empty() {
            return Ok(false);
        }
        let target = self.deps.host.mount_target(&self.server.volume_path(name))?;
        Ok(target == "/")
    }

    fn query(&self, name: &str) -> Result<VolumeStatus, ReconcileError> {
        self.deps
            .cluster
            .volume_status(name)
            .map_err(|e| {
                ReconcileError::operational(name, format!("failed to query volume info: {e}"))
            })
    }

    fn self_mount(&self, name: &str) -> CmdResult {
        let request = self_mount_request(self.server, name, &self.identity.fqdn);
        self.deps.mounts.apply(&request, MountAction::Mount)?;
        self.deps.mounts.apply(&request, MountAction::Enable)
    }

    /// Describes the create decision for `name` without mutating anything.
    pub fn plan_volume(
        &self,
        name: &str,
        volume: &VolumeConfig,
    ) -> Result<VolumePlan, ReconcileError> {
        let layout = planner::aggregate_bricks(self.deps.registry, name, &volume.peers)?;
        let topology =
            topology::validate(volume.volume_type, layout.brick_count(), volume.replica_count);
        let mut command = None;
        let mut root_fs_error = None;
        if let Ok(t) = &topology {
            let plan = topology::build_create_plan(name, t, &layout);
            match self.root_fs_collision(name) {
                Ok(collision) => {
                    let variant = topology::choose_create_variant(plan.force, collision);
                    command = Some(plan.command_line(variant));
                }
                Err(e) => root_fs_error = Some(e.to_string()),
            }
        }
        Ok(VolumePlan {
            volume: name.to_string(),
            is_master: self.identity.is_master(volume),
            local_bricks: planner::plan_bricks(self.server, name),
            layout,
            topology: topology.map_err(|e| e.to_string()),
            command,
            root_fs_error,
        })
    }
}
