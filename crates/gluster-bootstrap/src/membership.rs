use crate::config::{ServerConfig, VolumeConfig};
use crate::error::ReconcileError;
use crate::gluster::ClusterManager;
use crate::host::LocalHost;
use crate::peer::NodeIdentity;
use cmd_lib::*;
use std::time::Duration;

/// Outbound command execution on another peer.
pub trait RemoteShell {
    /// Runs `gluster peer probe <target>` on `master` as `user`, bounded by `timeout`.
    fn probe_from(&self, master: &str, user: &str, target: &str, timeout: Duration) -> CmdResult;
}

pub struct SshShell;

impl RemoteShell for SshShell {
    fn probe_from(&self, master: &str, user: &str, target: &str, timeout: Duration) -> CmdResult {
        let secs = timeout.as_secs().max(1);
        run_cmd! {
            info "Probing $target from $master as $user";
            sudo -u $user timeout $secs
                ssh -o StrictHostKeyChecking=no -o BatchMode=yes -o ConnectTimeout=$secs
                $master "sudo gluster peer probe $target";
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// This node is the volume's master; there is nothing to join.
    Master,
    /// Probed; the master has not created the volume yet.
    AwaitingCreation,
    /// Probed; this node's brick is already part of the volume.
    AlreadyMember,
    /// Probed and added this node's brick, rebalance requested.
    BrickAdded,
}

pub struct ClusterMembership<'a> {
    server: &'a ServerConfig,
    cluster: &'a dyn ClusterManager,
    shell: &'a dyn RemoteShell,
    host: &'a dyn LocalHost,
}

impl<'a> ClusterMembership<'a> {
    pub fn new(
        server: &'a ServerConfig,
        cluster: &'a dyn ClusterManager,
        shell: &'a dyn RemoteShell,
        host: &'a dyn LocalHost,
    ) -> Self {
        Self {
            server,
            cluster,
            shell,
            host,
        }
    }

    pub fn ensure_joined(
        &self,
        name: &str,
        volume: &VolumeConfig,
        identity: &NodeIdentity,
    ) -> Result<JoinOutcome, ReconcileError> {
        let Some(master) = volume.master() else {
            return Err(ReconcileError::Config(format!("volume {name} declares no peers")));
        };
        if identity.is_master(volume) {
            return Ok(JoinOutcome::Master);
        }

        let user = &self.server.ssh_user;
        if !self.host.user_exists(user) {
            return Err(ReconcileError::membership(
                name,
                format!(
                    "ssh user {user} does not exist on this node, cannot reach master {master}"
                ),
            ));
        }

        let timeout = Duration::from_secs(self.server.probe_timeout_secs);
        self.shell
            .probe_from(master, user, &identity.fqdn, timeout)
            .map_err(|e| {
                ReconcileError::membership(
                    name,
                    format!("peer probe of {} from master {master} failed: {e}", identity.fqdn),
                )
            })?;

        let brick_path = self.server.brick_path(name);
        self.host.ensure_dir(&brick_path).map_err(|e| {
            ReconcileError::membership(
                name,
                format!("failed to create brick directory {}: {e}", brick_path.display()),
            )
        })?;

        let status = self.cluster.volume_status(name).map_err(|e| {
            ReconcileError::membership(name, format!("failed to query volume info: {e}"))
        })?;
        if !status.exists {
            info!(
                "Volume {name} is not created yet; master {master} will include this node's registered bricks"
            );
            return Ok(JoinOutcome::AwaitingCreation);
        }

        let brick_path = brick_path.display().to_string();
        let local_peer = identity.local_peer(volume);
        let hosts = [identity.fqdn.as_str(), identity.hostname.as_str(), local_peer];
        if status.has_brick(&hosts, &brick_path) {
            debug!("Brick {}:{brick_path} already in volume {name}", identity.fqdn);
            return Ok(JoinOutcome::AlreadyMember);
        }

        let brick = format!("{}:{brick_path}", identity.fqdn);
        info!("Adding brick {brick} to volume {name}");
        self.cluster
            .add_brick(name, &brick)
            .map_err(|e| {
                ReconcileError::membership(name, format!("add-brick {brick} failed: {e}"))
            })?;
        if let Err(e) = self.cluster.start_rebalance(name) {
            warn!("Volume {name}: rebalance start after adding {brick} failed: {e}");
        }
        Ok(JoinOutcome::BrickAdded)
    }
}
