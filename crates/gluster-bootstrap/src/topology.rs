//! Brick-count arithmetic per volume type and the `volume create` command
//! derived from it. Everything here is pure: no commands are executed.

use crate::config::VolumeType;
use crate::planner::BrickLayout;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("no bricks available for {volume_type} volume")]
    NoBricks { volume_type: VolumeType },

    #[error("correct number of bricks not available: {brick_count} needs to be at least 2")]
    TooFewBricks { brick_count: usize },

    #[error("replica_count must be declared and non-zero for {volume_type} volumes")]
    MissingReplicaCount { volume_type: VolumeType },

    #[error(
        "correct number of bricks not available: {brick_count} needs to be a multiple of {replica_count}"
    )]
    NotMultiple {
        brick_count: usize,
        replica_count: usize,
    },
}

/// Replication or striping factor passed to `volume create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Replica(usize),
    Stripe(usize),
}

impl Layout {
    pub fn count(&self) -> usize {
        match self {
            Layout::Replica(n) | Layout::Stripe(n) => *n,
        }
    }

    fn args(&self) -> [String; 2] {
        match self {
            Layout::Replica(n) => ["replica".to_string(), n.to_string()],
            Layout::Stripe(n) => ["stripe".to_string(), n.to_string()],
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Replica(n) => write!(f, "replica {n}"),
            Layout::Stripe(n) => write!(f, "stripe {n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub layout: Option<Layout>,
    pub effective_replica_count: Option<usize>,
    /// Operator-facing caveat for the chosen volume type.
    pub notice: Option<&'static str>,
}

impl Topology {
    /// The replica/stripe part of the create options, empty for distributed.
    pub fn options(&self) -> String {
        self.layout.map(|l| l.to_string()).unwrap_or_default()
    }
}

pub fn validate(
    volume_type: VolumeType,
    brick_count: usize,
    declared_replica_count: Option<usize>,
) -> Result<Topology, TopologyError> {
    if brick_count == 0 {
        return Err(TopologyError::NoBricks { volume_type });
    }

    match volume_type {
        VolumeType::Distributed => Ok(Topology {
            layout: None,
            effective_replica_count: None,
            notice: Some(
                "distributed volume: serious data loss can occur in this mode as files are spread randomly among the bricks",
            ),
        }),
        VolumeType::Replicated => {
            if brick_count < 2 {
                return Err(TopologyError::TooFewBricks { brick_count });
            }
            Ok(Topology {
                layout: Some(Layout::Replica(brick_count)),
                effective_replica_count: Some(brick_count),
                notice: Some("replicated volume: replica_count is set to the number of bricks"),
            })
        }
        VolumeType::Striped => Ok(Topology {
            layout: Some(Layout::Stripe(brick_count)),
            effective_replica_count: Some(brick_count),
            notice: Some("striped volume: stripe count is set to the number of bricks"),
        }),
        VolumeType::DistributedReplicated | VolumeType::DistributedStriped => {
            let replica_count = match declared_replica_count {
                Some(n) if n > 0 => n,
                _ => return Err(TopologyError::MissingReplicaCount { volume_type }),
            };
            if brick_count % replica_count != 0 {
                return Err(TopologyError::NotMultiple {
                    brick_count,
                    replica_count,
                });
            }
            let layout = if volume_type == VolumeType::DistributedReplicated {
                Layout::Replica(replica_count)
            } else {
                Layout::Stripe(replica_count)
            };
            Ok(Topology {
                layout: Some(layout),
                effective_replica_count: Some(replica_count),
                notice: None,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePlan {
    pub volume: String,
    /// Arguments following `gluster volume create <name>`.
    pub args: Vec<String>,
    /// Raised when one peer contributes more than one brick.
    pub force: bool,
}

impl CreatePlan {
    pub fn options(&self) -> String {
        self.args.join(" ")
    }

    pub fn command_line(&self, variant: CreateVariant) -> String {
        let base = format!("gluster volume create {} {}", self.volume, self.options());
        match variant {
            CreateVariant::Standard => base,
            CreateVariant::Forced(_) => format!("echo y | {base} force"),
        }
    }
}

pub fn build_create_plan(volume: &str, topology: &Topology, layout: &BrickLayout) -> CreatePlan {
    let mut args = Vec::new();
    if let Some(l) = topology.layout {
        args.extend(l.args());
    }
    let mut force = false;
    for peer in &layout.peers {
        if peer.bricks.len() > 1 {
            force = true;
        }
        for brick in &peer.bricks {
            args.push(format!("{}:{}", peer.peer, brick));
        }
    }
    CreatePlan {
        volume: volume.to_string(),
        args,
        force,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceReason {
    MultipleBricksPerPeer,
    RootFilesystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateVariant {
    Standard,
    Forced(ForceReason),
}

/// `root_fs_collision` is true when bricks live on `/` and no dedicated disks exist.
pub fn choose_create_variant(force: bool, root_fs_collision: bool) -> CreateVariant {
    if force {
        CreateVariant::Forced(ForceReason::MultipleBricksPerPeer)
    } else if root_fs_collision {
        CreateVariant::Forced(ForceReason::RootFilesystem)
    } else {
        CreateVariant::Standard
    }
}
